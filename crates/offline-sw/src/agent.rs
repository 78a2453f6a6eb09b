//! One agent instance and its event dispatch table.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use crate::cache::{open_store, CacheBackend, StoreHandle};
use crate::clients::Clients;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::event::{AgentEvent, Dispatch, ExtendableEvent};
use crate::network::Network;
use crate::registration::{ServiceWorkerId, SharedRegistration};
use crate::request::FetchResponse;

/// Runtime services an agent is given by its host.
#[derive(Clone)]
pub struct AgentContext {
    /// Cache storage shared by every generation.
    pub caches: Arc<dyn CacheBackend>,

    /// The real network.
    pub network: Arc<dyn Network>,

    /// Open pages.
    pub clients: Arc<Clients>,

    /// The registration this agent belongs to.
    pub registration: SharedRegistration,
}

/// A running agent instance.
///
/// Holds nothing across events besides its configuration and whether the
/// update watch has been registered; the cache store is reopened per
/// operation.
pub struct Agent {
    id: ServiceWorkerId,
    config: Arc<AgentConfig>,
    pub(crate) ctx: AgentContext,
    pub(crate) watching_updates: AtomicBool,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("generation", &self.config.generation)
            .finish()
    }
}

impl Agent {
    /// Create an agent instance.
    pub fn new(id: ServiceWorkerId, config: AgentConfig, ctx: AgentContext) -> Self {
        Self {
            id,
            config: Arc::new(config),
            ctx,
            watching_updates: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Cache generation this agent owns.
    pub fn generation(&self) -> &str {
        &self.config.generation
    }

    pub(crate) fn shared_config(&self) -> Arc<AgentConfig> {
        Arc::clone(&self.config)
    }

    /// Open the current generation's store.
    pub(crate) async fn store(&self) -> Result<StoreHandle> {
        open_store(&self.ctx.caches, &self.config.generation).await
    }

    /// Send a message to every controlled page.
    pub(crate) async fn broadcast(&self, message: JsonValue) -> usize {
        let sent = self.ctx.clients.broadcast(&message).await;
        debug!(worker = %self.id, %message, sent, "Broadcast");
        sent
    }

    /// Route an event to its handler. The returned [`Dispatch`] carries the
    /// work the event keeps alive.
    #[instrument(skip_all, fields(worker = %self.id, event = %event.kind()))]
    pub async fn dispatch(&self, event: AgentEvent) -> Result<Dispatch> {
        let mut lifetime = ExtendableEvent::new(event.kind());
        let mut response = None;

        match event {
            AgentEvent::Install => self.on_install(&mut lifetime).await?,
            AgentEvent::Activate => self.on_activate(&mut lifetime).await?,
            AgentEvent::Fetch(request) => {
                response = Some(self.on_fetch(request, &mut lifetime).await?);
            }
            AgentEvent::Message(data) => self.on_message(data, &mut lifetime).await?,
            AgentEvent::UpdateFound(worker) => {
                self.on_update_found(worker, &mut lifetime).await?
            }
        }

        Ok(Dispatch { response, lifetime })
    }

    /// Dispatch an event and wait for it to settle.
    pub async fn handle(&self, event: AgentEvent) -> Result<Option<FetchResponse>> {
        Ok(self.dispatch(event).await?.settled().await)
    }
}
