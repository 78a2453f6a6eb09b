//! The hosting runtime: registers agent generations, drives their lifecycle
//! and routes page traffic to the active one.

use std::sync::Arc;

use hashbrown::HashMap;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::agent::{Agent, AgentContext};
use crate::cache::CacheBackend;
use crate::clients::{ClientId, Clients};
use crate::config::AgentConfig;
use crate::error::{Result, ServiceWorkerError};
use crate::event::{AgentEvent, ExtendableEvent};
use crate::network::Network;
use crate::registration::{Registration, ServiceWorkerId, SharedRegistration};
use crate::request::{FetchRequest, FetchResponse};

/// Hosts the agent instances of one registration.
pub struct ServiceWorkerHost {
    ctx: AgentContext,

    /// Live agent instances by worker ID.
    agents: RwLock<HashMap<ServiceWorkerId, Arc<Agent>>>,

    /// Events still running background work.
    keep_alive: Mutex<Vec<ExtendableEvent>>,
}

impl ServiceWorkerHost {
    /// Create a host for `scope`.
    pub fn new(scope: Url, caches: Arc<dyn CacheBackend>, network: Arc<dyn Network>) -> Self {
        Self {
            ctx: AgentContext {
                caches,
                network,
                clients: Clients::shared(),
                registration: Registration::shared(scope),
            },
            agents: RwLock::new(HashMap::new()),
            keep_alive: Mutex::new(Vec::new()),
        }
    }

    pub fn clients(&self) -> &Arc<Clients> {
        &self.ctx.clients
    }

    pub fn caches(&self) -> &Arc<dyn CacheBackend> {
        &self.ctx.caches
    }

    pub fn registration(&self) -> &SharedRegistration {
        &self.ctx.registration
    }

    /// Open a page. Pages inside the scope are controlled from the start
    /// when an agent is already active.
    pub async fn open_page(&self, url: Url) -> (ClientId, mpsc::UnboundedReceiver<JsonValue>) {
        let controlled = {
            let registration = self.ctx.registration.read().await;
            registration.active.is_some() && url.as_str().starts_with(registration.scope.as_str())
        };
        self.ctx.clients.connect(url, controlled).await
    }

    /// Install a new agent generation and, if nothing holds it back,
    /// activate it.
    ///
    /// The active agent (if any) is told about the update before the new one
    /// installs, so it can order the takeover.
    pub async fn register(&self, config: AgentConfig) -> Result<Arc<Agent>> {
        config.validate()?;
        let generation = config.generation.clone();

        let id = self
            .ctx
            .registration
            .write()
            .await
            .begin_install(&generation);
        let agent = Arc::new(Agent::new(id, config, self.ctx.clone()));
        self.agents.write().await.insert(id, Arc::clone(&agent));
        info!(worker = %id, %generation, "Installing");

        let update_watch = match self.active_agent().await {
            Some(active) => match active.dispatch(AgentEvent::UpdateFound(id)).await {
                Ok(dispatch) => Some(dispatch),
                Err(e) => {
                    warn!(worker = %active.id(), error = %e, "updatefound handler failed");
                    None
                }
            },
            None => None,
        };

        if let Err(e) = agent.handle(AgentEvent::Install).await {
            warn!(worker = %id, error = %e, "Install failed");
            self.ctx.registration.write().await.install_failed(id)?;
            self.agents.write().await.remove(&id);
            return Err(e);
        }
        self.ctx.registration.write().await.install_complete(id)?;

        if let Some(dispatch) = update_watch {
            dispatch.settled().await;
        }

        self.activate_waiting().await?;
        Ok(agent)
    }

    /// Activate the waiting agent if it is allowed to take over. Returns the
    /// ID of the agent activated.
    pub async fn activate_waiting(&self) -> Result<Option<ServiceWorkerId>> {
        let promoted = {
            let mut registration = self.ctx.registration.write().await;
            if !registration.should_activate() {
                return Ok(None);
            }
            registration.activate()
        };
        let Some((id, replaced)) = promoted else {
            return Ok(None);
        };

        if let Some(old) = replaced {
            self.agents.write().await.remove(&old);
            info!(worker = %old, "Replaced");
        }

        let agent = self
            .agents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))?;

        agent.handle(AgentEvent::Activate).await?;
        self.ctx.registration.write().await.activation_complete(id)?;
        info!(worker = %id, generation = agent.generation(), "Activated");
        Ok(Some(id))
    }

    /// The active agent.
    pub async fn active_agent(&self) -> Option<Arc<Agent>> {
        let id = self.ctx.registration.read().await.active.as_ref()?.id;
        self.agents.read().await.get(&id).cloned()
    }

    /// The waiting agent.
    pub async fn waiting_agent(&self) -> Option<Arc<Agent>> {
        let id = self.ctx.registration.read().await.waiting.as_ref()?.id;
        self.agents.read().await.get(&id).cloned()
    }

    /// Issue a request from a page. Goes through the active agent, or
    /// straight to the network when none is active.
    ///
    /// Returns as soon as the response is ready. Caching the agent scheduled
    /// keeps running in the background; [`ServiceWorkerHost::idle`] waits
    /// for it.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let Some(agent) = self.active_agent().await else {
            return self.ctx.network.fetch(&request).await;
        };

        let (response, lifetime) = agent.dispatch(AgentEvent::Fetch(request)).await?.into_parts();
        self.retain(lifetime).await;
        response.ok_or_else(|| ServiceWorkerError::State("fetch produced no response".to_string()))
    }

    /// Keep `lifetime` alive if it still has work, dropping events whose
    /// work has finished since the last call.
    async fn retain(&self, mut lifetime: ExtendableEvent) {
        let mut keep_alive = self.keep_alive.lock().await;
        keep_alive.retain_mut(|event| {
            event.reap();
            event.pending() > 0
        });
        lifetime.reap();
        if lifetime.pending() > 0 {
            keep_alive.push(lifetime);
        }
    }

    /// Post a message to a worker, then activate it if it asked to skip
    /// waiting.
    pub async fn post_message(&self, worker: ServiceWorkerId, data: JsonValue) -> Result<()> {
        let agent = self
            .agents
            .read()
            .await
            .get(&worker)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(worker.to_string()))?;

        agent.handle(AgentEvent::Message(data)).await?;
        self.activate_waiting().await?;
        Ok(())
    }

    /// Wait for every event still running background work.
    pub async fn idle(&self) {
        let pending: Vec<ExtendableEvent> = std::mem::take(&mut *self.keep_alive.lock().await);
        for event in pending {
            event.settled().await;
        }
    }

    /// Unregister, dropping every agent instance.
    pub async fn unregister(&self) {
        self.ctx.registration.write().await.unregister();
        self.agents.write().await.clear();
    }
}
