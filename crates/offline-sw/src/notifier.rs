//! Update takeover: when a newer instance finishes installing, tell it to
//! skip waiting and ask every controlled page to reload.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::agent::Agent;
use crate::clients::Clients;
use crate::error::{Result, ServiceWorkerError};
use crate::event::ExtendableEvent;
use crate::messaging::refresh_notice;
use crate::registration::{ServiceWorkerId, ServiceWorkerState, SharedRegistration};

/// How watching a new instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The instance reached `installed` and was told to skip waiting.
    TakenOver,
    /// The instance went redundant or disappeared first.
    Abandoned,
}

/// Follow a new instance until it is installed, then hand over to it.
pub async fn watch_new_worker(
    worker: ServiceWorkerId,
    mut state: watch::Receiver<ServiceWorkerState>,
    registration: SharedRegistration,
    clients: Arc<Clients>,
) -> UpdateOutcome {
    loop {
        let current = *state.borrow_and_update();
        match current {
            ServiceWorkerState::Installed => {
                registration.write().await.skip_waiting(worker);
                let sent = clients
                    .broadcast(&refresh_notice(ServiceWorkerState::Installed.as_str()))
                    .await;
                info!(%worker, pages = sent, "New version installed, taking over");
                return UpdateOutcome::TakenOver;
            }
            ServiceWorkerState::Activating | ServiceWorkerState::Activated => {
                return UpdateOutcome::TakenOver;
            }
            ServiceWorkerState::Redundant => return UpdateOutcome::Abandoned,
            ServiceWorkerState::Parsed | ServiceWorkerState::Installing => {}
        }
        if state.changed().await.is_err() {
            return UpdateOutcome::Abandoned;
        }
    }
}

impl Agent {
    pub(crate) async fn on_update_found(
        &self,
        worker: ServiceWorkerId,
        event: &mut ExtendableEvent,
    ) -> Result<()> {
        if !self.watching_updates.load(Ordering::SeqCst) {
            debug!(worker = %self.id(), new_worker = %worker, "Update found before activation");
            return Ok(());
        }

        let state = self
            .ctx
            .registration
            .read()
            .await
            .subscribe(worker)
            .ok_or_else(|| ServiceWorkerError::NotFound(worker.to_string()))?;

        let registration = Arc::clone(&self.ctx.registration);
        let clients = Arc::clone(&self.ctx.clients);
        event.wait_until(async move {
            let outcome = watch_new_worker(worker, state, registration, clients).await;
            debug!(new_worker = %worker, ?outcome, "Stopped watching update");
        });
        Ok(())
    }
}
