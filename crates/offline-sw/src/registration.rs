//! Registration state: the installing, waiting and active agent instances.
//!
//! ```text
//! Registration (scope)
//!     ├── installing (ServiceWorker)   Installing
//!     ├── waiting    (ServiceWorker)   Installed
//!     └── active     (ServiceWorker)   Activating → Activated
//! ```
//!
//! Every worker publishes its state on a watch channel so another instance
//! can follow its transitions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::debug;
use url::Url;

use crate::error::{Result, ServiceWorkerError};

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Initial state, script being parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

impl ServiceWorkerState {
    /// Lowercase state name, as pages see it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        }
    }
}

/// A service worker instance.
#[derive(Debug)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Cache generation this instance was built with.
    pub generation: String,

    /// Whether the instance asked to bypass its waiting phase.
    pub skip_waiting: bool,

    /// Time of last state change.
    pub state_changed_at: Instant,

    state: Arc<watch::Sender<ServiceWorkerState>>,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(generation: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ServiceWorkerState::Parsed);
        Self {
            id: ServiceWorkerId::new(),
            generation: generation.into(),
            skip_waiting: false,
            state_changed_at: Instant::now(),
            state: Arc::new(state),
        }
    }

    /// Current state.
    pub fn state(&self) -> ServiceWorkerState {
        *self.state.borrow()
    }

    /// Set state and notify watchers.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        debug!(worker = %self.id, state = state.as_str(), "Worker state change");
        self.state.send_replace(state);
        self.state_changed_at = Instant::now();
    }

    /// Follow this worker's state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServiceWorkerState> {
        self.state.subscribe()
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state() == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state() == ServiceWorkerState::Redundant
    }
}

/// Registration shared between the host and every agent instance.
pub type SharedRegistration = Arc<RwLock<Registration>>;

/// A service worker registration.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl Registration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Create a shared registration.
    pub fn shared(scope: Url) -> SharedRegistration {
        Arc::new(RwLock::new(Self::new(scope)))
    }

    /// Find a worker in any slot.
    pub fn worker(&self, id: ServiceWorkerId) -> Option<&ServiceWorker> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|w| w.id == id)
    }

    fn worker_mut(&mut self, id: ServiceWorkerId) -> Option<&mut ServiceWorker> {
        [&mut self.installing, &mut self.waiting, &mut self.active]
            .into_iter()
            .flatten()
            .find(|w| w.id == id)
    }

    /// Follow a worker's state transitions.
    pub fn subscribe(&self, id: ServiceWorkerId) -> Option<watch::Receiver<ServiceWorkerState>> {
        self.worker(id).map(ServiceWorker::subscribe)
    }

    /// Start installing a new worker, replacing any install in progress.
    pub fn begin_install(&mut self, generation: impl Into<String>) -> ServiceWorkerId {
        if let Some(mut stale) = self.installing.take() {
            stale.set_state(ServiceWorkerState::Redundant);
        }
        let mut worker = ServiceWorker::new(generation);
        worker.set_state(ServiceWorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        id
    }

    /// Transition installing to waiting.
    pub fn install_complete(&mut self, id: ServiceWorkerId) -> Result<()> {
        let mut worker = self.take_installing(id)?;
        if let Some(mut old) = self.waiting.take() {
            old.set_state(ServiceWorkerState::Redundant);
        }
        worker.set_state(ServiceWorkerState::Installed);
        self.waiting = Some(worker);
        Ok(())
    }

    /// Discard a worker whose install failed.
    pub fn install_failed(&mut self, id: ServiceWorkerId) -> Result<()> {
        let mut worker = self.take_installing(id)?;
        worker.set_state(ServiceWorkerState::Redundant);
        Ok(())
    }

    fn take_installing(&mut self, id: ServiceWorkerId) -> Result<ServiceWorker> {
        match self.installing.take() {
            Some(worker) if worker.id == id => Ok(worker),
            other => {
                self.installing = other;
                Err(ServiceWorkerError::State(format!("{id} is not installing")))
            }
        }
    }

    /// Ask a worker to skip its waiting phase. Returns false for an unknown,
    /// active or redundant worker.
    pub fn skip_waiting(&mut self, id: ServiceWorkerId) -> bool {
        match self.worker_mut(id) {
            Some(worker) if !worker.is_active() && !worker.is_redundant() => {
                worker.skip_waiting = true;
                true
            }
            _ => false,
        }
    }

    /// Whether the waiting worker may be promoted now.
    pub fn should_activate(&self) -> bool {
        match &self.waiting {
            Some(waiting) => self.active.is_none() || waiting.skip_waiting,
            None => false,
        }
    }

    /// Promote the waiting worker to activating. Returns its ID and the ID of
    /// the worker it replaced, now redundant.
    pub fn activate(&mut self) -> Option<(ServiceWorkerId, Option<ServiceWorkerId>)> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);

        let replaced = self.active.take().map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old.id
        });

        let id = worker.id;
        self.active = Some(worker);
        Some((id, replaced))
    }

    /// Finish activation once the activate event has settled.
    pub fn activation_complete(&mut self, id: ServiceWorkerId) -> Result<()> {
        match self.active.as_mut() {
            Some(worker) if worker.id == id => {
                worker.set_state(ServiceWorkerState::Activated);
                Ok(())
            }
            _ => Err(ServiceWorkerError::State(format!("{id} is not activating"))),
        }
    }

    /// Unregister (mark every worker redundant).
    pub fn unregister(&mut self) {
        for slot in [&mut self.active, &mut self.waiting, &mut self.installing] {
            if let Some(mut worker) = slot.take() {
                worker.set_state(ServiceWorkerState::Redundant);
            }
        }
    }
}
