//! Events delivered to an agent and the work they keep alive.

use std::future::Future;

use serde_json::Value as JsonValue;
use tokio::task::JoinSet;
use tracing::warn;

use crate::registration::ServiceWorkerId;
use crate::request::{FetchRequest, FetchResponse};

/// Kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Message,
    UpdateFound,
}

impl EventKind {
    /// Event name, as pages see it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Fetch => "fetch",
            Self::Message => "message",
            Self::UpdateFound => "updatefound",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event delivered to an agent.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// This instance is being installed.
    Install,
    /// This instance is taking over.
    Activate,
    /// A controlled page issued a request.
    Fetch(FetchRequest),
    /// A page posted a message.
    Message(JsonValue),
    /// A newer instance began installing.
    UpdateFound(ServiceWorkerId),
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Install => EventKind::Install,
            Self::Activate => EventKind::Activate,
            Self::Fetch(_) => EventKind::Fetch,
            Self::Message(_) => EventKind::Message,
            Self::UpdateFound(_) => EventKind::UpdateFound,
        }
    }
}

/// Background work an event handler registered.
///
/// The event is not settled until every task finishes. Dropping the event
/// before it settles aborts the outstanding work.
#[derive(Debug)]
pub struct ExtendableEvent {
    kind: EventKind,
    tasks: JoinSet<()>,
}

impl ExtendableEvent {
    /// Create an event with no pending work.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            tasks: JoinSet::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Keep the event alive until `work` finishes. Must be called from
    /// within a tokio runtime.
    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(work);
    }

    /// Number of tasks still outstanding.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Collect tasks that already finished without waiting on the rest.
    /// Returns how many were collected.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                warn!(event = %self.kind, error = %e, "Background task failed");
            }
            reaped += 1;
        }
        reaped
    }

    /// Wait for all registered work. Returns how many tasks ran.
    pub async fn settled(mut self) -> usize {
        let mut settled = 0;
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(event = %self.kind, error = %e, "Background task failed");
            }
            settled += 1;
        }
        settled
    }
}

/// Result of dispatching one event.
#[derive(Debug)]
pub struct Dispatch {
    /// Response for fetch events.
    pub response: Option<FetchResponse>,

    /// Work the event keeps alive.
    pub lifetime: ExtendableEvent,
}

impl Dispatch {
    /// Split into the response and the outstanding work.
    pub fn into_parts(self) -> (Option<FetchResponse>, ExtendableEvent) {
        (self.response, self.lifetime)
    }

    /// Wait for the event to settle, then return its response.
    pub async fn settled(self) -> Option<FetchResponse> {
        self.lifetime.settled().await;
        self.response
    }
}
