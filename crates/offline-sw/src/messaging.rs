//! Message envelopes exchanged with pages.
//!
//! Inbound envelopes carry an `action`; replies echo it and attach the
//! result under the action's own key:
//!
//! ```text
//! {"action": "getVersion"}   →  {"action": "getVersion", "getVersion": "<generation>"}
//! {"action": "skipWaiting"}  →  {"action": "skipWaiting"}
//! {"action": "<other>"}      →  {"action": "<other>"}
//! ```
//!
//! Lifecycle notices are `{"event": "<name>"}`, with `"action": "refresh"`
//! added when the page should reload.

use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::debug;

use crate::agent::Agent;
use crate::error::{Result, ServiceWorkerError};
use crate::event::{EventKind, ExtendableEvent};

pub const GET_VERSION: &str = "getVersion";
pub const SKIP_WAITING: &str = "skipWaiting";
pub const REFRESH: &str = "refresh";

/// An inbound message from a page.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub action: String,

    /// Anything else the page sent.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl InboundMessage {
    /// Parse an envelope. The `action` field is required.
    pub fn parse(data: JsonValue) -> Result<Self> {
        serde_json::from_value(data)
            .map_err(|e| ServiceWorkerError::InvalidMessage(e.to_string()))
    }

    pub fn action(&self) -> Action<'_> {
        match self.action.as_str() {
            GET_VERSION => Action::GetVersion,
            SKIP_WAITING => Action::SkipWaiting,
            other => Action::Other(other),
        }
    }
}

/// Actions the agent understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    GetVersion,
    SkipWaiting,
    Other(&'a str),
}

/// Reply to a `getVersion` request.
pub fn version_reply(generation: &str) -> JsonValue {
    json!({ "action": GET_VERSION, GET_VERSION: generation })
}

/// Bare acknowledgment of an action.
pub fn ack(action: &str) -> JsonValue {
    json!({ "action": action })
}

/// Notice of a lifecycle event.
pub fn lifecycle_notice(event: EventKind) -> JsonValue {
    json!({ "event": event.as_str() })
}

/// Notice asking pages to reload.
pub fn refresh_notice(event: &str) -> JsonValue {
    json!({ "event": event, "action": REFRESH })
}

impl Agent {
    pub(crate) async fn on_message(
        &self,
        data: JsonValue,
        _event: &mut ExtendableEvent,
    ) -> Result<()> {
        let message = InboundMessage::parse(data)?;
        debug!(worker = %self.id(), action = %message.action, "Message received");

        let reply = match message.action() {
            Action::GetVersion => version_reply(self.generation()),
            Action::SkipWaiting => {
                let flagged = self.ctx.registration.write().await.skip_waiting(self.id());
                debug!(worker = %self.id(), flagged, "Skip waiting requested");
                ack(SKIP_WAITING)
            }
            Action::Other(action) => ack(action),
        };

        self.broadcast(reply).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AgentEvent;
    use crate::testing::{fixture, url};

    #[test]
    fn test_parse_requires_action() {
        assert!(InboundMessage::parse(json!({"action": "getVersion"})).is_ok());
        assert!(matches!(
            InboundMessage::parse(json!({"type": "getVersion"})),
            Err(ServiceWorkerError::InvalidMessage(_))
        ));
        assert!(InboundMessage::parse(json!("getVersion")).is_err());
    }

    #[test]
    fn test_parse_keeps_extra_fields() {
        let message = InboundMessage::parse(json!({"action": "ping", "seq": 3})).unwrap();
        assert_eq!(message.action(), Action::Other("ping"));
        assert_eq!(message.extra.get("seq"), Some(&json!(3)));
    }

    #[test]
    fn test_envelopes() {
        assert_eq!(
            version_reply("build-9"),
            json!({"action": "getVersion", "getVersion": "build-9"})
        );
        assert_eq!(
            refresh_notice("installed"),
            json!({"event": "installed", "action": "refresh"})
        );
        assert_eq!(lifecycle_notice(EventKind::Activate), json!({"event": "activate"}));
    }

    #[tokio::test]
    async fn test_get_version_is_broadcast() {
        let fx = fixture("build-9").await;
        let (_a, mut rx_a) = fx.ctx.clients.connect(url("/"), true).await;
        let (_b, mut rx_b) = fx.ctx.clients.connect(url("/inbox"), true).await;

        fx.agent
            .handle(AgentEvent::Message(json!({"action": "getVersion"})))
            .await
            .unwrap();

        let expected = json!({"action": "getVersion", "getVersion": "build-9"});
        assert_eq!(rx_a.recv().await.unwrap(), expected);
        assert_eq!(rx_b.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_unknown_action_is_acknowledged() {
        let fx = fixture("v1").await;
        let (_a, mut rx) = fx.ctx.clients.connect(url("/"), true).await;

        fx.agent
            .handle(AgentEvent::Message(json!({"action": "ping"})))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), json!({"action": "ping"}));
    }

    #[tokio::test]
    async fn test_skip_waiting_flags_this_worker() {
        let fx = fixture("v1").await;
        let (_a, mut rx) = fx.ctx.clients.connect(url("/"), true).await;

        fx.agent
            .handle(AgentEvent::Message(json!({"action": "skipWaiting"})))
            .await
            .unwrap();

        let registration = fx.ctx.registration.read().await;
        assert!(registration.worker(fx.agent.id()).unwrap().skip_waiting);
        assert_eq!(rx.recv().await.unwrap(), json!({"action": "skipWaiting"}));
    }

    #[tokio::test]
    async fn test_malformed_message_is_rejected() {
        let fx = fixture("v1").await;
        let err = fx
            .agent
            .handle(AgentEvent::Message(json!({"hello": "world"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::InvalidMessage(_)));
    }
}
