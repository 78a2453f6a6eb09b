//! Clients API: the foreground pages the agent can talk to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};
use url::Url;

/// Unique identifier for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A client (open page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: ClientId,

    /// Client URL.
    pub url: Url,

    /// Whether the agent controls this page.
    pub controlled: bool,

    tx: mpsc::UnboundedSender<JsonValue>,
}

impl Client {
    /// Post message to client. Returns false once the page has gone away.
    pub fn post_message(&self, message: &JsonValue) -> bool {
        self.tx.send(message.clone()).is_ok()
    }
}

/// Summary of a client returned by [`Clients::match_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub url: Url,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: RwLock<HashMap<ClientId, Client>>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared clients manager.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Open a page. The receiver yields every message the agent posts to it.
    pub async fn connect(
        &self,
        url: Url,
        controlled: bool,
    ) -> (ClientId, mpsc::UnboundedReceiver<JsonValue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ClientId::new();
        debug!(client = %id, %url, controlled, "Client connected");
        self.clients.write().await.insert(
            id,
            Client {
                id,
                url,
                controlled,
                tx,
            },
        );
        (id, rx)
    }

    /// Get a client by ID.
    pub async fn get(&self, id: ClientId) -> Option<Client> {
        self.clients.read().await.get(&id).cloned()
    }

    /// All controlled clients.
    pub async fn match_all(&self) -> Vec<ClientInfo> {
        let mut matched: Vec<ClientInfo> = self
            .clients
            .read()
            .await
            .values()
            .filter(|c| c.controlled)
            .map(|c| ClientInfo {
                id: c.id,
                url: c.url.clone(),
            })
            .collect();
        matched.sort_by_key(|c| c.id);
        matched
    }

    /// Take control of every open page. Returns how many were newly claimed.
    pub async fn claim(&self) -> usize {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for client in clients.values_mut().filter(|c| !c.controlled) {
            client.controlled = true;
            claimed += 1;
        }
        claimed
    }

    /// Send a message to every controlled page. Pages that have gone away
    /// are dropped. Returns the number of pages reached.
    pub async fn broadcast(&self, message: &JsonValue) -> usize {
        let mut clients = self.clients.write().await;
        let mut closed = Vec::new();
        let mut sent = 0;
        for client in clients.values().filter(|c| c.controlled) {
            if client.post_message(message) {
                sent += 1;
            } else {
                closed.push(client.id);
            }
        }
        for id in closed {
            trace!(client = %id, "Dropping closed client");
            clients.remove(&id);
        }
        sent
    }

    /// Remove a client.
    pub async fn remove(&self, id: ClientId) -> Option<Client> {
        self.clients.write().await.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_controlled_pages() {
        let clients = Clients::new();
        let (_a, mut rx_a) = clients.connect(page(), true).await;
        let (_b, mut rx_b) = clients.connect(page(), false).await;

        assert_eq!(clients.broadcast(&json!({"event": "activate"})).await, 1);
        assert_eq!(rx_a.recv().await.unwrap(), json!({"event": "activate"}));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_claim_controls_every_page() {
        let clients = Clients::new();
        let (_a, _rx_a) = clients.connect(page(), false).await;
        let (_b, _rx_b) = clients.connect(page(), true).await;

        assert_eq!(clients.match_all().await.len(), 1);
        assert_eq!(clients.claim().await, 1);
        assert_eq!(clients.match_all().await.len(), 2);
        assert_eq!(clients.claim().await, 0);
    }

    #[tokio::test]
    async fn test_closed_pages_are_pruned() {
        let clients = Clients::new();
        let (id, rx) = clients.connect(page(), true).await;
        drop(rx);

        assert_eq!(clients.broadcast(&json!({"event": "activate"})).await, 0);
        assert!(clients.get(id).await.is_none());
    }
}
