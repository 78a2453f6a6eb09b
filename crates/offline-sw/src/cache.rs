//! Cache storage: named, versioned request→response stores.
//!
//! ```text
//! CacheBackend (caches)
//!     └── store "<generation>"
//!             └── CacheKey (method + URL) → CacheEntry
//! ```
//!
//! The agent never keeps a store open across events. Each operation calls
//! [`open_store`] with the generation identifier and works through the
//! returned [`StoreHandle`].

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::{Result, ServiceWorkerError};
use crate::request::{CacheKey, FetchRequest, FetchResponse};

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request key.
    pub key: CacheKey,

    /// Stored response.
    pub response: FetchResponse,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(key: CacheKey, response: FetchResponse) -> Self {
        Self {
            key,
            response,
            cached_at: now_millis(),
        }
    }
}

/// Durable storage of named cache stores, shared by every agent generation.
///
/// Implementations must be safe for concurrent use; each call is atomic per
/// store and key.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Open a store, creating it if it does not exist.
    async fn open(&self, name: &str) -> Result<()>;

    /// Check if a store exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Delete a store. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// All store names.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Look up an entry in a store.
    async fn match_entry(&self, name: &str, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Insert or replace an entry, creating the store if needed.
    async fn put_entry(&self, name: &str, entry: CacheEntry) -> Result<()>;

    /// All request keys in a store.
    async fn entry_keys(&self, name: &str) -> Result<Vec<CacheKey>>;
}

/// Open the store for a generation.
pub async fn open_store(backend: &Arc<dyn CacheBackend>, generation: &str) -> Result<StoreHandle> {
    backend.open(generation).await?;
    Ok(StoreHandle {
        backend: Arc::clone(backend),
        name: generation.to_string(),
    })
}

/// Handle to one open cache store.
#[derive(Clone)]
pub struct StoreHandle {
    backend: Arc<dyn CacheBackend>,
    name: String,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").field("name", &self.name).finish()
    }
}

impl StoreHandle {
    /// Store name (the generation identifier).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request. Only GET requests can match.
    pub async fn match_request(&self, request: &FetchRequest) -> Result<Option<FetchResponse>> {
        if !request.is_get() {
            return Ok(None);
        }
        let entry = self.backend.match_entry(&self.name, &request.cache_key()).await?;
        Ok(entry.map(|e| e.response.into_cached()))
    }

    /// Store a response for a request.
    pub async fn put(&self, request: &FetchRequest, response: FetchResponse) -> Result<()> {
        if !request.is_get() {
            return Err(ServiceWorkerError::Cache(format!(
                "cannot store {} request",
                request.method
            )));
        }
        let key = request.cache_key();
        trace!(cache_name = %self.name, %key, "Storing response");
        self.backend
            .put_entry(&self.name, CacheEntry::new(key, response))
            .await
    }

    /// All request keys in this store.
    pub async fn keys(&self) -> Result<Vec<CacheKey>> {
        self.backend.entry_keys(&self.name).await
    }
}

// ==================== Memory Backend ====================

/// A single in-memory store.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<CacheKey, CacheEntry>,
}

/// In-memory cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create new cache storage behind the backend trait object.
    pub fn shared() -> Arc<dyn CacheBackend> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn match_entry(&self, name: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .and_then(|cache| cache.entries.get(key))
            .cloned())
    }

    async fn put_entry(&self, name: &str, entry: CacheEntry) -> Result<()> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .entries
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<CacheKey>> {
        let caches = self.caches.read().await;
        let mut keys: Vec<CacheKey> = caches
            .get(name)
            .map(|cache| cache.entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
