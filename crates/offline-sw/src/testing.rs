//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hashbrown::HashMap;
use url::Url;

use crate::agent::{Agent, AgentContext};
use crate::cache::{open_store, CacheBackend, CacheEntry, MemoryCacheStorage};
use crate::clients::Clients;
use crate::config::AgentConfig;
use crate::error::{Result, ServiceWorkerError};
use crate::network::Network;
use crate::registration::Registration;
use crate::request::{CacheKey, FetchRequest, FetchResponse};

pub const ORIGIN: &str = "https://app.example.com/";

/// Network that answers from a fixed route table.
#[derive(Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, FetchResponse>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, url: &str, response: FetchResponse) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::Network("offline".to_string()));
        }
        self.routes
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned()
            .ok_or_else(|| ServiceWorkerError::Network(format!("no route to {}", request.url)))
    }
}

/// Cache storage that lists `names` but fails every other operation.
pub struct FailingCacheStorage {
    names: Vec<String>,
}

impl FailingCacheStorage {
    pub fn listing(names: &[&str]) -> Arc<dyn CacheBackend> {
        Arc::new(Self {
            names: names.iter().map(|n| n.to_string()).collect(),
        })
    }

    fn refuse<T>(op: &str, name: &str) -> Result<T> {
        Err(ServiceWorkerError::Cache(format!("{op} {name}: quota exceeded")))
    }
}

#[async_trait]
impl CacheBackend for FailingCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        Self::refuse("open", name)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Self::refuse("has", name)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Self::refuse("delete", name)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.names.clone())
    }

    async fn match_entry(&self, name: &str, _key: &CacheKey) -> Result<Option<CacheEntry>> {
        Self::refuse("match", name)
    }

    async fn put_entry(&self, name: &str, _entry: CacheEntry) -> Result<()> {
        Self::refuse("put", name)
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<CacheKey>> {
        Self::refuse("keys", name)
    }
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn config(generation: &str) -> AgentConfig {
    AgentConfig::new(
        generation,
        Url::parse(ORIGIN).unwrap(),
        vec!["/".to_string(), "/offline/".to_string(), "/app.js".to_string()],
    )
}

/// An agent wired to in-memory services.
pub struct Fixture {
    pub agent: Agent,
    pub network: Arc<ScriptedNetwork>,
    pub ctx: AgentContext,
}

pub async fn fixture(generation: &str) -> Fixture {
    fixture_with(generation, MemoryCacheStorage::shared()).await
}

/// Like [`fixture`], over the given cache storage.
pub async fn fixture_with(generation: &str, caches: Arc<dyn CacheBackend>) -> Fixture {
    let network = ScriptedNetwork::new();
    let registration = Registration::shared(Url::parse(ORIGIN).unwrap());
    let id = registration.write().await.begin_install(generation);
    let ctx = AgentContext {
        caches,
        network: network.clone(),
        clients: Clients::shared(),
        registration,
    };
    Fixture {
        agent: Agent::new(id, config(generation), ctx.clone()),
        network,
        ctx,
    }
}

impl Fixture {
    /// Put a response straight into a store.
    pub async fn seed(&self, generation: &str, path: &str, body: &str) {
        let store = open_store(&self.ctx.caches, generation).await.unwrap();
        store
            .put(&FetchRequest::get(url(path)), FetchResponse::new(200, body))
            .await
            .unwrap();
    }
}
