//! End-to-end lifecycle: first install, offline serving, and a second
//! deployment taking over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hashbrown::HashMap;
use offline_sw::{
    AgentConfig, FetchRequest, FetchResponse, MemoryCacheStorage, Network, Result,
    ServiceWorkerError, ServiceWorkerHost, ServiceWorkerState,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use url::Url;

const ORIGIN: &str = "https://news.example.com/";

#[derive(Default)]
struct FakeNetwork {
    routes: Mutex<HashMap<String, String>>,
    offline: AtomicBool,
    hits: Mutex<Vec<String>>,
}

impl FakeNetwork {
    fn serve(&self, path: &str, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url(path).to_string(), body.to_string());
    }

    fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        self.hits.lock().unwrap().push(request.url.to_string());
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::Network("offline".into()));
        }
        match self.routes.lock().unwrap().get(request.url.as_str()) {
            Some(body) => Ok(FetchResponse::new(200, body.as_str())),
            None => Ok(FetchResponse::new(404, "not found")),
        }
    }
}

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

fn config(generation: &str) -> AgentConfig {
    AgentConfig::new(
        generation,
        Url::parse(ORIGIN).unwrap(),
        vec![
            "/".to_string(),
            "/offline/".to_string(),
            "/static/site.css".to_string(),
        ],
    )
}

fn setup() -> (Arc<FakeNetwork>, ServiceWorkerHost) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let network = Arc::new(FakeNetwork::default());
    network.serve("/", "<h1>home</h1>");
    network.serve("/offline/", "<h1>you are offline</h1>");
    network.serve("/static/site.css", "body {}");
    network.serve("/stories/1", "story one");

    let host = ServiceWorkerHost::new(
        Url::parse(ORIGIN).unwrap(),
        MemoryCacheStorage::shared(),
        network.clone(),
    );
    (network, host)
}

#[tokio::test]
async fn first_install_precaches_and_serves_offline() {
    let (network, host) = setup();
    host.register(config("2024-10-01")).await.unwrap();

    assert_eq!(host.caches().keys().await.unwrap(), vec!["2024-10-01"]);

    // Live request populates the cache.
    let story = host.fetch(FetchRequest::get(url("/stories/1"))).await.unwrap();
    assert_eq!(story.text(), "story one");
    host.idle().await;

    network.offline.store(true, Ordering::SeqCst);
    let before = network.hits().len();

    let cached = host.fetch(FetchRequest::get(url("/stories/1"))).await.unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.text(), "story one");
    assert_eq!(network.hits().len(), before);

    let fallback = host.fetch(FetchRequest::get(url("/stories/2"))).await.unwrap();
    assert_eq!(fallback.text(), "<h1>you are offline</h1>");

    let jsonp = host
        .fetch(FetchRequest::get(url("/comments?id=2&jsonp=cb42&x=1")))
        .await
        .unwrap();
    assert_eq!(jsonp.text(), "cb42(null)");
}

#[tokio::test]
async fn new_deployment_takes_over_and_reloads_pages() {
    let (_network, host) = setup();
    let v1 = host.register(config("v1")).await.unwrap();

    let (_page, mut inbox) = host.open_page(url("/")).await;
    host.fetch(FetchRequest::get(url("/stories/1"))).await.unwrap();
    host.idle().await;

    let v2 = host.register(config("v2")).await.unwrap();

    // Old agent asks the page to refresh; the new one announces activation.
    assert_eq!(
        inbox.recv().await.unwrap(),
        json!({"event": "installed", "action": "refresh"})
    );
    assert_eq!(inbox.recv().await.unwrap(), json!({"event": "activate"}));

    let registration = host.registration().read().await;
    let active = registration.active.as_ref().unwrap();
    assert_eq!(active.id, v2.id());
    assert_eq!(active.state(), ServiceWorkerState::Activated);
    assert!(registration.worker(v1.id()).is_none());
    drop(registration);

    // Only the new generation survives, and it was filled at install.
    assert_eq!(host.caches().keys().await.unwrap(), vec!["v2"]);
    let store = offline_sw::open_store(host.caches(), "v2").await.unwrap();
    assert_eq!(store.keys().await.unwrap().len(), 3);

    host.post_message(v2.id(), json!({"action": "getVersion"}))
        .await
        .unwrap();
    assert_eq!(
        inbox.recv().await.unwrap(),
        json!({"action": "getVersion", "getVersion": "v2"})
    );
}

#[tokio::test]
async fn uncacheable_requests_are_fetched_but_not_stored() {
    let (network, host) = setup();
    network.serve("/live?nocache=1", "live");
    host.register(config("v1")).await.unwrap();

    let live = host
        .fetch(FetchRequest::get(url("/live?nocache=1")))
        .await
        .unwrap();
    assert_eq!(live.text(), "live");
    host.idle().await;

    let store = offline_sw::open_store(host.caches(), "v1").await.unwrap();
    let keys: Vec<String> = store.keys().await.unwrap().into_iter().map(|k| k.url).collect();
    assert!(!keys.iter().any(|k| k.contains("nocache")));
}

#[tokio::test]
async fn reregistering_the_same_generation_keeps_one_store() {
    let (_network, host) = setup();
    let first = host.register(config("v1")).await.unwrap();
    let (_page, mut inbox) = host.open_page(url("/")).await;

    // A second install of the same build takes over without losing data.
    let second = host.register(config("v1")).await.unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(
        inbox.recv().await.unwrap(),
        json!({"event": "installed", "action": "refresh"})
    );
    assert_eq!(host.caches().keys().await.unwrap(), vec!["v1"]);
}
