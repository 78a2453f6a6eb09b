//! Install and activate handling: pre-caching, garbage collection of old
//! cache generations, and claiming open pages.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::cache::{open_store, CacheBackend};
use crate::config::AgentConfig;
use crate::error::{Result, ServiceWorkerError};
use crate::event::{EventKind, ExtendableEvent};
use crate::fetch::{is_cacheable, is_storable};
use crate::messaging::lifecycle_notice;
use crate::network::Network;
use crate::request::{FetchRequest, RequestMode};

/// Outcome of pre-caching the bootstrap list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheReport {
    /// Paths stored.
    pub cached: Vec<String>,
    /// Paths that could not be stored.
    pub failed: Vec<String>,
}

/// Fetch every bootstrap path in `no-cors` mode and store the results in the
/// generation's store. Items succeed or fail independently.
pub async fn precache(
    caches: &Arc<dyn CacheBackend>,
    network: &dyn Network,
    config: &AgentConfig,
) -> Result<PrecacheReport> {
    let store = open_store(caches, &config.generation).await?;

    let attempts = config.bootstrap.iter().map(|path| {
        let store = &store;
        async move {
            let url = config.resolve(path)?;
            let request = FetchRequest::get(url).mode(RequestMode::NoCors);
            if !is_cacheable(&request, &config.origin) {
                return Err(ServiceWorkerError::Cache(format!(
                    "{path} is not cacheable"
                )));
            }
            let response = network.fetch(&request).await?;
            if !is_storable(&response) {
                return Err(ServiceWorkerError::Network(format!(
                    "{path} answered {}",
                    response.status
                )));
            }
            store.put(&request, response).await
        }
    });

    let mut report = PrecacheReport::default();
    for (path, result) in config.bootstrap.iter().zip(join_all(attempts).await) {
        match result {
            Ok(()) => report.cached.push(path.clone()),
            Err(e) => {
                warn!(generation = %config.generation, path = %path, error = %e, "Pre-cache item failed");
                report.failed.push(path.clone());
            }
        }
    }
    Ok(report)
}

/// Delete every store except `current`. Returns the names deleted.
///
/// Deletions run concurrently; a failed deletion is logged and otherwise
/// ignored.
pub async fn collect_garbage(caches: &Arc<dyn CacheBackend>, current: &str) -> Vec<String> {
    let names = match caches.keys().await {
        Ok(names) => names,
        Err(e) => {
            debug!(error = %e, "Could not list cache stores");
            return Vec::new();
        }
    };

    let stale: Vec<String> = names.into_iter().filter(|name| name != current).collect();
    let results = join_all(stale.iter().map(|name| caches.delete(name))).await;

    stale
        .into_iter()
        .zip(results)
        .filter_map(|(name, result)| match result {
            Ok(_) => Some(name),
            Err(e) => {
                debug!(cache_name = %name, error = %e, "Stale store deletion failed");
                None
            }
        })
        .collect()
}

impl Agent {
    pub(crate) async fn on_install(&self, event: &mut ExtendableEvent) -> Result<()> {
        let caches = Arc::clone(&self.ctx.caches);
        let network = Arc::clone(&self.ctx.network);
        let config = self.shared_config();

        event.wait_until(async move {
            match precache(&caches, network.as_ref(), &config).await {
                Ok(report) => info!(
                    generation = %config.generation,
                    cached = report.cached.len(),
                    failed = report.failed.len(),
                    "Pre-cache finished"
                ),
                Err(e) => warn!(generation = %config.generation, error = %e, "Pre-cache failed"),
            }
        });
        Ok(())
    }

    pub(crate) async fn on_activate(&self, event: &mut ExtendableEvent) -> Result<()> {
        self.broadcast(lifecycle_notice(EventKind::Activate)).await;

        let caches = Arc::clone(&self.ctx.caches);
        let current = self.generation().to_string();
        event.wait_until(async move {
            let deleted = collect_garbage(&caches, &current).await;
            if !deleted.is_empty() {
                info!(generation = %current, ?deleted, "Deleted stale cache generations");
            }
        });

        if !self.watching_updates.swap(true, Ordering::SeqCst) {
            debug!(worker = %self.id(), "Watching for updates");
        }

        let claimed = self.ctx.clients.claim().await;
        debug!(worker = %self.id(), claimed, "Claimed clients");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::event::AgentEvent;
    use crate::request::FetchResponse;
    use crate::testing::{fixture, fixture_with, url, FailingCacheStorage};
    use serde_json::json;

    #[tokio::test]
    async fn test_install_precaches_bootstrap_list() {
        let fx = fixture("v1").await;
        fx.network.route(url("/").as_str(), FetchResponse::new(200, "home"));
        fx.network.route(url("/offline/").as_str(), FetchResponse::new(200, "offline"));
        fx.network.route(url("/app.js").as_str(), FetchResponse::new(200, "js"));

        fx.agent.handle(AgentEvent::Install).await.unwrap();

        let store = open_store(&fx.ctx.caches, "v1").await.unwrap();
        assert_eq!(store.keys().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_install_survives_partial_failure() {
        let fx = fixture("v1").await;
        fx.network.route(url("/offline/").as_str(), FetchResponse::new(200, "offline"));
        fx.network.route(url("/").as_str(), FetchResponse::new(500, "boom"));

        assert!(fx.agent.handle(AgentEvent::Install).await.is_ok());

        let report = precache(&fx.ctx.caches, fx.network.as_ref(), fx.agent.config())
            .await
            .unwrap();
        assert_eq!(report.cached, vec!["/offline/"]);
        assert_eq!(report.failed, vec!["/", "/app.js"]);
    }

    #[tokio::test]
    async fn test_install_survives_total_failure() {
        let fx = fixture("v1").await;
        fx.network.set_offline(true);

        assert!(fx.agent.handle(AgentEvent::Install).await.is_ok());
        assert!(fx.ctx.caches.has("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_collect_garbage_keeps_only_current() {
        let caches = MemoryCacheStorage::shared();
        for name in ["v1", "v2", "v3"] {
            open_store(&caches, name).await.unwrap();
        }

        let mut deleted = collect_garbage(&caches, "v2").await;
        deleted.sort();
        assert_eq!(deleted, vec!["v1", "v3"]);
        assert_eq!(caches.keys().await.unwrap(), vec!["v2"]);
    }

    #[tokio::test]
    async fn test_activate_twice_is_idempotent() {
        let fx = fixture("v2").await;
        fx.seed("v1", "/app.js", "old").await;
        fx.seed("v2", "/app.js", "new").await;

        fx.agent.handle(AgentEvent::Activate).await.unwrap();
        fx.agent.handle(AgentEvent::Activate).await.unwrap();

        assert_eq!(fx.ctx.caches.keys().await.unwrap(), vec!["v2"]);
        let store = open_store(&fx.ctx.caches, "v2").await.unwrap();
        assert_eq!(store.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_activate_notifies_then_claims() {
        let fx = fixture("v1").await;
        let (_controlled, mut rx_controlled) = fx.ctx.clients.connect(url("/"), true).await;
        let (_open, mut rx_open) = fx.ctx.clients.connect(url("/about"), false).await;

        fx.agent.handle(AgentEvent::Activate).await.unwrap();

        assert_eq!(rx_controlled.recv().await.unwrap(), json!({"event": "activate"}));
        // Notice goes out before the claim, so the newly claimed page misses it.
        assert!(rx_open.try_recv().is_err());
        assert_eq!(fx.ctx.clients.match_all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_deletions_are_ignored() {
        let caches = FailingCacheStorage::listing(&["v1", "v2", "v3"]);
        assert!(collect_garbage(&caches, "v3").await.is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_survives_broken_storage() {
        let fx = fixture_with("v2", FailingCacheStorage::listing(&["v1", "v2"])).await;
        fx.network.route(url("/").as_str(), FetchResponse::new(200, "home"));
        let (_page, mut rx) = fx.ctx.clients.connect(url("/"), true).await;

        assert!(fx.agent.handle(AgentEvent::Install).await.is_ok());
        assert!(precache(&fx.ctx.caches, fx.network.as_ref(), fx.agent.config())
            .await
            .is_err());

        assert!(fx.agent.handle(AgentEvent::Activate).await.is_ok());
        assert_eq!(rx.recv().await.unwrap(), json!({"event": "activate"}));
    }
}
