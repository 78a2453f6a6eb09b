//! Probe harness for the offline service worker.
//!
//! Installs and activates one agent generation against the real network,
//! then replays requests through it and reports where each answer came from.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-cache and replay two requests
//! offline-probe --config agent.json / /stories/1
//!
//! # Persist the cache and replay with the network disabled
//! offline-probe --config agent.json --store-dir .cache/sw --offline /stories/1
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use offline_common::{init_logging, LogConfig, LogFormat, OptionExt, ResultExt};
use offline_sw::{
    AgentConfig, CacheBackend, DiskCacheStorage, FetchRequest, FetchResponse, HttpNetwork,
    MemoryCacheStorage, Network, ResponseType, ServiceWorkerError, ServiceWorkerHost,
};
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "offline-probe")]
#[command(about = "Replay requests through the offline service worker")]
struct Cli {
    /// Agent configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Persist cache stores in this directory instead of memory
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Disable the network after install and activation
    #[arg(long)]
    offline: bool,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Paths or absolute URLs to request
    requests: Vec<String>,
}

/// Network that can be switched off mid-run.
struct SwitchableNetwork {
    inner: HttpNetwork,
    offline: AtomicBool,
}

#[async_trait]
impl Network for SwitchableNetwork {
    async fn fetch(&self, request: &FetchRequest) -> offline_sw::Result<FetchResponse> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::Network("network disabled".to_string()));
        }
        self.inner.fetch(request).await
    }
}

#[derive(Serialize)]
struct ProbeLine {
    url: String,
    outcome: &'static str,
    status: Option<u16>,
    bytes: Option<usize>,
    error: Option<String>,
}

fn outcome(response: &FetchResponse) -> &'static str {
    if response.from_cache {
        "cache"
    } else if response.response_type == ResponseType::Synthetic {
        "synthetic"
    } else {
        "network"
    }
}

#[tokio::main]
async fn main() -> offline_common::Result<()> {
    let cli = Cli::parse();

    let log = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(log.with_format(cli.log_format))?;

    let config = AgentConfig::from_path(&cli.config)?;
    let scope = config.origin.clone();

    let caches: Arc<dyn CacheBackend> = match &cli.store_dir {
        Some(dir) => Arc::new(DiskCacheStorage::open_dir(dir).await?),
        None => MemoryCacheStorage::shared(),
    };
    let network = Arc::new(SwitchableNetwork {
        inner: HttpNetwork::new(&scope)?,
        offline: AtomicBool::new(false),
    });

    // Install and activate online; replay with the network the user asked for.
    let host = ServiceWorkerHost::new(scope, caches, network.clone());
    let agent = host.register(config.clone()).await?;
    info!(generation = agent.generation(), "Agent active");
    network.offline.store(cli.offline, Ordering::SeqCst);

    for raw in &cli.requests {
        let url = if raw.starts_with('/') {
            config.resolve(raw)?
        } else {
            url::Url::parse(raw).context(format!("parsing {raw}"))?
        };

        let line = match host.fetch(FetchRequest::get(url.clone())).await {
            Ok(response) => ProbeLine {
                url: url.to_string(),
                outcome: outcome(&response),
                status: Some(response.status),
                bytes: Some(response.body.len()),
                error: None,
            },
            Err(e) => ProbeLine {
                url: url.to_string(),
                outcome: "failed",
                status: None,
                bytes: None,
                error: Some(e.to_string()),
            },
        };
        println!("{}", serde_json::to_string(&line).context("encoding report")?);
    }

    host.idle().await;

    let stores = host.caches().keys().await?;
    let current = stores
        .iter()
        .find(|name| **name == config.generation)
        .ok_or_not_found(format!("cache store {}", config.generation))?;
    info!(store = %current, "Done");
    Ok(())
}
