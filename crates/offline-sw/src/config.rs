//! Static agent configuration: cache generation, origin and bootstrap list.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ServiceWorkerError};

/// Path of the page served when the network fails and nothing else applies.
pub const DEFAULT_FALLBACK_PATH: &str = "/offline/";

/// Build-time configuration of one agent generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Cache generation identifier. Names the cache store.
    pub generation: String,

    /// Origin the agent is served from.
    pub origin: Url,

    /// Root-relative paths pre-cached at install, in order.
    #[serde(default)]
    pub bootstrap: Vec<String>,

    /// Offline page path. Must appear in `bootstrap`.
    #[serde(default = "default_fallback_path")]
    pub fallback_path: String,
}

fn default_fallback_path() -> String {
    DEFAULT_FALLBACK_PATH.to_string()
}

impl AgentConfig {
    /// Create a configuration with the default fallback path.
    pub fn new(generation: impl Into<String>, origin: Url, bootstrap: Vec<String>) -> Self {
        Self {
            generation: generation.into(),
            origin,
            bootstrap,
            fallback_path: default_fallback_path(),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ServiceWorkerError::Config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ServiceWorkerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Check the invariants the agent relies on.
    pub fn validate(&self) -> Result<()> {
        if self.generation.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "generation identifier is empty".to_string(),
            ));
        }
        if self.origin.cannot_be_a_base() || self.origin.host_str().is_none() {
            return Err(ServiceWorkerError::Config(format!(
                "origin {} has no host",
                self.origin
            )));
        }
        if let Some(bad) = self.bootstrap.iter().find(|p| !p.starts_with('/')) {
            return Err(ServiceWorkerError::Config(format!(
                "bootstrap path {bad:?} is not root-relative"
            )));
        }
        if !self.bootstrap.iter().any(|p| p == &self.fallback_path) {
            return Err(ServiceWorkerError::Config(format!(
                "fallback path {} missing from bootstrap list",
                self.fallback_path
            )));
        }
        Ok(())
    }

    /// Resolve a root-relative path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|e| ServiceWorkerError::Config(format!("cannot resolve {path}: {e}")))
    }

    /// Absolute URL of the offline page.
    pub fn fallback_url(&self) -> Result<Url> {
        self.resolve(&self.fallback_path)
    }
}
