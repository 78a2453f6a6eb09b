//! Error types for the offline service worker.

use offline_common::OfflineKitError;
use thiserror::Error;

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ServiceWorkerError {
    /// Whether this error came from the network rather than the agent itself.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<serde_json::Error> for ServiceWorkerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Cache(format!("serialization: {e}"))
    }
}

impl From<std::io::Error> for ServiceWorkerError {
    fn from(e: std::io::Error) -> Self {
        Self::Cache(format!("io: {e}"))
    }
}

impl From<ServiceWorkerError> for OfflineKitError {
    fn from(e: ServiceWorkerError) -> Self {
        match e {
            ServiceWorkerError::Network(_) => OfflineKitError::network_with_source("fetch", e),
            ServiceWorkerError::Cache(_) => OfflineKitError::cache_with_source("cache store", e),
            ServiceWorkerError::Config(msg) => OfflineKitError::config(msg),
            ServiceWorkerError::NotFound(what) => OfflineKitError::NotFound(what),
            other => OfflineKitError::internal(other.to_string()),
        }
    }
}

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
