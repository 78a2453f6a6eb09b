//! The real network, as seen from the agent.

use async_trait::async_trait;
use hashbrown::HashMap;
use tracing::{debug, trace};
use url::{Origin, Url};

use crate::error::{Result, ServiceWorkerError};
use crate::request::{FetchRequest, FetchResponse, RequestMode, ResponseType};

/// Issues requests to the network.
///
/// A returned error means the fetch was rejected outright (offline, DNS
/// failure, connection reset). HTTP error statuses are responses.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// HTTP network backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
    origin: Origin,
}

impl HttpNetwork {
    /// Create a network client for pages served from `origin`.
    pub fn new(origin: &Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ServiceWorkerError::Network(e.to_string()))?;
        Ok(Self::with_client(client, origin))
    }

    /// Use an existing client.
    pub fn with_client(client: reqwest::Client, origin: &Url) -> Self {
        Self {
            client,
            origin: origin.origin(),
        }
    }

    fn response_type(&self, request: &FetchRequest) -> ResponseType {
        if request.url.origin() == self.origin {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let response_type = self.response_type(request);
        if request.mode == RequestMode::SameOrigin && response_type != ResponseType::Basic {
            return Err(ServiceWorkerError::Network(format!(
                "same-origin request to {}",
                request.url
            )));
        }

        trace!(method = %request.method, url = %request.url, "Network fetch");
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            debug!(url = %request.url, error = %e, "Network fetch rejected");
            ServiceWorkerError::Network(e.to_string())
        })?;

        if response_type == ResponseType::Opaque {
            return Ok(FetchResponse::opaque());
        }

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceWorkerError::Network(e.to_string()))?;

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body: body.to_vec(),
            response_type,
            from_cache: false,
        })
    }
}
