//! Requests seen by the fetch interceptor and the responses it hands back.

use hashbrown::HashMap;
use http::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// Request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestMode {
    /// Same-origin only.
    SameOrigin,
    /// Cross-origin tolerant; foreign responses come back opaque.
    NoCors,
    /// CORS.
    #[default]
    Cors,
    /// Top-level navigation.
    Navigate,
}

/// An outgoing request from a controlled page.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Request headers.
    pub headers: HashMap<String, String>,

    /// Request mode.
    pub mode: RequestMode,

    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HashMap::new(),
            mode: RequestMode::default(),
            body: None,
        }
    }

    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            ..Self::get(url)
        }
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Whether this is a GET request.
    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    /// Key under which this request is stored.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.method, &self.url)
    }
}

/// Cache lookup key: method and URL, ignoring headers and fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    /// Build a key from a method and URL.
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResponseType {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response with CORS.
    Cors,
    /// Cross-origin `no-cors` response; status and body are hidden.
    Opaque,
    /// Built by the agent, never touched the network.
    Synthetic,
}

/// A response handed back to a controlled page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    /// Status code (0 for opaque responses).
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Response type.
    pub response_type: ResponseType,

    /// Whether this response was served from the cache store.
    #[serde(skip)]
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a basic response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: status_text(status).to_string(),
            headers: HashMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            from_cache: false,
        }
    }

    /// Create an opaque response.
    pub fn opaque() -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            response_type: ResponseType::Opaque,
            from_cache: false,
        }
    }

    /// Create a synthetic script response.
    pub fn script(source: impl Into<String>) -> Self {
        let mut response = Self::new(200, source.into());
        response.response_type = ResponseType::Synthetic;
        response.headers.insert(
            "content-type".to_string(),
            "application/javascript; charset=utf-8".to_string(),
        );
        response
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if this is an opaque response.
    pub fn is_opaque(&self) -> bool {
        self.response_type == ResponseType::Opaque
    }

    /// Body as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Mark as served from the cache store.
    pub fn into_cached(mut self) -> Self {
        self.from_cache = true;
        self
    }
}

fn status_text(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}
