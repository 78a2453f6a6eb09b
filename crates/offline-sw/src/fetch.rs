//! Fetch interception: cache-first lookup, opportunistic caching and the
//! network-failure fallback chain.
//!
//! ```text
//! request ──► current store ──hit──► cached response
//!                 │ miss
//!                 ▼
//!              network ──ok──► response (+ store a copy if cacheable)
//!                 │ rejected
//!                 ▼
//!         &jsonp=<cb> ? ──yes──► "<cb>(null)"
//!                 │ no
//!                 ▼
//!         cached /offline/ ──miss──► original failure
//! ```

use std::sync::Arc;

use tracing::{debug, trace};
use url::Url;

use crate::agent::Agent;
use crate::cache::open_store;
use crate::error::{Result, ServiceWorkerError};
use crate::event::ExtendableEvent;
use crate::request::{FetchRequest, FetchResponse};

/// URL marker that names a JSONP callback.
pub const JSONP_MARKER: &str = "&jsonp=";

/// URL substring that opts a request out of opportunistic caching.
pub const NO_CACHE_MARKER: &str = "nocache";

/// Whether a live response to `request` may be stored.
///
/// True for GET requests to the agent's own origin whose URL does not
/// contain `nocache`.
pub fn is_cacheable(request: &FetchRequest, origin: &Url) -> bool {
    request.is_get()
        && request.url.origin() == origin.origin()
        && !request.url.as_str().contains(NO_CACHE_MARKER)
}

/// Whether a response is worth storing: 2xx, or opaque (status unknown).
pub fn is_storable(response: &FetchResponse) -> bool {
    response.ok() || response.is_opaque()
}

/// Callback name from a `&jsonp=<name>` marker, if it is a plain
/// identifier path such as `cb42` or `app.handlers.done`.
pub fn jsonp_callback(url: &Url) -> Option<&str> {
    let raw = url.as_str();
    let start = raw.find(JSONP_MARKER)? + JSONP_MARKER.len();
    let name = raw[start..].split(['&', '#']).next()?;

    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'));
    valid.then_some(name)
}

/// Script that calls `callback` with `null`.
pub fn jsonp_fallback(callback: &str) -> FetchResponse {
    FetchResponse::script(format!("{callback}(null)"))
}

impl Agent {
    pub(crate) async fn on_fetch(
        &self,
        request: FetchRequest,
        event: &mut ExtendableEvent,
    ) -> Result<FetchResponse> {
        match self.store().await {
            Ok(store) => match store.match_request(&request).await {
                Ok(Some(hit)) => {
                    trace!(url = %request.url, "Served from cache");
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(e) => debug!(url = %request.url, error = %e, "Cache lookup failed"),
            },
            Err(e) => debug!(error = %e, "Could not open cache store"),
        }

        match self.ctx.network.fetch(&request).await {
            Ok(response) => {
                if is_cacheable(&request, &self.config().origin) && is_storable(&response) {
                    self.store_in_background(event, request, response.clone());
                }
                Ok(response)
            }
            Err(e) => self.network_fallback(&request, e).await,
        }
    }

    /// Store a copy of a live response without holding up the caller.
    fn store_in_background(
        &self,
        event: &mut ExtendableEvent,
        request: FetchRequest,
        response: FetchResponse,
    ) {
        let caches = Arc::clone(&self.ctx.caches);
        let generation = self.generation().to_string();
        event.wait_until(async move {
            let stored = match open_store(&caches, &generation).await {
                Ok(store) => store.put(&request, response).await,
                Err(e) => Err(e),
            };
            if let Err(e) = stored {
                debug!(url = %request.url, error = %e, "Opportunistic cache put failed");
            }
        });
    }

    async fn network_fallback(
        &self,
        request: &FetchRequest,
        failure: ServiceWorkerError,
    ) -> Result<FetchResponse> {
        if let Some(callback) = jsonp_callback(&request.url) {
            debug!(url = %request.url, callback, "Network failed, answering JSONP with null");
            return Ok(jsonp_fallback(callback));
        }

        let offline_page = FetchRequest::get(self.config().fallback_url()?);
        let cached_page = match self.store().await {
            Ok(store) => store.match_request(&offline_page).await.ok().flatten(),
            Err(_) => None,
        };
        if let Some(page) = cached_page {
            debug!(url = %request.url, "Network failed, serving offline page");
            return Ok(page);
        }

        debug!(url = %request.url, error = %failure, "Network failed with no fallback");
        Err(failure)
    }
}
