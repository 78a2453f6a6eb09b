//! # Offline Service Worker
//!
//! An offline-caching agent for a single web application. It keeps one
//! versioned cache up to date and answers the application's requests from it
//! when the network is unavailable.
//!
//! ## Features
//!
//! - **Install**: pre-cache the bootstrap list into the generation's store
//! - **Activate**: delete every other cache generation, claim open pages
//! - **Fetch**: cache-first, opportunistic caching of same-origin GETs,
//!   JSONP and offline-page fallbacks when the network fails
//! - **Updates**: a newer generation takes over as soon as it is installed
//! - **Messaging**: `getVersion` / `skipWaiting` envelopes with pages
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost
//!     ├── Registration
//!     │       ├── installing / waiting / active (ServiceWorker)
//!     │       └── state watch per worker
//!     ├── Agent (one per generation)
//!     │       └── dispatch: install │ activate │ fetch │ message │ updatefound
//!     ├── CacheBackend (memory or disk)
//!     │       └── store "<generation>": CacheKey → CacheEntry
//!     ├── Network (reqwest)
//!     └── Clients (controlled pages)
//! ```

pub mod agent;
pub mod cache;
pub mod clients;
pub mod config;
pub mod disk;
pub mod error;
pub mod event;
pub mod fetch;
pub mod host;
pub mod lifecycle;
pub mod messaging;
pub mod network;
pub mod notifier;
pub mod registration;
pub mod request;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{Agent, AgentContext};
pub use cache::{open_store, CacheBackend, CacheEntry, MemoryCacheStorage, StoreHandle};
pub use clients::{ClientId, ClientInfo, Clients};
pub use config::{AgentConfig, DEFAULT_FALLBACK_PATH};
pub use disk::DiskCacheStorage;
pub use error::{Result, ServiceWorkerError};
pub use event::{AgentEvent, Dispatch, EventKind, ExtendableEvent};
pub use fetch::{is_cacheable, jsonp_callback};
pub use host::ServiceWorkerHost;
pub use lifecycle::{collect_garbage, precache, PrecacheReport};
pub use messaging::InboundMessage;
pub use network::{HttpNetwork, Network};
pub use notifier::UpdateOutcome;
pub use registration::{Registration, ServiceWorker, ServiceWorkerId, ServiceWorkerState};
pub use request::{CacheKey, FetchRequest, FetchResponse, RequestMode, ResponseType};
