//! Response Cache - an embeddable HTTP response cache
//!
//! Serves repeated outgoing requests from an in-memory LRU + TTL store,
//! keyed by a digest of method, URL and body, with per-operation policies
//! and an optional durable write-behind copy.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod manager;
pub mod models;
pub mod policy;
pub mod tasks;

pub use api::{create_router, AppState, ReqwestForwarder};
pub use cache::{CacheKey, CacheStats, Clock, ManualClock, StatsCollector, SystemClock};
pub use config::Config;
pub use error::{CacheError, Result};
pub use interceptor::{CacheInterceptor, Forwarder, HttpResponse, OutgoingRequest};
pub use manager::{CacheManager, CacheManagerBuilder};
pub use policy::{CachePolicy, PolicyRegistry};
pub use tasks::spawn_cleanup_task;
