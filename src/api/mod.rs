//! API Module
//!
//! HTTP surface of the caching gateway.
//!
//! # Endpoints
//! - `GET /_cache/health` - Health check endpoint
//! - `GET /_cache/stats` - Cache statistics
//! - `GET /_cache/size` - Number of stored entries
//! - `DELETE /_cache` - Clear every entry
//! - `POST /_cache/cleanup` - Purge expired entries
//! - `POST /_cache/entry/lookup` - Whether a request is cached
//! - `DELETE /_cache/entry` - Drop the entry of one request
//! - anything else - Forwarded upstream through the cache interceptor

pub mod handlers;
pub mod proxy;
pub mod routes;

pub use handlers::*;
pub use proxy::{proxy_handler, ReqwestForwarder};
pub use routes::create_router;
