//! Cache Interceptor
//!
//! The request pipeline stage that serves cached responses and stores fresh
//! ones. For every request:
//!
//! 1. No policy for its operation: forward untouched.
//! 2. Policy and a fresh entry: answer from cache (`X-Cache: HIT`).
//! 3. Policy and no entry: forward, store a successful body, tag `MISS`.
//!
//! Failures from the downstream forwarder are returned unchanged and never
//! stored.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tracing::{debug, warn};

use crate::cache::{key, CacheEntry, CacheKey, EntityHeaders, RequestBody, SharedStore};
use crate::policy::PolicyRegistry;

/// `HIT` or `MISS`
pub const CACHE_STATUS_HEADER: &str = "x-cache";
/// Seconds until a cached response goes stale
pub const CACHE_TTL_HEADER: &str = "x-cache-ttl";
/// Seconds since a cached response was stored
pub const CACHE_AGE_HEADER: &str = "x-cache-age";

// == Outgoing Request ==
/// Request descriptor handed to the interceptor.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    /// Full URL including the query string
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    /// Logical client operation this request belongs to
    pub operation: Option<String>,
}

impl OutgoingRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            operation: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Key this request is stored under.
    pub fn cache_key(&self) -> CacheKey {
        key::derive(self.method.as_str(), &self.url, self.body.as_ref())
    }
}

// == Response ==
/// Fully buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Value of the `X-Cache` header, if present.
    pub fn cache_status(&self) -> Option<&str> {
        self.headers
            .get(CACHE_STATUS_HEADER)
            .and_then(|v| v.to_str().ok())
    }

    fn header_u64(&self, name: &str) -> Option<u64> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    pub fn cache_ttl(&self) -> Option<u64> {
        self.header_u64(CACHE_TTL_HEADER)
    }

    pub fn cache_age(&self) -> Option<u64> {
        self.header_u64(CACHE_AGE_HEADER)
    }
}

// == Forwarder ==
/// The next stage of the pipeline, normally the network.
#[async_trait]
pub trait Forwarder: Send + Sync {
    type Error: Send;

    async fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, Self::Error>;
}

/// Default success predicate: any 2xx status.
pub fn is_success(status: StatusCode) -> bool {
    status.is_success()
}

// == Cache Interceptor ==
/// Stateless pipeline stage; clones share the same store and policy table.
#[derive(Clone)]
pub struct CacheInterceptor {
    store: SharedStore,
    policies: Arc<PolicyRegistry>,
    debug_headers: bool,
    cacheable: fn(StatusCode) -> bool,
}

impl std::fmt::Debug for CacheInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInterceptor")
            .field("policies", &self.policies.len())
            .field("debug_headers", &self.debug_headers)
            .finish()
    }
}

impl CacheInterceptor {
    pub fn new(store: SharedStore, policies: Arc<PolicyRegistry>, debug_headers: bool) -> Self {
        Self {
            store,
            policies,
            debug_headers,
            cacheable: is_success,
        }
    }

    /// Replaces the predicate deciding which responses get stored.
    pub fn with_success_predicate(mut self, cacheable: fn(StatusCode) -> bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    // == Intercept ==
    /// Runs `request` through the cache, calling `next` on a miss.
    ///
    /// The store lock is never held while `next` runs.
    pub async fn intercept<F>(
        &self,
        request: OutgoingRequest,
        next: &F,
    ) -> Result<HttpResponse, F::Error>
    where
        F: Forwarder + ?Sized,
    {
        let policy = request
            .operation
            .as_deref()
            .and_then(|op| self.policies.resolve(op));
        let Some(policy) = policy else {
            return next.send(request).await;
        };

        let key = request.cache_key();

        let cached = {
            let mut store = self.store.write().await;
            store
                .lookup(key.as_str())
                .map(|entry| (entry, store.now_ms()))
        };
        if let Some((entry, now_ms)) = cached {
            debug!("Cache HIT for {} {}", request.method, request.url);
            return Ok(self.cached_response(&entry, now_ms));
        }

        debug!("Cache MISS for {} {}", request.method, request.url);
        let mut response = next.send(request).await?;

        if (self.cacheable)(response.status) {
            let stored = self.store.write().await.put_with_entity(
                key.into(),
                response.body.clone(),
                EntityHeaders::from_headers(&response.headers),
                policy.max_age_seconds,
            );
            if let Err(e) = stored {
                warn!("Response not cached: {}", e);
            }
            if self.debug_headers {
                response
                    .headers
                    .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
            }
        }

        Ok(response)
    }

    fn cached_response(&self, entry: &CacheEntry, now_ms: u64) -> HttpResponse {
        let mut response = HttpResponse::new(StatusCode::OK, entry.payload.clone());
        entry.entity.apply(&mut response.headers);
        if !response.headers.contains_key(header::CONTENT_TYPE) {
            response.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }

        if self.debug_headers {
            response
                .headers
                .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
            response
                .headers
                .insert(CACHE_TTL_HEADER, HeaderValue::from(entry.ttl_remaining(now_ms)));
            response
                .headers
                .insert(CACHE_AGE_HEADER, HeaderValue::from(entry.age_secs(now_ms)));
        }
        response
    }
}
