//! Cache Entry Module
//!
//! Defines the structure for individual cached response payloads with TTL support.

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

// == Entity Headers ==
/// Response headers that describe how the stored body is encoded. They are
/// replayed on a hit so the cached bytes keep their meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityHeaders {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
}

impl EntityHeaders {
    /// Captures the entity headers of an upstream response.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            content_type: get(header::CONTENT_TYPE),
            content_encoding: get(header::CONTENT_ENCODING),
        }
    }

    /// Writes the captured headers into `headers`. Values that no longer
    /// parse are skipped.
    pub fn apply(&self, headers: &mut HeaderMap) {
        let pairs = [
            (header::CONTENT_TYPE, &self.content_type),
            (header::CONTENT_ENCODING, &self.content_encoding),
        ];
        for (name, value) in pairs {
            if let Some(value) = value.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                headers.insert(name, value);
            }
        }
    }
}

// == Cache Entry ==
/// A cached response payload and its freshness metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Derived cache key
    pub key: String,
    /// The stored response body
    pub payload: Bytes,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Maximum age in seconds before the entry is stale
    pub max_age_seconds: u64,
    /// Encoding of `payload` as the upstream declared it
    pub entity: EntityHeaders,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry stamped with `now_ms`.
    ///
    /// # Arguments
    /// * `key` - The derived cache key
    /// * `payload` - The response body to store
    /// * `max_age_seconds` - Freshness lifetime in seconds
    /// * `now_ms` - Current Unix time in milliseconds
    pub fn new(key: String, payload: Bytes, max_age_seconds: u64, now_ms: u64) -> Self {
        Self {
            key,
            payload,
            created_at: now_ms,
            max_age_seconds,
            entity: EntityHeaders::default(),
        }
    }

    pub fn with_entity(mut self, entity: EntityHeaders) -> Self {
        self.entity = entity;
        self
    }

    // == Expires At ==
    /// Absolute expiry instant (Unix milliseconds).
    pub fn expires_at(&self) -> u64 {
        self.created_at
            .saturating_add(self.max_age_seconds.saturating_mul(1000))
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now_ms`.
    ///
    /// Boundary condition: an entry is stale only once its age is strictly
    /// greater than `max_age_seconds`. An entry observed exactly at its
    /// max age is still served.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at()
    }

    // == Age ==
    /// Whole seconds elapsed since the entry was stored.
    pub fn age_secs(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at) / 1000
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, `0` once expired.
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at().saturating_sub(now_ms)
    }

    /// Returns remaining TTL in whole seconds, `0` once expired.
    pub fn ttl_remaining(&self, now_ms: u64) -> u64 {
        self.ttl_remaining_ms(now_ms) / 1000
    }
}
