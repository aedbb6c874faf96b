//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing admin response bodies.

use serde::Serialize;

use crate::cache::CacheStats;

/// Response body for `GET /_cache/stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            stats,
        }
    }
}

/// Response body for `GET /_cache/size`
#[derive(Debug, Clone, Serialize)]
pub struct SizeResponse {
    pub size: usize,
}

/// Response body for `DELETE /_cache`
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
}

impl ClearResponse {
    pub fn new() -> Self {
        Self {
            message: "Cache cleared".to_string(),
        }
    }
}

impl Default for ClearResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Response body for `POST /_cache/cleanup`
#[derive(Debug, Clone, Serialize)]
pub struct CleanupResponse {
    /// Number of expired entries purged
    pub removed: usize,
}

/// Response body for `POST /_cache/entry/lookup`
#[derive(Debug, Clone, Serialize)]
pub struct LookupResponse {
    pub cached: bool,
    pub key: String,
}

/// Response body for `DELETE /_cache/entry`
#[derive(Debug, Clone, Serialize)]
pub struct RemoveResponse {
    pub removed: bool,
    pub key: String,
}

/// Response body for `GET /_cache/health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
