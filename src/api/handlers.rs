//! API Handlers
//!
//! Admin endpoint handlers and the state shared by every route.

use std::sync::Arc;

use axum::{extract::State, Json};

use super::proxy::ReqwestForwarder;
use crate::error::{CacheError, Result};
use crate::interceptor::OutgoingRequest;
use crate::manager::CacheManager;
use crate::models::{
    CleanupResponse, ClearResponse, EntryRequest, HealthResponse, LookupResponse,
    RemoveResponse, SizeResponse, StatsResponse,
};

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Owning handle to the cache
    pub manager: CacheManager,
    /// Network stage the interceptor forwards misses to
    pub upstream: Arc<ReqwestForwarder>,
}

impl AppState {
    pub fn new(manager: CacheManager, upstream: ReqwestForwarder) -> Self {
        Self {
            manager,
            upstream: Arc::new(upstream),
        }
    }

    fn outgoing(&self, req: &EntryRequest) -> Result<OutgoingRequest> {
        if let Some(error_msg) = req.validate() {
            return Err(CacheError::InvalidRequest(error_msg));
        }
        req.to_outgoing(self.upstream.base_url())
            .ok_or_else(|| CacheError::InvalidRequest(format!("Invalid HTTP method: {}", req.method)))
    }
}

/// Handler for GET /_cache/health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Handler for GET /_cache/stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(state.manager.cache_stats().await.into())
}

/// Handler for GET /_cache/size
pub async fn size_handler(State(state): State<AppState>) -> Json<SizeResponse> {
    Json(SizeResponse {
        size: state.manager.cache_size().await,
    })
}

/// Handler for DELETE /_cache
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    state.manager.clear_all_cache().await;
    Json(ClearResponse::new())
}

/// Handler for POST /_cache/cleanup
pub async fn cleanup_handler(State(state): State<AppState>) -> Json<CleanupResponse> {
    Json(CleanupResponse {
        removed: state.manager.cleanup_expired_cache().await,
    })
}

/// Handler for POST /_cache/entry/lookup
///
/// Reports whether a fresh response is cached without refreshing its recency.
pub async fn lookup_handler(
    State(state): State<AppState>,
    Json(req): Json<EntryRequest>,
) -> Result<Json<LookupResponse>> {
    let outgoing = state.outgoing(&req)?;

    Ok(Json(LookupResponse {
        cached: state.manager.is_cached(&outgoing).await,
        key: outgoing.cache_key().into(),
    }))
}

/// Handler for DELETE /_cache/entry
pub async fn remove_handler(
    State(state): State<AppState>,
    Json(req): Json<EntryRequest>,
) -> Result<Json<RemoveResponse>> {
    let outgoing = state.outgoing(&req)?;

    Ok(Json(RemoveResponse {
        removed: state.manager.remove_cached_entry(&outgoing).await,
        key: outgoing.cache_key().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        let manager = CacheManager::create_default().unwrap();
        AppState::new(manager, ReqwestForwarder::new("https://api.github.com").unwrap())
    }

    fn entry(url: &str) -> EntryRequest {
        EntryRequest {
            method: "GET".to_string(),
            url: url.to_string(),
            body: None,
        }
    }

    async fn seed(state: &AppState, url: &str) {
        let key = OutgoingRequest::get(url).cache_key();
        let store = state.manager.store();
        store
            .write()
            .await
            .put(key.into(), "[]".into(), 60)
            .unwrap();
    }

    #[tokio::test]
    async fn test_lookup_and_remove_handlers() {
        let state = state();
        seed(&state, "https://api.github.com/users").await;

        let found = lookup_handler(State(state.clone()), Json(entry("/users")))
            .await
            .unwrap();
        assert!(found.cached);

        let removed = remove_handler(State(state.clone()), Json(entry("/users")))
            .await
            .unwrap();
        assert!(removed.removed);
        assert_eq!(removed.key, found.key);

        let again = lookup_handler(State(state), Json(entry("/users")))
            .await
            .unwrap();
        assert!(!again.cached);
    }

    #[tokio::test]
    async fn test_lookup_invalid_request() {
        let result = lookup_handler(State(state()), Json(entry(""))).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_size_clear_and_cleanup_handlers() {
        let state = state();
        seed(&state, "https://api.github.com/users").await;
        seed(&state, "https://api.github.com/emojis").await;

        assert_eq!(size_handler(State(state.clone())).await.size, 2);
        assert_eq!(cleanup_handler(State(state.clone())).await.removed, 0);

        clear_handler(State(state.clone())).await;
        assert_eq!(size_handler(State(state)).await.size, 0);
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let response = stats_handler(State(state())).await;
        assert_eq!(response.stats.hits, 0);
        assert_eq!(response.stats.max_size, 100);
        assert_eq!(response.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }
}
