//! API Routes
//!
//! Configures the Axum router: admin endpoints under `/_cache`, everything
//! else proxied upstream.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{
    cleanup_handler, clear_handler, health_handler, lookup_handler, remove_handler,
    size_handler, stats_handler, AppState,
};
use super::proxy::proxy_handler;

/// Creates the gateway router.
///
/// # Middleware
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/", delete(clear_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/size", get(size_handler))
        .route("/cleanup", post(cleanup_handler))
        .route("/entry", delete(remove_handler))
        .route("/entry/lookup", post(lookup_handler));

    Router::new()
        .nest("/_cache", admin)
        .fallback(proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
