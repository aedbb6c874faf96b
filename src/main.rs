//! Response Cache gateway
//!
//! Forwards HTTP requests to an upstream API and answers repeats from the
//! response cache.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use response_cache::{
    create_router, spawn_cleanup_task, AppState, CacheManager, Config, PolicyRegistry,
    ReqwestForwarder,
};

/// Main entry point for the caching gateway.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Load the operation policy table
/// 4. Build the cache manager, rehydrating from disk when configured
/// 5. Start background TTL cleanup task
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "response_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting response cache gateway");

    let config = Config::from_env();
    config.validate()?;
    info!(
        "Configuration loaded: max_cache_size={}, debug_headers={}, port={}, cleanup_interval={}s, upstream={}",
        config.max_cache_size,
        config.debug_headers,
        config.server_port,
        config.cleanup_interval,
        config.upstream_url
    );

    let policies = match &config.policy_file {
        Some(path) => PolicyRegistry::from_file(path)
            .with_context(|| format!("loading policy file {}", path.display()))?,
        None => {
            warn!("POLICY_FILE not set; no operation will be cached");
            PolicyRegistry::empty()
        }
    };
    info!("Loaded {} cache policies", policies.len());

    let mut builder = CacheManager::builder()
        .max_cache_size(config.max_cache_size)
        .enable_debug_headers(config.debug_headers)
        .policies(policies);
    if let Some(path) = &config.persist_path {
        info!("Persisting cache to {}", path.display());
        builder = builder.persistence(path);
    }
    let (manager, persist_handle) = builder.build_with_task()?;

    let mut tasks: Vec<JoinHandle<()>> = persist_handle.into_iter().collect();
    if config.cleanup_interval > 0 {
        tasks.push(spawn_cleanup_task(manager.clone(), config.cleanup_interval));
        info!("Background cleanup task started");
    }

    let upstream = ReqwestForwarder::new(&config.upstream_url)?;
    let app = create_router(AppState::new(manager.clone(), upstream));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Gateway listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    manager.flush().await;
    for task in tasks {
        task.abort();
    }
    warn!("Background tasks aborted");

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
