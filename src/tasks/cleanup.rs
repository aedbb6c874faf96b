//! TTL Cleanup Task
//!
//! Background task that periodically purges expired cache entries so they
//! stop counting against capacity before they are looked up again.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::manager::CacheManager;

/// Spawns a background task that calls
/// [`CacheManager::cleanup_expired_cache`] every `cleanup_interval_secs`.
///
/// The returned handle is aborted during graceful shutdown.
///
/// # Example
/// ```ignore
/// let manager = CacheManager::create_default()?;
/// let cleanup_handle = spawn_cleanup_task(manager.clone(), 60);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(manager: CacheManager, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting TTL cleanup task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = manager.cleanup_expired_cache().await;
            if removed > 0 {
                info!("TTL cleanup: removed {} expired entries", removed);
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    })
}
