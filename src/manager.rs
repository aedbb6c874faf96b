//! Cache Manager
//!
//! The single, explicitly owned handle to a cache. It builds the store,
//! hands out interceptors sharing that store and exposes the management
//! operations (clear, cleanup, size, stats, per-request lookup/removal).
//!
//! ```ignore
//! let manager = CacheManager::builder()
//!     .max_cache_size(200)
//!     .enable_debug_headers(true)
//!     .policies(registry)
//!     .build()?;
//!
//! let interceptor = manager.interceptor();
//! let response = interceptor.intercept(request, &forwarder).await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::persistence::{spawn_write_behind, PersistHandle};
use crate::cache::{
    CacheStats, CacheStore, Clock, DurableStore, EntryState, JsonFileStore, SharedStore,
    StatsCollector, SystemClock,
};
use crate::error::{CacheError, Result};
use crate::interceptor::{CacheInterceptor, OutgoingRequest};
use crate::policy::PolicyRegistry;

/// Capacity used when the builder is not told otherwise
pub const DEFAULT_MAX_CACHE_SIZE: u32 = 100;

// == Cache Manager ==
/// Cheaply cloneable handle; clones share one store.
#[derive(Debug, Clone)]
pub struct CacheManager {
    store: SharedStore,
    interceptor: CacheInterceptor,
    stats: StatsCollector,
    persist: Option<PersistHandle>,
}

impl CacheManager {
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::default()
    }

    /// Manager with default settings and no cached operations.
    pub fn create_default() -> Result<Self> {
        Self::builder().build()
    }

    /// Interceptor bound to this manager's store.
    pub fn interceptor(&self) -> CacheInterceptor {
        self.interceptor.clone()
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    // == Clear All Cache ==
    pub async fn clear_all_cache(&self) {
        self.store.write().await.clear();
        info!("Cache cleared");
    }

    // == Cleanup Expired Cache ==
    /// Purges every expired entry; returns how many were removed.
    pub async fn cleanup_expired_cache(&self) -> usize {
        self.store.write().await.cleanup_expired()
    }

    // == Cache Size ==
    pub async fn cache_size(&self) -> usize {
        self.store.read().await.len()
    }

    // == Cache Stats ==
    pub async fn cache_stats(&self) -> CacheStats {
        self.stats.snapshot().await
    }

    // == Is Cached ==
    /// Whether a fresh response for `request` is cached. Does not refresh
    /// recency; an expired entry found here is purged.
    pub async fn is_cached(&self, request: &OutgoingRequest) -> bool {
        let key = request.cache_key();
        let state = self.store.read().await.probe(key.as_str());
        match state {
            EntryState::Live => true,
            EntryState::Absent => false,
            EntryState::Expired => self.store.write().await.contains(key.as_str()),
        }
    }

    // == Remove Cached Entry ==
    pub async fn remove_cached_entry(&self, request: &OutgoingRequest) -> bool {
        let key = request.cache_key();
        self.store.write().await.remove(key.as_str())
    }

    /// Waits for queued durable writes. No-op without persistence.
    pub async fn flush(&self) {
        if let Some(persist) = &self.persist {
            persist.flush().await;
        }
    }
}

// == Builder ==
#[derive(Debug)]
pub struct CacheManagerBuilder {
    max_cache_size: i64,
    enable_debug_headers: bool,
    policies: PolicyRegistry,
    clock: Arc<dyn Clock>,
    durable: Option<Arc<dyn DurableStore>>,
}

impl Default for CacheManagerBuilder {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE as i64,
            enable_debug_headers: true,
            policies: PolicyRegistry::empty(),
            clock: Arc::new(SystemClock),
            durable: None,
        }
    }
}

impl CacheManagerBuilder {
    /// Maximum number of entries. Must be positive; checked by `build`.
    pub fn max_cache_size(mut self, size: i64) -> Self {
        self.max_cache_size = size;
        self
    }

    /// Whether responses carry `X-Cache`, `X-Cache-TTL` and `X-Cache-Age`.
    pub fn enable_debug_headers(mut self, enabled: bool) -> Self {
        self.enable_debug_headers = enabled;
        self
    }

    pub fn policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = policies;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mirrors the cache into a JSON snapshot at `path`.
    pub fn persistence(self, path: impl Into<PathBuf>) -> Self {
        self.durable_store(Arc::new(JsonFileStore::new(path)))
    }

    pub fn durable_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Validates the configuration and builds the manager.
    ///
    /// With a durable store configured this must run inside a Tokio runtime;
    /// the durable copy is loaded, re-checked for expiry and replayed before
    /// the manager is returned. A durable store that cannot be read is
    /// logged and the cache starts cold.
    pub fn build(self) -> Result<CacheManager> {
        self.build_with_task().map(|(manager, _)| manager)
    }

    /// Like [`build`](Self::build), also returning the write-behind task.
    pub fn build_with_task(self) -> Result<(CacheManager, Option<JoinHandle<()>>)> {
        if self.max_cache_size <= 0 {
            return Err(CacheError::InvalidConfig(format!(
                "Cache size must be positive, got: {}",
                self.max_cache_size
            )));
        }
        let max_size = usize::try_from(self.max_cache_size)
            .map_err(|_| CacheError::InvalidConfig("Cache size too large".to_string()))?;

        for (operation, policy) in self.policies.operations() {
            if let Some(size) = policy.max_size_override {
                info!(
                    "Operation '{}' declares max_size_override={}; the global size of {} applies",
                    operation, size, max_size
                );
            }
        }

        let mut store = CacheStore::with_clock(max_size, self.clock);
        let mut persist = None;
        let mut task = None;

        if let Some(durable) = self.durable {
            if tokio::runtime::Handle::try_current().is_err() {
                return Err(CacheError::InvalidConfig(
                    "a durable store requires a running Tokio runtime".to_string(),
                ));
            }

            let loaded = durable.load();
            let (handle, join) = spawn_write_behind(durable);
            store = store.with_persistence(handle.clone());

            // Stale or overflowing entries dropped here are also removed
            // from the durable copy.
            match loaded {
                Ok(entries) => {
                    let found = entries.len();
                    let kept = store.rehydrate(entries);
                    info!("Rehydrated {} of {} persisted cache entries", kept, found);
                }
                Err(e) => warn!("Could not load durable cache, starting cold: {}", e),
            }

            persist = Some(handle);
            task = Some(join);
        }

        let store = store.into_shared();
        let interceptor = CacheInterceptor::new(
            Arc::clone(&store),
            Arc::new(self.policies),
            self.enable_debug_headers,
        );

        let manager = CacheManager {
            stats: StatsCollector::new(Arc::clone(&store)),
            store,
            interceptor,
            persist,
        };
        Ok((manager, task))
    }
}
