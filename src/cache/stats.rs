//! Cache Statistics Module
//!
//! Running performance counters plus the on-demand [`CacheStats`] snapshot.

use serde::Serialize;

use super::store::SharedStore;
use super::CacheEntry;

// == Cache Counters ==
/// Running counters maintained by the store as operations happen.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheCounters {
    /// Number of lookups served from cache
    pub hits: u64,
    /// Number of lookups that found nothing usable (absent or expired)
    pub misses: u64,
    /// Number of entries evicted due to LRU policy
    pub evictions: u64,
    /// Number of entries removed because they were observed expired
    pub expirations: u64,
}

impl CacheCounters {
    // == Record Hit ==
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    // == Record Miss ==
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    // == Record Eviction ==
    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    // == Record Expiration ==
    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }
}

// == Cache Stats ==
/// Point-in-time view of the cache, recomputed on every request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries currently held, fresh or not
    pub total_entries: usize,
    /// Entries that are still fresh
    pub valid_entries: usize,
    /// Entries that are stale but not yet purged
    pub expired_entries: usize,
    /// Configured capacity
    pub max_size: usize,
    /// total_entries / max_size * 100
    pub utilization_percentage: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    // == Scan ==
    /// Builds a snapshot by scanning every entry against `now_ms`.
    ///
    /// The scan is eager: entries nobody has looked up since they went
    /// stale are still counted as expired.
    pub fn scan<'a>(
        entries: impl Iterator<Item = &'a CacheEntry>,
        now_ms: u64,
        max_size: usize,
        counters: CacheCounters,
    ) -> Self {
        let mut total_entries = 0;
        let mut expired_entries = 0;
        for entry in entries {
            total_entries += 1;
            if entry.is_expired(now_ms) {
                expired_entries += 1;
            }
        }

        let utilization_percentage = if max_size == 0 {
            0.0
        } else {
            total_entries as f64 / max_size as f64 * 100.0
        };

        Self {
            total_entries,
            valid_entries: total_entries - expired_entries,
            expired_entries,
            max_size,
            utilization_percentage,
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            expirations: counters.expirations,
        }
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Stats Collector ==
/// Read-only view over a shared store, used for monitoring.
#[derive(Debug, Clone)]
pub struct StatsCollector {
    store: SharedStore,
}

impl StatsCollector {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Takes a snapshot under the read lock. Never purges anything.
    pub async fn snapshot(&self) -> CacheStats {
        self.store.read().await.stats()
    }
}
