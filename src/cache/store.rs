//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with LRU tracking and TTL expiration.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use crate::cache::persistence::{PersistHandle, PersistOp, PersistedEntry};
use crate::cache::{
    CacheCounters, CacheEntry, CacheStats, Clock, EntityHeaders, LruTracker, SystemClock,
    MAX_PAYLOAD_SIZE,
};
use crate::error::{CacheError, Result};

/// Store shared between the interceptor, the manager and background tasks.
pub type SharedStore = Arc<RwLock<CacheStore>>;

// == Entry State ==
/// Result of a read-only freshness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Absent,
    Live,
    Expired,
}

// == Cache Store ==
/// Main cache storage with LRU eviction and TTL support.
#[derive(Debug)]
pub struct CacheStore {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// LRU access tracker
    lru: LruTracker,
    /// Running counters
    counters: CacheCounters,
    /// Maximum number of entries allowed
    max_size: usize,
    clock: Arc<dyn Clock>,
    /// Durable mirror, if configured
    persist: Option<PersistHandle>,
}

impl CacheStore {
    // == Constructor ==
    /// Creates a new CacheStore with the given capacity on the system clock.
    pub fn new(max_size: usize) -> Self {
        Self::with_clock(max_size, Arc::new(SystemClock))
    }

    /// Creates a new CacheStore reading time from `clock`.
    pub fn with_clock(max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            counters: CacheCounters::default(),
            max_size,
            clock,
            persist: None,
        }
    }

    /// Mirrors every later mutation into the durable store behind `persist`.
    pub fn with_persistence(mut self, persist: PersistHandle) -> Self {
        self.persist = Some(persist);
        self
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    // == Put ==
    /// Stores a payload under `key` for `max_age_seconds`.
    ///
    /// An existing entry is replaced and its age reset. If the store then
    /// holds more than `max_size` entries, least recently used entries are
    /// evicted until it fits again.
    ///
    /// Returns the number of entries evicted.
    pub fn put(&mut self, key: String, payload: Bytes, max_age_seconds: u64) -> Result<usize> {
        self.put_with_entity(key, payload, EntityHeaders::default(), max_age_seconds)
    }

    /// Like [`put`](Self::put), also keeping the headers that describe how
    /// `payload` is encoded.
    pub fn put_with_entity(
        &mut self,
        key: String,
        payload: Bytes,
        entity: EntityHeaders,
        max_age_seconds: u64,
    ) -> Result<usize> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CacheError::InvalidRequest(format!(
                "Payload of {} bytes exceeds maximum size of {} bytes",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let entry = CacheEntry::new(key.clone(), payload, max_age_seconds, self.now_ms())
            .with_entity(entity);
        self.record(|| PersistOp::Put(PersistedEntry::from(&entry)));
        self.entries.insert(key.clone(), entry);
        self.lru.touch(&key);

        Ok(self.evict_overflow())
    }

    fn evict_overflow(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.max_size {
            let Some(oldest) = self.lru.evict_oldest() else {
                break;
            };
            self.entries.remove(&oldest);
            self.counters.record_eviction();
            debug!("Evicted least recently used entry {}", oldest);
            self.record(|| PersistOp::Remove(oldest));
            evicted += 1;
        }
        evicted
    }

    // == Lookup ==
    /// Returns a fresh entry and marks it most recently used.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn lookup(&mut self, key: &str) -> Option<CacheEntry> {
        let now = self.now_ms();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let entry = entry.clone();
                self.lru.touch(key);
                self.counters.record_hit();
                Some(entry)
            }
            Some(_) => {
                self.purge(key);
                self.counters.record_expirations(1);
                self.counters.record_miss();
                None
            }
            None => {
                self.counters.record_miss();
                None
            }
        }
    }

    // == Get ==
    /// Retrieves a fresh payload by key.
    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        self.lookup(key).map(|entry| entry.payload)
    }

    // == Probe ==
    /// Read-only freshness check; neither refreshes recency nor purges.
    pub fn probe(&self, key: &str) -> EntryState {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(self.now_ms()) => EntryState::Expired,
            Some(_) => EntryState::Live,
            None => EntryState::Absent,
        }
    }

    // == Contains ==
    /// Checks whether a fresh entry exists, purging it if it has expired.
    /// Recency is left untouched.
    pub fn contains(&mut self, key: &str) -> bool {
        match self.probe(key) {
            EntryState::Live => true,
            EntryState::Expired => {
                self.purge(key);
                self.counters.record_expirations(1);
                false
            }
            EntryState::Absent => false,
        }
    }

    // == Remove ==
    /// Removes an entry by key. Returns whether anything was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        if self.entries.contains_key(key) {
            self.purge(key);
            true
        } else {
            false
        }
    }

    fn purge(&mut self, key: &str) {
        self.entries.remove(key);
        self.lru.remove(key);
        self.record(|| PersistOp::Remove(key.to_string()));
    }

    // == Clear ==
    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.record(|| PersistOp::Clear);
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = self.now_ms();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        let count = expired_keys.len();
        for key in expired_keys {
            self.purge(&key);
        }
        self.counters.record_expirations(count);
        count
    }

    // == Rehydrate ==
    /// Loads entries read back from the durable store.
    ///
    /// Entries are replayed oldest first so recency follows their age.
    /// Anything already stale by the current clock is dropped from both
    /// sides. Returns the number of entries loaded.
    pub fn rehydrate(&mut self, mut entries: Vec<PersistedEntry>) -> usize {
        let now = self.now_ms();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));

        let mut loaded = 0;
        for persisted in entries {
            let entry = CacheEntry::from(persisted);
            if entry.is_expired(now) {
                let key = entry.key;
                self.record(|| PersistOp::Remove(key));
                continue;
            }
            let key = entry.key.clone();
            self.entries.insert(key.clone(), entry);
            self.lru.touch(&key);
            loaded += 1;
        }

        let evicted = self.evict_overflow();
        loaded - evicted.min(loaded)
    }

    // == Stats ==
    /// Returns a freshly scanned statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats::scan(
            self.entries.values(),
            self.now_ms(),
            self.max_size,
            self.counters,
        )
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn record(&self, op: impl FnOnce() -> PersistOp) {
        if let Some(persist) = &self.persist {
            persist.record(op());
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;

    fn store(max_size: usize) -> (CacheStore, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        (CacheStore::with_clock(max_size, Arc::new(clock.clone())), clock)
    }

    fn body(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn test_store_new() {
        let (store, _) = store(100);
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(store.max_size(), 100);
    }

    #[test]
    fn test_store_put_and_get() {
        let (mut store, _) = store(100);

        store.put("key1".to_string(), body("value1"), 300).unwrap();

        assert_eq!(store.get("key1"), Some(body("value1")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let (mut store, _) = store(100);
        assert_eq!(store.get("nonexistent"), None);
    }

    #[test]
    fn test_store_remove() {
        let (mut store, _) = store(100);

        store.put("key1".to_string(), body("value1"), 300).unwrap();

        assert!(store.remove("key1"));
        assert!(!store.remove("key1"));
        assert!(store.is_empty());
        assert_eq!(store.get("key1"), None);
    }

    #[test]
    fn test_store_overwrite_resets_age() {
        let (mut store, clock) = store(100);

        store.put("key1".to_string(), body("value1"), 60).unwrap();
        clock.advance_secs(50);
        store.put("key1".to_string(), body("value2"), 60).unwrap();
        clock.advance_secs(50);

        assert_eq!(store.get("key1"), Some(body("value2")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_expiry_removes_entry() {
        let (mut store, clock) = store(100);

        store.put("k".to_string(), body("v"), 60).unwrap();
        clock.advance_secs(61);

        assert_eq!(store.probe("k"), EntryState::Expired);
        assert_eq!(store.get("k"), None);
        assert_eq!(store.len(), 0);
        assert!(!store.contains("k"));
        assert_eq!(store.stats().expirations, 1);
    }

    #[test]
    fn test_store_contains_purges_expired() {
        let (mut store, clock) = store(100);

        store.put("k".to_string(), body("v"), 60).unwrap();
        assert!(store.contains("k"));

        clock.advance_secs(61);
        assert!(!store.contains("k"));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_store_lru_eviction() {
        let (mut store, _) = store(2);

        store.put("a".to_string(), body("1"), 300).unwrap();
        store.put("b".to_string(), body("2"), 300).unwrap();
        let evicted = store.put("c".to_string(), body("3"), 300).unwrap();

        assert_eq!(evicted, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a"), None);
        assert!(store.get("b").is_some());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn test_store_lru_touch_on_get() {
        let (mut store, _) = store(2);

        store.put("a".to_string(), body("1"), 300).unwrap();
        store.put("b".to_string(), body("2"), 300).unwrap();
        store.get("a").unwrap();
        store.put("c".to_string(), body("3"), 300).unwrap();

        assert!(store.get("a").is_some());
        assert_eq!(store.get("b"), None);
        assert!(store.get("c").is_some());
    }

    #[test]
    fn test_store_contains_does_not_refresh_recency() {
        let (mut store, _) = store(2);

        store.put("a".to_string(), body("1"), 300).unwrap();
        store.put("b".to_string(), body("2"), 300).unwrap();
        assert!(store.contains("a"));
        store.put("c".to_string(), body("3"), 300).unwrap();

        assert_eq!(store.probe("a"), EntryState::Absent);
        assert_eq!(store.probe("b"), EntryState::Live);
    }

    #[test]
    fn test_store_clear() {
        let (mut store, _) = store(10);

        for key in ["a", "b", "c"] {
            store.put(key.to_string(), body("v"), 300).unwrap();
        }
        store.clear();

        assert_eq!(store.len(), 0);
        for key in ["a", "b", "c"] {
            assert_eq!(store.get(key), None);
        }
    }

    #[test]
    fn test_store_cleanup_expired() {
        let (mut store, clock) = store(100);

        store.put("short".to_string(), body("v"), 1).unwrap();
        store.put("long".to_string(), body("v"), 10).unwrap();
        clock.advance_secs(2);

        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("long").is_some());
    }

    #[test]
    fn test_store_stats() {
        let (mut store, clock) = store(4);

        store.put("a".to_string(), body("v"), 10).unwrap();
        store.put("b".to_string(), body("v"), 100).unwrap();
        store.get("b").unwrap();
        let _ = store.get("missing");
        clock.advance_secs(20);

        let stats = store.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.valid_entries, 1);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.max_size, 4);
        assert!((stats.utilization_percentage - 50.0).abs() < f64::EPSILON);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        // Stats never purge
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_store_payload_too_large() {
        let (mut store, _) = store(100);
        let large = Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]);

        let result = store.put("key".to_string(), large, 60);
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_rehydrate_skips_expired_and_orders_by_age() {
        let (mut store, _) = store(2);
        let now = store.now_ms();
        let persisted = |key: &str, age_secs: u64, max_age: u64| PersistedEntry {
            key: key.to_string(),
            payload: b"p".to_vec(),
            created_at: now - age_secs * 1000,
            max_age_seconds: max_age,
            entity: EntityHeaders::default(),
        };

        let loaded = store.rehydrate(vec![
            persisted("newest", 1, 300),
            persisted("stale", 400, 300),
            persisted("oldest", 30, 300),
            persisted("middle", 10, 300),
        ]);

        assert_eq!(loaded, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.probe("stale"), EntryState::Absent);
        assert_eq!(store.probe("oldest"), EntryState::Absent);
        assert_eq!(store.probe("middle"), EntryState::Live);
        assert_eq!(store.probe("newest"), EntryState::Live);
    }

    #[test]
    fn test_put_with_entity_keeps_encoding() {
        let (mut store, _) = store(2);
        let entity = EntityHeaders {
            content_type: Some("text/plain".to_string()),
            content_encoding: Some("gzip".to_string()),
        };

        store
            .put_with_entity("k".to_string(), body("gzipped"), entity.clone(), 60)
            .unwrap();

        assert_eq!(store.lookup("k").map(|e| e.entity), Some(entity));

        store.put("k".to_string(), body("{}"), 60).unwrap();
        assert_eq!(
            store.lookup("k").map(|e| e.entity),
            Some(EntityHeaders::default())
        );
    }
}
