//! Cache Module
//!
//! In-memory response caching with TTL expiration, LRU eviction and an
//! optional durable write-behind mirror.

mod clock;
mod entry;
pub mod key;
mod lru;
pub mod persistence;
mod stats;
mod store;


// Re-export public types
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CacheEntry, EntityHeaders};
pub use key::{CacheKey, RequestBody};
pub use lru::LruTracker;
pub use persistence::{DurableStore, JsonFileStore, PersistHandle, PersistedEntry};
pub use stats::{CacheCounters, CacheStats, StatsCollector};
pub use store::{CacheStore, EntryState, SharedStore};

// == Public Constants ==
/// Largest response body that will be cached
pub const MAX_PAYLOAD_SIZE: usize = 8 * 1024 * 1024; // 8 MB
