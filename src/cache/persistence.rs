//! Durable Backing Module
//!
//! Write-behind mirror of the in-memory store. The in-memory store stays
//! authoritative; the durable copy only pre-warms a fresh process.

use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CacheEntry, EntityHeaders};
use crate::error::{CacheError, Result};

const SNAPSHOT_VERSION: u32 = 2;

// == Persisted Entry ==
/// On-disk form of a cache entry. Timestamps are absolute so expiry can be
/// re-checked when the entry is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: String,
    /// Stored as a hex string
    #[serde(with = "hex_payload")]
    pub payload: Vec<u8>,
    pub created_at: u64,
    pub max_age_seconds: u64,
    #[serde(default)]
    pub entity: EntityHeaders,
}

impl From<&CacheEntry> for PersistedEntry {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            payload: entry.payload.to_vec(),
            created_at: entry.created_at,
            max_age_seconds: entry.max_age_seconds,
            entity: entry.entity.clone(),
        }
    }
}

impl From<PersistedEntry> for CacheEntry {
    fn from(entry: PersistedEntry) -> Self {
        CacheEntry::new(
            entry.key,
            entry.payload.into(),
            entry.max_age_seconds,
            entry.created_at,
        )
        .with_entity(entry.entity)
    }
}

mod hex_payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}

// == Persist Op ==
/// A mutation queued for the durable store.
#[derive(Debug)]
pub enum PersistOp {
    Put(PersistedEntry),
    Remove(String),
    Clear,
    /// Completes once every op queued before it has been applied
    Flush(oneshot::Sender<()>),
}

// == Durable Store ==
/// Blocking storage backend driven from the write-behind task.
pub trait DurableStore: Send + Sync + Debug + 'static {
    /// Reads every stored entry, fresh or not.
    fn load(&self) -> Result<Vec<PersistedEntry>>;

    /// Applies a batch of mutations in order. `Flush` never reaches here.
    fn apply(&self, ops: Vec<PersistOp>) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<PersistedEntry>,
}

// == JSON File Store ==
/// Single-file JSON snapshot, rewritten atomically (temp file + rename)
/// after every batch.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    mirror: Mutex<HashMap<String, PersistedEntry>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mirror: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_snapshot(&self, entries: &HashMap<String, PersistedEntry>) -> Result<()> {
        let mut entries: Vec<PersistedEntry> = entries.values().cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(&snapshot)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl DurableStore for JsonFileStore {
    fn load(&self) -> Result<Vec<PersistedEntry>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&raw)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CacheError::Persistence(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let mut mirror = self
            .mirror
            .lock()
            .map_err(|_| CacheError::Internal("durable mirror lock poisoned".to_string()))?;
        *mirror = snapshot
            .entries
            .iter()
            .map(|e| (e.key.clone(), e.clone()))
            .collect();

        Ok(snapshot.entries)
    }

    fn apply(&self, ops: Vec<PersistOp>) -> Result<()> {
        let mut mirror = self
            .mirror
            .lock()
            .map_err(|_| CacheError::Internal("durable mirror lock poisoned".to_string()))?;

        for op in ops {
            match op {
                PersistOp::Put(entry) => {
                    mirror.insert(entry.key.clone(), entry);
                }
                PersistOp::Remove(key) => {
                    mirror.remove(&key);
                }
                PersistOp::Clear => mirror.clear(),
                PersistOp::Flush(_) => {}
            }
        }

        self.write_snapshot(&mirror)
    }
}

// == Persist Handle ==
/// Cheap, non-blocking sender side of the write-behind queue.
#[derive(Debug, Clone)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<PersistOp>,
}

impl PersistHandle {
    /// Queues an op. Never blocks and never fails the caller.
    pub fn record(&self, op: PersistOp) {
        if self.tx.send(op).is_err() {
            warn!("durable write-behind task is gone; dropping cache mutation");
        }
    }

    /// Waits until everything queued so far has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.record(PersistOp::Flush(done_tx));
        let _ = done_rx.await;
    }
}

// == Write-Behind Task ==
/// Spawns the task that drains queued ops into `store`.
///
/// Ops are applied in batches on the blocking pool. Failures are logged and
/// dropped; the in-memory cache is unaffected.
pub fn spawn_write_behind(store: Arc<dyn DurableStore>) -> (PersistHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<PersistOp>();

    let handle = tokio::spawn(async move {
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            while let Ok(op) = rx.try_recv() {
                batch.push(op);
            }

            let mut waiters = Vec::new();
            let mut ops = Vec::with_capacity(batch.len());
            for op in batch {
                match op {
                    PersistOp::Flush(done) => waiters.push(done),
                    other => ops.push(other),
                }
            }

            if !ops.is_empty() {
                let count = ops.len();
                let store = Arc::clone(&store);
                match tokio::task::spawn_blocking(move || store.apply(ops)).await {
                    Ok(Ok(())) => debug!("durable store: applied {} ops", count),
                    Ok(Err(e)) => warn!("durable store write failed: {}", e),
                    Err(e) => warn!("durable store task panicked: {}", e),
                }
            }

            for done in waiters {
                let _ = done.send(());
            }
        }
        info!("Durable write-behind task stopped");
    });

    (PersistHandle { tx }, handle)
}
