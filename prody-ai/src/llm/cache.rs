//! TTL response cache with a persisted snapshot.
//!
//! The cache is TTL-agnostic: callers decide how long each value lives.
//! Writes are visible to the next read immediately; persistence is a
//! debounced background flush of the whole index to a JSON snapshot.
//! Once the index grows past its cap, expired entries are purged and then the
//! least-recently-written entries are evicted.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::clock::{Clock, SystemClock};
use super::types::{ContentOrigin, FeatureKind};

const SNAPSHOT_VERSION: u32 = 1;

/// Default cap on live entries.
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Cache key: feature kind plus a content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Key for `input` under `feature`, fingerprinted with SHA-256.
    pub fn for_content(feature: FeatureKind, input: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(feature.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(input.as_bytes());
        let hash = hasher.finalize();
        CacheKey(format!("{}:{:x}", feature.as_str(), hash))
    }

    /// The fingerprint part of the key.
    pub fn fingerprint(&self) -> &str {
        self.0
            .split_once(':')
            .map(|(_, fingerprint)| fingerprint)
            .unwrap_or(&self.0)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form for logs
        let end = self
            .0
            .char_indices()
            .nth(24)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        f.write_str(&self.0[..end])
    }
}

/// One cached value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub origin: ContentOrigin,
}

impl CacheEntry {
    /// `None` when the expiry is past the representable range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.ttl_secs).ok()?;
        let ttl = chrono::Duration::try_seconds(secs)?;
        self.created_at.checked_add_signed(ttl)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }
}

/// A value read from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedText {
    pub value: String,
    pub origin: ContentOrigin,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cache tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Quiet period after a write before the snapshot is flushed.
    pub flush_debounce: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            flush_debounce: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<CacheEntry>,
}

struct Slot {
    entry: CacheEntry,
    seq: u64,
}

#[derive(Default)]
struct Index {
    slots: HashMap<CacheKey, Slot>,
    /// Write sequence -> key, oldest first.
    order: BTreeMap<u64, CacheKey>,
    next_seq: u64,
    dirty: bool,
}

impl Index {
    fn insert(&mut self, entry: CacheEntry) {
        if let Some(old) = self.slots.remove(&entry.key) {
            self.order.remove(&old.seq);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, entry.key.clone());
        self.slots.insert(entry.key.clone(), Slot { entry, seq });
        self.dirty = true;
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.seq);
        self.dirty = true;
        Some(slot.entry)
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<CacheKey> = self
            .slots
            .values()
            .filter(|slot| slot.entry.is_expired(now))
            .map(|slot| slot.entry.key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Bring the index back under `cap`. Returns the number of live evictions.
    fn enforce_cap(&mut self, cap: usize, now: DateTime<Utc>) -> u64 {
        if self.slots.len() <= cap {
            return 0;
        }
        self.purge_expired(now);

        let mut evicted = 0;
        while self.slots.len() > cap {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            self.slots.remove(&key);
            self.dirty = true;
            evicted += 1;
        }
        evicted
    }

    fn entries_in_write_order(&self) -> Vec<CacheEntry> {
        self.order
            .values()
            .filter_map(|key| self.slots.get(key))
            .map(|slot| slot.entry.clone())
            .collect()
    }
}

struct Shared {
    index: RwLock<Index>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    path: Option<PathBuf>,
    wake: Arc<Notify>,
    flush_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Shared {
    async fn write_snapshot(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.flush_lock.lock().await;

        let now = self.clock.now();
        let entries = {
            let mut index = self.index.write().await;
            if !index.dirty {
                return Ok(());
            }
            index.dirty = false;
            index
                .entries_in_write_order()
                .into_iter()
                .filter(|e| !e.is_expired(now))
                .collect::<Vec<_>>()
        };
        let count = entries.len();

        let result = write_atomically(
            path,
            &Snapshot {
                version: SNAPSHOT_VERSION,
                entries,
            },
        )
        .await;

        match result {
            Ok(()) => {
                debug!(entries = count, path = %path.display(), "cache snapshot written");
                Ok(())
            }
            Err(e) => {
                self.index.write().await.dirty = true;
                Err(e)
            }
        }
    }
}

async fn write_atomically(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::persistence(format!("create {}: {e}", parent.display())))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| Error::persistence(format!("write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::persistence(format!("rename to {}: {e}", path.display())))?;
    Ok(())
}

/// Snapshot entries, or nothing if the file is missing, unreadable or corrupt.
async fn load_snapshot(path: &Path) -> Vec<CacheEntry> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache snapshot unreadable, starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_slice::<Snapshot>(&bytes) {
        Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => snapshot.entries,
        Ok(snapshot) => {
            warn!(
                path = %path.display(),
                version = snapshot.version,
                "unsupported cache snapshot version, starting empty"
            );
            Vec::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache snapshot corrupt, starting empty");
            Vec::new()
        }
    }
}

async fn flush_loop(shared: Weak<Shared>, wake: Arc<Notify>, debounce: Duration) {
    loop {
        wake.notified().await;
        // Coalesce bursts of writes into one flush.
        tokio::time::sleep(debounce).await;

        let Some(shared) = shared.upgrade() else {
            break;
        };
        if let Err(e) = shared.write_snapshot().await {
            warn!(error = %e, "cache flush failed");
        }
    }
}

/// Response cache shared by all feature calls.
pub struct ResponseCache {
    shared: Arc<Shared>,
    flusher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ResponseCache {
    /// In-memory cache with no persistence.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::build(None, config, Arc::new(SystemClock), Index::default())
    }

    pub fn in_memory_with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(None, config, clock, Index::default())
    }

    /// Load the snapshot at `path` and start the background flush task.
    ///
    /// A missing, unreadable or corrupt snapshot yields an empty cache.
    /// Must be called inside a tokio runtime.
    pub async fn open(path: impl Into<PathBuf>, config: CacheConfig) -> Self {
        Self::open_with_clock(path, config, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        path: impl Into<PathBuf>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let path = path.into();
        let now = clock.now();

        let mut index = Index::default();
        for entry in load_snapshot(&path).await {
            if !entry.is_expired(now) {
                index.insert(entry);
            }
        }
        index.enforce_cap(config.max_entries, now);
        index.dirty = false;

        info!(
            path = %path.display(),
            entries = index.slots.len(),
            "response cache opened"
        );

        let cache = Self::build(Some(path), config, clock, index);
        cache.start_flusher();
        cache
    }

    fn build(path: Option<PathBuf>, config: CacheConfig, clock: Arc<dyn Clock>, index: Index) -> Self {
        Self {
            shared: Arc::new(Shared {
                index: RwLock::new(index),
                clock,
                config,
                path,
                wake: Arc::new(Notify::new()),
                flush_lock: Mutex::new(()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
            flusher: std::sync::Mutex::new(None),
        }
    }

    fn start_flusher(&self) {
        let handle = tokio::spawn(flush_loop(
            Arc::downgrade(&self.shared),
            self.shared.wake.clone(),
            self.shared.config.flush_debounce,
        ));
        *self.flusher_slot() = Some(handle);
    }

    fn flusher_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.flusher.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn schedule_flush(&self) {
        if self.shared.path.is_some() {
            self.shared.wake.notify_one();
        }
    }

    /// Path of the persisted snapshot, if any.
    pub fn path(&self) -> Option<&Path> {
        self.shared.path.as_deref()
    }

    /// Live value for `key`. Expired entries are never returned.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedText> {
        let now = self.shared.clock.now();
        let index = self.shared.index.read().await;
        let hit = index
            .slots
            .get(key)
            .filter(|slot| !slot.entry.is_expired(now))
            .map(|slot| CachedText {
                value: slot.entry.value.clone(),
                origin: slot.entry.origin,
            });

        match &hit {
            Some(_) => self.shared.hits.fetch_add(1, Ordering::Relaxed),
            None => self.shared.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    /// Store `value` under `key` for `ttl` (whole seconds).
    pub async fn put(
        &self,
        key: CacheKey,
        value: impl Into<String>,
        ttl: Duration,
        origin: ContentOrigin,
    ) {
        let now = self.shared.clock.now();
        let entry = CacheEntry {
            key,
            value: value.into(),
            created_at: now,
            ttl_secs: ttl.as_secs(),
            origin,
        };
        debug!(key = %entry.key, ttl_secs = entry.ttl_secs, origin = ?origin, "cache put");

        let evicted = {
            let mut index = self.shared.index.write().await;
            index.insert(entry);
            index.enforce_cap(self.shared.config.max_entries, now)
        };
        if evicted > 0 {
            self.shared.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!(evicted, "cache over capacity");
        }
        self.schedule_flush();
    }

    /// Drop one entry.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.shared.index.write().await.remove(key).is_some();
        if removed {
            self.schedule_flush();
        }
        removed
    }

    /// Purge expired entries. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let now = self.shared.clock.now();
        let removed = self.shared.index.write().await.purge_expired(now);
        if removed > 0 {
            self.schedule_flush();
        }
        removed
    }

    pub async fn clear(&self) {
        {
            let mut index = self.shared.index.write().await;
            index.slots.clear();
            index.order.clear();
            index.dirty = true;
        }
        self.schedule_flush();
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.shared.index.read().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.shared.hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
            evictions: self.shared.evictions.load(Ordering::Relaxed),
            entries: self.len().await,
        }
    }

    /// Write the snapshot now if anything changed since the last flush.
    pub async fn flush(&self) -> Result<()> {
        self.shared.write_snapshot().await
    }

    /// Stop the background task and flush pending writes.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.flusher_slot().take() {
            handle.abort();
        }
        self.flush().await
    }
}

impl Drop for ResponseCache {
    fn drop(&mut self) {
        if let Some(handle) = self.flusher_slot().take() {
            handle.abort();
        }
    }
}
