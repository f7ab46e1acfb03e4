//! Fingerprint-keyed cache of render outcomes.
//!
//! [`RenderCache`] holds successes and terminal failures (negative entries,
//! shorter TTL) and guarantees at most one concurrent build per fingerprint:
//! the first caller of [`get_or_build`](RenderCache::get_or_build) spawns the
//! build, later callers wait on a `watch` channel for its result. A caller
//! that goes away does not cancel the build.
//!
//! With a [`CacheStore`] attached, every inserted outcome is written through
//! and the cache is reloaded from it on open.

mod clock;
mod entry;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use render_store::{
    CacheStore, ContentDigest, IndexRecord, RestoredEntry, StoreError, StoreResult, SweepReport,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::artifact::{FailureRecord, Outcome};
use crate::config::CacheConfig;
use crate::error::ErrorKind;
use crate::fingerprint::Fingerprint;
use crate::obs;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::CacheEntry;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// `put` with an outcome that differs from the one already stored.
    #[error("conflicting write for {fingerprint}: a different outcome is already cached")]
    ConflictingWrite { fingerprint: String },

    #[error("cache store error: {0}")]
    Store(#[from] StoreError),

    #[error("cache background task failed: {0}")]
    Background(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// How a [`get_or_build`](RenderCache::get_or_build) call was answered.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Served from a stored entry.
    Hit(CacheEntry),
    /// Produced by the build this call started or joined.
    Built(CacheEntry),
    /// The build failed in a way that is never cached.
    Uncached(FailureRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    Inserted,
    /// The same outcome was already cached.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that waited on another caller's build.
    pub joined: u64,
    pub builds: u64,
    pub evictions: u64,
    pub expired: u64,
    pub entries: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub expired: usize,
    pub blobs_deleted: usize,
}

type Shared = Result<CacheEntry, FailureRecord>;

struct Slot {
    entry: CacheEntry,
    /// Persisted form, when a store is attached and the write succeeded.
    record: Option<IndexRecord>,
}

struct Inflight {
    id: u64,
    rx: watch::Receiver<Option<Shared>>,
}

#[derive(Default)]
struct State {
    slots: HashMap<Fingerprint, Slot>,
    inflight: HashMap<Fingerprint, Inflight>,
    /// Entries whose access time changed since the last flush.
    dirty: HashSet<Fingerprint>,
    total_bytes: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
    builds: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

struct Inner {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    store: Option<CacheStore>,
    state: Mutex<State>,
    counters: Counters,
    next_build_id: AtomicU64,
}

/// Shared handle; clones refer to the same cache.
#[derive(Clone)]
pub struct RenderCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RenderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCache")
            .field("stats", &self.stats())
            .field("persistent", &self.inner.store.is_some())
            .finish()
    }
}

impl RenderCache {
    /// Memory-only cache.
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_parts(config, clock, None)
    }

    /// Cache persisted under `config.persist_dir`, or memory-only when unset.
    pub fn open(config: CacheConfig, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        match config.persist_dir.clone() {
            Some(dir) => {
                let store = CacheStore::open_dir(&dir)?;
                Self::with_store(config, clock, store)
            }
            None => Ok(Self::new(config, clock)),
        }
    }

    /// Cache backed by `store`, restored from its current contents.
    ///
    /// Records that cannot be decoded, or whose outcome cannot be rebuilt,
    /// are dropped from the store and reported as `cache.corrupt_entry`.
    /// Expired records are dropped silently.
    pub fn with_store(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        store: CacheStore,
    ) -> CacheResult<Self> {
        let report = store.load()?;
        for key in &report.corrupt {
            obs::emit_cache_corrupt_entry(key, &"unreadable index record or body");
        }

        let cache = Self::with_parts(config, clock, Some(store.clone()));
        let now = cache.inner.clock.now();
        let mut stale: Vec<String> = Vec::new();
        {
            let mut state = cache.lock();
            for RestoredEntry { record, body } in report.entries {
                let restored = Fingerprint::from_hex(&record.key)
                    .ok_or_else(|| "key is not a fingerprint".to_string())
                    .and_then(|fp| Outcome::from_parts(&record.meta, body).map(|o| (fp, o)));
                let (fingerprint, outcome) = match restored {
                    Ok(restored) => restored,
                    Err(reason) => {
                        obs::emit_cache_corrupt_entry(&record.key, &reason);
                        stale.push(record.key);
                        continue;
                    }
                };

                let entry = CacheEntry {
                    fingerprint: fingerprint.clone(),
                    size_bytes: outcome.size_bytes(),
                    outcome: Arc::new(outcome),
                    created_at: record.created_at,
                    last_accessed_at: record.last_accessed_at,
                };
                if entry.is_expired(now, cache.ttl_for(&entry)) {
                    stale.push(record.key);
                    continue;
                }
                cache.insert_locked(&mut state, entry, Some(record));
            }
            let evicted = cache.evict_locked(&mut state);
            stale.extend(evicted.iter().map(|fp| fp.as_str().to_string()));
            debug!(
                entries = state.slots.len(),
                total_bytes = state.total_bytes,
                dropped = stale.len(),
                "cache restored"
            );
        }

        remove_records(&store, &stale);
        Ok(cache)
    }

    fn with_parts(config: CacheConfig, clock: Arc<dyn Clock>, store: Option<CacheStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                store,
                state: Mutex::new(State::default()),
                counters: Counters::default(),
                next_build_id: AtomicU64::new(1),
            }),
        }
    }

    /// Fresh entry for `key`, refreshing its access time.
    ///
    /// Records of expired entries are removed from the store on a blocking
    /// task that this call does not wait for.
    pub fn get(&self, key: &Fingerprint) -> Option<CacheEntry> {
        let mut stale = Vec::new();
        let found = {
            let mut state = self.lock();
            self.lookup_locked(&mut state, key, &mut stale)
        };
        self.unpersist_detached(stale);

        let counter = match found {
            Some(_) => &self.inner.counters.hits,
            None => &self.inner.counters.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Return the cached entry for `key`, or run `build` once for all
    /// concurrent callers asking for the same key.
    ///
    /// `build` resolves to `Ok(outcome)` for anything that should be cached
    /// (successes and terminal failures alike) and `Err(failure)` for
    /// failures that must not be. It runs on its own task, so dropping this
    /// future leaves the build running for the other waiters. A panicking
    /// build yields an uncached `ExecutionFault`.
    pub async fn get_or_build<F, Fut>(&self, key: &Fingerprint, build: F) -> Resolution
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Outcome, FailureRecord>> + Send + 'static,
    {
        let mut stale = Vec::new();
        let (mut rx, started) = {
            let mut state = self.lock();
            // A fresh hit leaves nothing stale.
            if let Some(entry) = self.lookup_locked(&mut state, key, &mut stale) {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Resolution::Hit(entry);
            }

            match state.inflight.get(key) {
                Some(inflight) => {
                    self.inner.counters.joined.fetch_add(1, Ordering::Relaxed);
                    (inflight.rx.clone(), None)
                }
                None => {
                    self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                    self.inner.counters.builds.fetch_add(1, Ordering::Relaxed);
                    let id = self.inner.next_build_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    state.inflight.insert(
                        key.clone(),
                        Inflight {
                            id,
                            rx: rx.clone(),
                        },
                    );
                    (rx, Some((id, tx)))
                }
            }
        };
        // Before the build can write a new record for the same key.
        self.unpersist(stale).await;

        if let Some((id, tx)) = started {
            self.spawn_build(key.clone(), id, tx, build);
        }

        let shared = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        match shared {
            Some(Ok(entry)) => Resolution::Built(entry),
            Some(Err(failure)) => Resolution::Uncached(failure),
            None => Resolution::Uncached(FailureRecord {
                kind: ErrorKind::RemoteUnavailable,
                message: "render was abandoned before it finished".to_string(),
                fallback: None,
            }),
        }
    }

    fn spawn_build<F, Fut>(
        &self,
        key: Fingerprint,
        id: u64,
        tx: watch::Sender<Option<Shared>>,
        build: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Outcome, FailureRecord>> + Send + 'static,
    {
        let cache = self.clone();
        tokio::spawn(async move {
            // Clears the in-flight marker even if this task is cancelled.
            let guard = InflightGuard {
                cache: cache.clone(),
                key: key.clone(),
                id,
            };

            let built = AssertUnwindSafe(async move { build().await })
                .catch_unwind()
                .await;
            let shared = match built {
                Ok(Ok(outcome)) => Ok(cache.store_built(&key, id, outcome).await),
                Ok(Err(failure)) => Err(failure),
                Err(_) => {
                    error!(event = "cache.build_panicked", fingerprint = %key.short(), "render build panicked");
                    Err(FailureRecord {
                        kind: ErrorKind::ExecutionFault,
                        message: "internal render error".to_string(),
                        fallback: None,
                    })
                }
            };
            drop(guard);
            tx.send_replace(Some(shared));
        });
    }

    /// Persist and insert a finished build, then release its in-flight slot.
    async fn store_built(&self, key: &Fingerprint, id: u64, outcome: Outcome) -> CacheEntry {
        let entry = CacheEntry::new(key.clone(), outcome, self.inner.clock.now());
        let record = self.persist(&entry).await;

        let (entry, evicted) = {
            let mut state = self.lock();
            remove_inflight(&mut state, key, id);
            let entry = match state.slots.get(key) {
                Some(existing) if *existing.entry.outcome == *entry.outcome => {
                    existing.entry.clone()
                }
                Some(_) => {
                    warn!(
                        event = "cache.conflicting_write",
                        fingerprint = %key.short(),
                        "build result differs from an entry stored meanwhile; replacing"
                    );
                    self.insert_locked(&mut state, entry.clone(), record);
                    entry
                }
                None => {
                    self.insert_locked(&mut state, entry.clone(), record);
                    entry
                }
            };
            (entry, self.evict_locked(&mut state))
        };
        self.unpersist_fingerprints(&evicted).await;
        entry
    }

    /// Insert an outcome directly.
    ///
    /// Storing the outcome already cached for `key` is a no-op; storing a
    /// different one is [`CacheError::ConflictingWrite`].
    pub async fn put(&self, key: &Fingerprint, outcome: Outcome) -> CacheResult<PutResult> {
        let mut stale = Vec::new();
        let existing = {
            let mut state = self.lock();
            self.lookup_locked(&mut state, key, &mut stale)
        };
        self.unpersist(stale).await;
        if let Some(existing) = existing {
            return compare_existing(key, &existing, &outcome);
        }

        let entry = CacheEntry::new(key.clone(), outcome, self.inner.clock.now());
        let record = self.persist(&entry).await;

        let evicted = {
            let mut state = self.lock();
            if let Some(slot) = state.slots.get(key) {
                return compare_existing(key, &slot.entry, &entry.outcome);
            }
            self.insert_locked(&mut state, entry, record);
            self.evict_locked(&mut state)
        };
        self.unpersist_fingerprints(&evicted).await;
        Ok(PutResult::Inserted)
    }

    /// Write refreshed access times of persisted entries back to the store.
    /// Returns the number of records written.
    pub async fn flush(&self) -> CacheResult<usize> {
        let Some(store) = self.inner.store.clone() else {
            return Ok(0);
        };
        let records: Vec<IndexRecord> = {
            let mut state = self.lock();
            let dirty = std::mem::take(&mut state.dirty);
            dirty
                .iter()
                .filter_map(|fp| state.slots.get(fp)?.record.clone())
                .collect()
        };
        let written = records.len();

        tokio::task::spawn_blocking(move || records.iter().try_for_each(|r| store.touch(r)))
            .await
            .map_err(|e| CacheError::Background(e.to_string()))??;
        debug!(records = written, "cache access times flushed");
        Ok(written)
    }

    /// Drop every expired entry, then delete blobs no record references.
    pub async fn gc(&self) -> CacheResult<GcReport> {
        let now = self.inner.clock.now();
        let expired: Vec<Fingerprint> = {
            let mut state = self.lock();
            let keys: Vec<Fingerprint> = state
                .slots
                .iter()
                .filter(|(_, slot)| slot.entry.is_expired(now, self.ttl_for(&slot.entry)))
                .map(|(fp, _)| fp.clone())
                .collect();
            for fp in &keys {
                if let Some(slot) = remove_slot(&mut state, fp) {
                    obs::emit_cache_evicted(fp, slot.entry.size_bytes, "expired");
                }
            }
            keys
        };
        self.inner
            .counters
            .expired
            .fetch_add(expired.len() as u64, Ordering::Relaxed);

        let mut report = GcReport {
            expired: expired.len(),
            blobs_deleted: 0,
        };
        if let Some(store) = self.inner.store.clone() {
            let keys: Vec<String> = expired.iter().map(|fp| fp.as_str().to_string()).collect();
            let sweep = tokio::task::spawn_blocking(move || -> StoreResult<SweepReport> {
                for key in &keys {
                    store.remove(key)?;
                }
                store.sweep_unreferenced()
            })
            .await
            .map_err(|e| CacheError::Background(e.to_string()))??;
            report.blobs_deleted = sweep.blobs_deleted;
        }
        Ok(report)
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, total_bytes) = {
            let state = self.lock();
            (state.slots.len(), state.total_bytes)
        };
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            joined: c.joined.load(Ordering::Relaxed),
            builds: c.builds.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            entries,
            total_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a build for `key` is currently running.
    pub fn is_building(&self, key: &Fingerprint) -> bool {
        self.lock().inflight.contains_key(key)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ttl_for(&self, entry: &CacheEntry) -> Duration {
        if entry.is_negative() {
            self.inner.config.failure_ttl()
        } else {
            self.inner.config.success_ttl()
        }
    }

    /// Fresh entry for `key` with its access time bumped. An expired entry
    /// is removed and its key pushed onto `stale`.
    fn lookup_locked(
        &self,
        state: &mut State,
        key: &Fingerprint,
        stale: &mut Vec<String>,
    ) -> Option<CacheEntry> {
        let now = self.inner.clock.now();
        let expired = {
            let slot = state.slots.get(key)?;
            slot.entry.is_expired(now, self.ttl_for(&slot.entry))
        };
        if expired {
            if let Some(slot) = remove_slot(state, key) {
                obs::emit_cache_evicted(key, slot.entry.size_bytes, "expired");
            }
            self.inner.counters.expired.fetch_add(1, Ordering::Relaxed);
            stale.push(key.as_str().to_string());
            return None;
        }

        let slot = state.slots.get_mut(key)?;
        slot.entry.last_accessed_at = now;
        if let Some(record) = slot.record.as_mut() {
            record.last_accessed_at = now;
        }
        let entry = slot.entry.clone();
        state.dirty.insert(key.clone());
        Some(entry)
    }

    fn insert_locked(&self, state: &mut State, entry: CacheEntry, record: Option<IndexRecord>) {
        let key = entry.fingerprint.clone();
        remove_slot(state, &key);
        state.total_bytes += entry.size_bytes;
        state.slots.insert(key, Slot { entry, record });
    }

    /// Evict least-recently-accessed entries until the byte budget holds.
    /// Keys with a build in flight are skipped.
    fn evict_locked(&self, state: &mut State) -> Vec<Fingerprint> {
        let mut evicted = Vec::new();
        while state.total_bytes > self.inner.config.max_total_bytes {
            let victim = state
                .slots
                .iter()
                .filter(|(fp, _)| !state.inflight.contains_key(*fp))
                .min_by_key(|(_, slot)| slot.entry.last_accessed_at)
                .map(|(fp, _)| fp.clone());
            let Some(fp) = victim else {
                break;
            };
            if let Some(slot) = remove_slot(state, &fp) {
                obs::emit_cache_evicted(&fp, slot.entry.size_bytes, "size");
                self.inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
            evicted.push(fp);
        }
        evicted
    }

    /// Write an entry through to the store. Failures are logged and leave
    /// the entry memory-only.
    async fn persist(&self, entry: &CacheEntry) -> Option<IndexRecord> {
        let store = self.inner.store.clone()?;
        let (meta, body) = entry.outcome.to_parts();
        let record = IndexRecord {
            key: entry.fingerprint.as_str().to_string(),
            body: ContentDigest::from_bytes(&body),
            meta,
            created_at: entry.created_at,
            last_accessed_at: entry.last_accessed_at,
            size_bytes: entry.size_bytes,
        };

        match tokio::task::spawn_blocking(move || store.save(record, &body)).await {
            Ok(Ok(saved)) => Some(saved),
            Ok(Err(e)) => {
                obs::emit_cache_persist_error(&entry.fingerprint, &e);
                None
            }
            Err(e) => {
                obs::emit_cache_persist_error(&entry.fingerprint, &e);
                None
            }
        }
    }

    async fn unpersist_fingerprints(&self, keys: &[Fingerprint]) {
        let keys: Vec<String> = keys.iter().map(|fp| fp.as_str().to_string()).collect();
        self.unpersist(keys).await;
    }

    /// Remove index records on the blocking pool. Bodies stay until the
    /// next `gc`.
    async fn unpersist(&self, keys: Vec<String>) {
        let Some(store) = self.inner.store.clone() else {
            return;
        };
        if keys.is_empty() {
            return;
        }
        if let Err(e) = tokio::task::spawn_blocking(move || remove_records(&store, &keys)).await {
            warn!(error = %e, "cache record removal task failed");
        }
    }

    /// [`unpersist`](Self::unpersist) for synchronous callers. Falls back to
    /// removing inline outside a runtime.
    fn unpersist_detached(&self, keys: Vec<String>) {
        let Some(store) = self.inner.store.clone() else {
            return;
        };
        if keys.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_records(&store, &keys));
            }
            Err(_) => remove_records(&store, &keys),
        }
    }
}

fn remove_records(store: &CacheStore, keys: &[String]) {
    for key in keys {
        if let Err(e) = store.remove(key) {
            warn!(key = %key, error = %e, "failed to remove cache record");
        }
    }
}

fn remove_slot(state: &mut State, key: &Fingerprint) -> Option<Slot> {
    let slot = state.slots.remove(key)?;
    state.total_bytes = state.total_bytes.saturating_sub(slot.entry.size_bytes);
    state.dirty.remove(key);
    Some(slot)
}

fn remove_inflight(state: &mut State, key: &Fingerprint, id: u64) {
    if state.inflight.get(key).is_some_and(|i| i.id == id) {
        state.inflight.remove(key);
    }
}

fn compare_existing(
    key: &Fingerprint,
    existing: &CacheEntry,
    outcome: &Outcome,
) -> CacheResult<PutResult> {
    if *existing.outcome == *outcome {
        Ok(PutResult::Unchanged)
    } else {
        Err(CacheError::ConflictingWrite {
            fingerprint: key.to_string(),
        })
    }
}

struct InflightGuard {
    cache: RenderCache,
    key: Fingerprint,
    id: u64,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut state = self.cache.lock();
        remove_inflight(&mut state, &self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use serde_json::json;

    fn key(n: u8) -> Fingerprint {
        Fingerprint::from_hex(&format!("{n:02x}").repeat(32)).unwrap()
    }

    fn figure(n: u64) -> Outcome {
        Outcome::Success {
            artifact: Artifact::Figure {
                figure: json!({"data": [{"y": [n]}], "layout": {}}),
            },
        }
    }

    fn cache() -> RenderCache {
        RenderCache::new(CacheConfig::default(), Arc::new(SystemClock))
    }

    async fn built(n: u64) -> Result<Outcome, FailureRecord> {
        Ok(figure(n))
    }

    async fn explode() -> Result<Outcome, FailureRecord> {
        panic!("renderer bug")
    }

    #[tokio::test]
    async fn test_get_or_build_then_hit() {
        let cache = cache();
        let first = cache.get_or_build(&key(1), || built(1)).await;
        assert!(matches!(first, Resolution::Built(_)));

        let second = cache.get_or_build(&key(1), explode).await;
        let Resolution::Hit(entry) = second else {
            panic!("expected a hit, got {second:?}");
        };
        assert_eq!(*entry.outcome, figure(1));
        assert!(!cache.is_building(&key(1)));
    }

    #[tokio::test]
    async fn test_uncached_failure_is_not_stored() {
        let cache = cache();
        let failure = FailureRecord {
            kind: ErrorKind::RemoteUnavailable,
            message: "sandbox service unreachable".into(),
            fallback: None,
        };
        let f = failure.clone();
        let result = cache
            .get_or_build(&key(2), move || async move {
                Err::<Outcome, FailureRecord>(f)
            })
            .await;
        assert_eq!(result, Resolution::Uncached(failure));
        assert!(cache.get(&key(2)).is_none());
        assert!(!cache.is_building(&key(2)));
    }

    #[tokio::test]
    async fn test_panicking_build_is_uncached_fault() {
        let cache = cache();
        let result = cache.get_or_build(&key(3), explode).await;
        let Resolution::Uncached(failure) = result else {
            panic!("expected uncached failure");
        };
        assert_eq!(failure.kind, ErrorKind::ExecutionFault);
        assert!(!cache.is_building(&key(3)));

        let retry = cache.get_or_build(&key(3), || built(3)).await;
        assert!(matches!(retry, Resolution::Built(_)));
    }

    #[tokio::test]
    async fn test_put_idempotent_and_conflict() {
        let cache = cache();
        assert_eq!(cache.put(&key(4), figure(4)).await.unwrap(), PutResult::Inserted);
        assert_eq!(cache.put(&key(4), figure(4)).await.unwrap(), PutResult::Unchanged);
        assert!(matches!(
            cache.put(&key(4), figure(5)).await,
            Err(CacheError::ConflictingWrite { .. })
        ));
        assert_eq!(*cache.get(&key(4)).unwrap().outcome, figure(4));
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let cache = cache();
        assert!(cache.get(&key(6)).is_none());
        cache.put(&key(6), figure(6)).await.unwrap();
        assert!(cache.get(&key(6)).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, figure(6).size_bytes());
    }
}
