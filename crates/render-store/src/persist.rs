//! Cache persistence: index records plus their blob bodies.
//!
//! `CacheStore` pairs an [`IndexStore`] with a [`BlobStore`] and is the only
//! storage surface the render cache talks to. Loading verifies every record
//! against its blob; anything unreadable is reported as corrupt and removed
//! so the caller can treat it as a miss.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::blob::BlobStore;
use crate::digest::ContentDigest;
use crate::error::{StoreError, StoreResult};
use crate::index::{IndexRecord, IndexStore};

/// A record whose body has been read and verified.
#[derive(Debug, Clone)]
pub struct RestoredEntry {
    pub record: IndexRecord,
    pub body: Vec<u8>,
}

/// Outcome of [`CacheStore::load`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub entries: Vec<RestoredEntry>,
    /// Keys of records that were unreadable and have been removed.
    pub corrupt: Vec<String>,
}

/// Summary of a blob sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub blobs_scanned: usize,
    pub blobs_deleted: usize,
}

/// Index + blob persistence for cache entries.
#[derive(Clone)]
pub struct CacheStore {
    index: Arc<dyn IndexStore>,
    blobs: Arc<dyn BlobStore>,
}

impl CacheStore {
    pub fn new(index: Arc<dyn IndexStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { index, blobs }
    }

    /// Filesystem-backed store rooted at `root` (`root/index`, `root/objects`).
    pub fn open_dir(root: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let root = root.as_ref();
        Ok(Self::new(
            Arc::new(crate::index::FsIndexStore::new(root)?),
            Arc::new(crate::blob::FsBlobStore::new(root)?),
        ))
    }

    /// Write the body, then the record pointing at it.
    ///
    /// The body digest in `record` is overwritten with the digest of `body`.
    pub fn save(&self, mut record: IndexRecord, body: &[u8]) -> StoreResult<IndexRecord> {
        record.body = self.blobs.put(body)?;
        self.index.save(&record)?;
        debug!(key = %record.key, body = %record.body.short(), "cache record saved");
        Ok(record)
    }

    /// Update an existing record's metadata without touching the body.
    pub fn touch(&self, record: &IndexRecord) -> StoreResult<()> {
        self.index.save(record)
    }

    /// Remove a record. Bodies are left for [`sweep_unreferenced`](Self::sweep_unreferenced)
    /// since several records may share one blob.
    pub fn remove(&self, key: &str) -> StoreResult<()> {
        self.index.remove(key)
    }

    /// Load and verify every record.
    pub fn load(&self) -> StoreResult<LoadReport> {
        let mut report = LoadReport::default();

        for loaded in self.index.load_all()? {
            let record = match loaded {
                Ok(record) => record,
                Err(StoreError::CorruptRecord { key, reason }) => {
                    warn!(key = %key, reason = %reason, "dropping undecodable cache record");
                    self.remove_quietly(&key);
                    report.corrupt.push(key);
                    continue;
                }
                Err(other) => return Err(other),
            };

            match self.blobs.get(&record.body) {
                Ok(body) => report.entries.push(RestoredEntry { record, body }),
                Err(e @ (StoreError::NotFound { .. } | StoreError::DigestMismatch { .. })) => {
                    warn!(key = %record.key, error = %e, "dropping cache record with unreadable body");
                    self.remove_quietly(&record.key);
                    report.corrupt.push(record.key);
                }
                Err(other) => return Err(other),
            }
        }

        Ok(report)
    }

    /// Delete blobs no record references.
    pub fn sweep_unreferenced(&self) -> StoreResult<SweepReport> {
        let referenced: HashSet<ContentDigest> = self
            .index
            .load_all()?
            .into_iter()
            .filter_map(Result::ok)
            .map(|r| r.body)
            .collect();

        let mut report = SweepReport::default();
        for digest in self.blobs.list()? {
            report.blobs_scanned += 1;
            if !referenced.contains(&digest) {
                self.blobs.delete(&digest)?;
                report.blobs_deleted += 1;
            }
        }
        Ok(report)
    }

    fn remove_quietly(&self, key: &str) {
        if let Err(e) = self.index.remove(key) {
            warn!(key = %key, error = %e, "failed to remove corrupt cache record");
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryBlobStore, MemoryIndexStore};
    use chrono::Utc;

    fn record(key: &str) -> IndexRecord {
        let now = Utc::now();
        IndexRecord {
            key: key.to_string(),
            body: ContentDigest::from_bytes(b""),
            meta: serde_json::json!({}),
            created_at: now,
            last_accessed_at: now,
            size_bytes: 0,
        }
    }

    fn memory_store() -> (Arc<MemoryIndexStore>, Arc<MemoryBlobStore>, CacheStore) {
        let index = Arc::new(MemoryIndexStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = CacheStore::new(index.clone(), blobs.clone());
        (index, blobs, store)
    }

    #[test]
    fn save_sets_body_digest() {
        let (_index, _blobs, store) = memory_store();
        let saved = store.save(record("aa"), b"figure json").unwrap();
        assert_eq!(saved.body, ContentDigest::from_bytes(b"figure json"));

        let report = store.load().unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].body, b"figure json");
        assert!(report.corrupt.is_empty());
    }

    #[test]
    fn missing_blob_is_corrupt_and_removed() {
        let (index, blobs, store) = memory_store();
        let saved = store.save(record("bb"), b"video").unwrap();
        blobs.delete(&saved.body).unwrap();

        let report = store.load().unwrap();
        assert!(report.entries.is_empty());
        assert_eq!(report.corrupt, vec!["bb".to_string()]);
        assert!(index.load_all().unwrap().is_empty());
    }

    #[test]
    fn undecodable_record_is_corrupt_and_removed() {
        let (index, _blobs, store) = memory_store();
        index.insert_raw("cc", "{{{");

        let report = store.load().unwrap();
        assert_eq!(report.corrupt, vec!["cc".to_string()]);
        assert!(index.load_all().unwrap().is_empty());
    }

    #[test]
    fn sweep_keeps_shared_blob_until_last_reference_goes() {
        let (_index, blobs, store) = memory_store();
        store.save(record("d1"), b"same bytes").unwrap();
        store.save(record("d2"), b"same bytes").unwrap();
        store.save(record("d3"), b"other").unwrap();

        store.remove("d1").unwrap();
        store.remove("d3").unwrap();
        let swept = store.sweep_unreferenced().unwrap();
        assert_eq!(swept.blobs_scanned, 2);
        assert_eq!(swept.blobs_deleted, 1);
        assert!(blobs
            .contains(&ContentDigest::from_bytes(b"same bytes"))
            .unwrap());
    }

    #[test]
    fn open_dir_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open_dir(dir.path()).unwrap();
        store.save(record("ee"), b"persisted").unwrap();

        let reopened = CacheStore::open_dir(dir.path()).unwrap();
        let report = reopened.load().unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].record.key, "ee");
    }
}
