//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryBlobStore` and `MemoryIndexStore` that satisfy the trait
//! contracts without touching the filesystem.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::blob::BlobStore;
use crate::digest::ContentDigest;
use crate::error::{StoreError, StoreResult};
use crate::index::{decode_record, validate_key, IndexRecord, IndexStore, LoadedRecord};

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-memory blob store backed by a `HashMap<digest, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    store: Mutex<HashMap<ContentDigest, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, data: &[u8]) -> StoreResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        let mut store = self.store.lock().unwrap();
        store.insert(digest.clone(), data.to_vec());
        Ok(digest)
    }

    fn get(&self, digest: &ContentDigest) -> StoreResult<Vec<u8>> {
        let store = self.store.lock().unwrap();
        store
            .get(digest)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                digest: digest.to_string(),
            })
    }

    fn contains(&self, digest: &ContentDigest) -> StoreResult<bool> {
        Ok(self.store.lock().unwrap().contains_key(digest))
    }

    fn delete(&self, digest: &ContentDigest) -> StoreResult<()> {
        self.store.lock().unwrap().remove(digest);
        Ok(())
    }

    fn list(&self) -> StoreResult<Vec<ContentDigest>> {
        Ok(self.store.lock().unwrap().keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryIndexStore
// ---------------------------------------------------------------------------

/// In-memory index holding raw JSON text per key, so tests can plant
/// undecodable records with [`insert_raw`](Self::insert_raw).
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store arbitrary text under `key`, bypassing serialization.
    pub fn insert_raw(&self, key: &str, text: &str) {
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), text.to_string());
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndexStore for MemoryIndexStore {
    fn load_all(&self) -> StoreResult<Vec<LoadedRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .map(|(key, text)| decode_record(key, text.as_bytes()))
            .collect())
    }

    fn save(&self, record: &IndexRecord) -> StoreResult<()> {
        validate_key(&record.key)?;
        let text = serde_json::to_string(record)?;
        self.records
            .lock()
            .unwrap()
            .insert(record.key.clone(), text);
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.records.lock().unwrap().remove(key);
        Ok(())
    }
}
