//! Persistent cache index: one JSON record per cache key.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::digest::ContentDigest;
use crate::error::{StoreError, StoreResult};

/// One persisted cache entry.
///
/// The artifact body lives in a [`BlobStore`](crate::BlobStore) under `body`;
/// `meta` carries whatever the cache layer needs to rebuild the entry
/// (artifact kind, content type, failure record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub key: String,
    pub body: ContentDigest,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Result of reading one stored record: either the record or the key of a
/// record that could not be decoded.
pub type LoadedRecord = std::result::Result<IndexRecord, StoreError>;

/// Key → record persistence.
pub trait IndexStore: Send + Sync {
    /// Read every stored record. Undecodable records are returned as
    /// `Err(StoreError::CorruptRecord)` rather than failing the whole load.
    fn load_all(&self) -> StoreResult<Vec<LoadedRecord>>;

    /// Insert or replace the record for `record.key`.
    fn save(&self, record: &IndexRecord) -> StoreResult<()>;

    /// Remove the record for `key`. No-op if absent.
    fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Keys become file names, so only hex is accepted.
pub(crate) fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.len() > 128 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(StoreError::InvalidDigest {
            digest: key.to_string(),
        });
    }
    Ok(())
}

/// Filesystem index: `<root>/index/<key>.json`.
#[derive(Debug)]
pub struct FsIndexStore {
    index_dir: PathBuf,
}

impl FsIndexStore {
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let index_dir = root.as_ref().join("index");
        fs::create_dir_all(&index_dir)?;
        Ok(Self { index_dir })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.index_dir.join(format!("{key}.json"))
    }
}

impl IndexStore for FsIndexStore {
    fn load_all(&self) -> StoreResult<Vec<LoadedRecord>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.index_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            let loaded = fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|bytes| decode_record(&key, &bytes));
            out.push(loaded);
        }
        Ok(out)
    }

    fn save(&self, record: &IndexRecord) -> StoreResult<()> {
        validate_key(&record.key)?;
        let bytes = serde_json::to_vec(record)?;
        let mut tmp = NamedTempFile::new_in(&self.index_dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(self.record_path(&record.key))
            .map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// Decode a stored record, checking the embedded key matches its location.
pub(crate) fn decode_record(key: &str, bytes: &[u8]) -> LoadedRecord {
    let record: IndexRecord =
        serde_json::from_slice(bytes).map_err(|e| StoreError::CorruptRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
    if record.key != key {
        return Err(StoreError::CorruptRecord {
            key: key.to_string(),
            reason: format!("record claims key {}", record.key),
        });
    }
    Ok(record)
}
