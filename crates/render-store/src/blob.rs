//! Content-addressed blob storage for artifact bodies.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::digest::ContentDigest;
use crate::error::{StoreError, StoreResult};

/// Content-addressed blob store.
///
/// Guarantees:
/// - `put(data)` always returns the SHA-256 digest of `data`.
/// - `get(digest)` returns the exact bytes previously stored, or
///   `StoreError::DigestMismatch` if the stored bytes were altered.
/// - Same content always yields the same digest (deduplication).
pub trait BlobStore: Send + Sync {
    /// Store bytes and return their content digest.
    fn put(&self, data: &[u8]) -> StoreResult<ContentDigest>;

    /// Retrieve bytes by digest. Returns `StoreError::NotFound` if absent.
    fn get(&self, digest: &ContentDigest) -> StoreResult<Vec<u8>>;

    /// Check whether a digest exists in the store.
    fn contains(&self, digest: &ContentDigest) -> StoreResult<bool>;

    /// Delete content by digest. No-op if absent.
    fn delete(&self, digest: &ContentDigest) -> StoreResult<()>;

    /// Every digest currently stored.
    fn list(&self) -> StoreResult<Vec<ContentDigest>>;
}

/// Filesystem-backed blob store with git-style 2-char sharding.
///
/// Layout: `<root>/objects/<first 2 hex chars>/<remaining hex chars>`
#[derive(Debug)]
pub struct FsBlobStore {
    objects_dir: PathBuf,
}

impl FsBlobStore {
    /// Create a new `FsBlobStore` rooted at `root`. Creates `root/objects/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let objects_dir = root.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        let hex = digest.as_str();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, data: &[u8]) -> StoreResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        let path = self.blob_path(&digest);

        if path.exists() {
            return Ok(digest);
        }

        let shard_dir = self.objects_dir.join(&digest.as_str()[..2]);
        fs::create_dir_all(&shard_dir)?;

        // Write to a temp file in the shard, then rename into place.
        let mut tmp = NamedTempFile::new_in(&shard_dir)?;
        tmp.write_all(data)?;
        tmp.persist(&path).map_err(|e| e.error)?;

        Ok(digest)
    }

    fn get(&self, digest: &ContentDigest) -> StoreResult<Vec<u8>> {
        let path = self.blob_path(digest);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    digest: digest.to_string(),
                }
            } else {
                StoreError::Io(e)
            }
        })?;

        let actual = ContentDigest::from_bytes(&bytes);
        if &actual != digest {
            return Err(StoreError::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(bytes)
    }

    fn contains(&self, digest: &ContentDigest) -> StoreResult<bool> {
        Ok(self.blob_path(digest).exists())
    }

    fn delete(&self, digest: &ContentDigest) -> StoreResult<()> {
        match fs::remove_file(self.blob_path(digest)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn list(&self) -> StoreResult<Vec<ContentDigest>> {
        let mut out = Vec::new();
        for shard in fs::read_dir(&self.objects_dir)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let prefix = shard.file_name().to_string_lossy().into_owned();
            for blob in fs::read_dir(shard.path())? {
                let name = blob?.file_name().to_string_lossy().into_owned();
                // Skip temp files left by an interrupted put.
                if let Ok(digest) = format!("{prefix}{name}").parse::<ContentDigest>() {
                    out.push(digest);
                }
            }
        }
        Ok(out)
    }
}
