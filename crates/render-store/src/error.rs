//! Error types for render-store

use thiserror::Error;

/// Errors produced by the blob store and the cache index store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Blob not present in the store
    #[error("blob not found: {digest}")]
    NotFound { digest: String },

    /// Digest string is not 64 hex characters
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Stored bytes no longer hash to their address
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Index record could not be decoded
    #[error("corrupt index record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_mismatch_display() {
        let err = StoreError::DigestMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }

    #[test]
    fn test_corrupt_record_display() {
        let err = StoreError::CorruptRecord {
            key: "ff00".to_string(),
            reason: "eof".to_string(),
        };
        assert!(err.to_string().contains("corrupt index record ff00"));
    }
}
