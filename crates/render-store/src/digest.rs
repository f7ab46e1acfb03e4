//! SHA-256 content digests used as blob addresses.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Content digest (SHA-256 hex string).
///
/// The inner field is private so the string is always lowercase hex produced
/// by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StoreError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StoreError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::str::FromStr for ContentDigest {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ContentDigest::try_from(s.to_string())
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = ContentDigest::from_bytes(b"frame data");
        let b = ContentDigest::from_bytes(b"frame data");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn digest_differs_for_different_data() {
        assert_ne!(
            ContentDigest::from_bytes(b"a"),
            ContentDigest::from_bytes(b"b")
        );
    }

    #[test]
    fn parse_uppercase_normalizes() {
        let d = ContentDigest::from_bytes(b"x");
        let upper = d.as_str().to_ascii_uppercase();
        let parsed: ContentDigest = upper.parse().unwrap();
        assert_eq!(parsed, d);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!("abcd".parse::<ContentDigest>().is_err());
        assert!("zz".repeat(32).parse::<ContentDigest>().is_err());
    }

    #[test]
    fn serde_rejects_invalid_digest() {
        let res: Result<ContentDigest, _> = serde_json::from_str("\"nope\"");
        assert!(res.is_err());
    }

    #[test]
    fn short_is_prefix() {
        let d = ContentDigest::from_bytes(b"short");
        assert_eq!(d.short().len(), 12);
        assert!(d.as_str().starts_with(d.short()));
    }
}
