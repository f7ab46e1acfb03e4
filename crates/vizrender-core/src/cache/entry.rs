use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::artifact::Outcome;
use crate::fingerprint::Fingerprint;

/// One cached result.
///
/// The outcome is shared and never mutated; only `last_accessed_at` moves.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub outcome: Arc<Outcome>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, outcome: Outcome, now: DateTime<Utc>) -> Self {
        let size_bytes = outcome.size_bytes();
        Self {
            fingerprint,
            outcome: Arc::new(outcome),
            created_at: now,
            last_accessed_at: now,
            size_bytes,
        }
    }

    /// A cached terminal failure.
    pub fn is_negative(&self) -> bool {
        !self.outcome.is_success()
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self
                .created_at
                .checked_add_signed(ttl)
                .is_some_and(|expires_at| now >= expires_at),
            Err(_) => false,
        }
    }
}
