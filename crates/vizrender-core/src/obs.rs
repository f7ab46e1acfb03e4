//! Structured observability hooks for render requests and the cache.
//!
//! - `render_span`: span tagging every log of one request with its
//!   fingerprint and kind
//! - one emit function per dispatcher state transition
//! - cache maintenance events
//!
//! Every event carries an `event = "<domain>.<verb>"` field.

use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::fingerprint::Fingerprint;
use crate::spec::VizKind;

/// Request-scoped span, attached to the request future with
/// [`tracing::Instrument`].
///
/// ```ignore
/// async { /* ... */ }.instrument(render_span(&fingerprint, VizKind::Plotly)).await
/// ```
pub fn render_span(fingerprint: &Fingerprint, kind: VizKind) -> tracing::Span {
    tracing::info_span!(
        "vizrender.render",
        fingerprint = %fingerprint.short(),
        kind = %kind,
    )
}

pub fn emit_submitted(kind: VizKind) {
    debug!(event = "render.submitted", kind = %kind);
}

/// Emit event: fingerprint computed, cache lookup starting.
pub fn emit_fingerprint_computed(fingerprint: &Fingerprint) {
    debug!(event = "render.fingerprint_computed", fingerprint = %fingerprint);
}

pub fn emit_cache_hit(fingerprint: &Fingerprint, negative: bool) {
    info!(event = "render.cache_hit", fingerprint = %fingerprint.short(), negative = negative);
}

pub fn emit_cache_miss(fingerprint: &Fingerprint) {
    debug!(event = "render.cache_miss", fingerprint = %fingerprint.short());
}

pub fn emit_building(fingerprint: &Fingerprint, attempt: u32) {
    debug!(event = "render.building", fingerprint = %fingerprint.short(), attempt = attempt);
}

/// Emit event: transient failure, another attempt follows after `delay_ms`.
pub fn emit_retrying(fingerprint: &Fingerprint, attempt: u32, error_kind: ErrorKind, delay_ms: u64) {
    warn!(
        event = "render.retrying",
        fingerprint = %fingerprint.short(),
        attempt = attempt,
        error_kind = %error_kind,
        delay_ms = delay_ms,
    );
}

pub fn emit_succeeded(fingerprint: &Fingerprint, attempts: u32, duration_ms: u64, size_bytes: u64) {
    info!(
        event = "render.succeeded",
        fingerprint = %fingerprint.short(),
        attempts = attempts,
        duration_ms = duration_ms,
        size_bytes = size_bytes,
    );
}

/// Emit event: the request ended in a failure the caller will see.
pub fn emit_failed_terminal(
    fingerprint: Option<&Fingerprint>,
    error_kind: ErrorKind,
    attempts: u32,
    message: &str,
) {
    warn!(
        event = "render.failed_terminal",
        fingerprint = fingerprint.map(Fingerprint::short).unwrap_or("-"),
        error_kind = %error_kind,
        attempts = attempts,
        message = %message,
    );
}

pub fn emit_cache_evicted(fingerprint: &Fingerprint, size_bytes: u64, reason: &str) {
    info!(
        event = "cache.evicted",
        fingerprint = %fingerprint.short(),
        size_bytes = size_bytes,
        reason = reason,
    );
}

/// Emit event: a persisted entry could not be read back and was dropped.
pub fn emit_cache_corrupt_entry(key: &str, reason: &dyn std::fmt::Display) {
    warn!(
        event = "cache.corrupt_entry",
        key = %key,
        error_kind = %ErrorKind::CacheCorruption,
        reason = %reason,
    );
}

pub fn emit_cache_persist_error(fingerprint: &Fingerprint, error: &dyn std::fmt::Display) {
    warn!(event = "cache.persist_error", fingerprint = %fingerprint.short(), error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_span_create() {
        let fp = Fingerprint::from_hex(&"ab".repeat(32)).unwrap();
        let _entered = render_span(&fp, VizKind::Manim).entered();
        emit_building(&fp, 1);
        emit_failed_terminal(None, ErrorKind::InvalidSpec, 0, "kind mismatch");
    }
}
