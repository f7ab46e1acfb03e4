//! Request orchestration.
//!
//! `submit` walks one request through
//! `Submitted -> FingerprintComputed -> CacheLookup -> {CacheHit | CacheMiss
//! -> Building -> {Succeeded | Retrying -> Building | FailedTerminal}}`.
//! Building runs inside the cache's single-flight slot, so concurrent
//! requests for one fingerprint share one retry loop.
//!
//! Only transient failures are retried. Terminal failures are cached as
//! negative entries, except infrastructure failures which are returned
//! without being cached.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{instrument, Instrument};

use crate::artifact::{Artifact, FailureRecord, Outcome};
use crate::cache::{CacheEntry, RenderCache, Resolution};
use crate::config::{PipelineConfig, RetryPolicy};
use crate::error::{ErrorKind, RenderError};
use crate::fingerprint::{fingerprint_with, Fingerprint, RendererTags};
use crate::obs;
use crate::render::{RenderContext, RendererSet};
use crate::sandbox::{CircuitBreaker, SandboxFactory};
use crate::spec::VisualizationSpec;

/// What a caller gets back from [`Dispatcher::submit`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenderResult {
    /// Served from the cache.
    Hit {
        fingerprint: Fingerprint,
        artifact: Artifact,
    },
    /// Rendered for this request (or for a concurrent one it joined).
    Built {
        fingerprint: Fingerprint,
        artifact: Artifact,
    },
    Failed {
        /// Absent when validation failed before fingerprinting.
        fingerprint: Option<Fingerprint>,
        error_kind: ErrorKind,
        message: String,
        /// Artifact that displays the error, e.g. a plotly error figure.
        fallback_artifact: Option<Artifact>,
        /// Answered from a negative cache entry.
        cached: bool,
    },
}

impl RenderResult {
    pub fn status(&self) -> &'static str {
        match self {
            RenderResult::Hit { .. } => "hit",
            RenderResult::Built { .. } => "built",
            RenderResult::Failed { .. } => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, RenderResult::Failed { .. })
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            RenderResult::Hit { artifact, .. } | RenderResult::Built { artifact, .. } => {
                Some(artifact)
            }
            RenderResult::Failed { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            RenderResult::Failed { error_kind, .. } => Some(*error_kind),
            _ => None,
        }
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            RenderResult::Hit { fingerprint, .. } | RenderResult::Built { fingerprint, .. } => {
                Some(fingerprint)
            }
            RenderResult::Failed { fingerprint, .. } => fingerprint.as_ref(),
        }
    }

    fn from_entry(entry: &CacheEntry, hit: bool) -> Self {
        let fingerprint = entry.fingerprint.clone();
        match entry.outcome.as_ref() {
            Outcome::Success { artifact } if hit => RenderResult::Hit {
                fingerprint,
                artifact: artifact.clone(),
            },
            Outcome::Success { artifact } => RenderResult::Built {
                fingerprint,
                artifact: artifact.clone(),
            },
            Outcome::Failure { failure } => {
                Self::from_failure(Some(fingerprint), failure.clone(), hit)
            }
        }
    }

    fn from_failure(fingerprint: Option<Fingerprint>, failure: FailureRecord, cached: bool) -> Self {
        RenderResult::Failed {
            fingerprint,
            error_kind: failure.kind,
            message: failure.message,
            fallback_artifact: failure.fallback,
            cached,
        }
    }
}

/// Routes specs to renderers through the cache.
///
/// Cheap to clone; clones share the cache and the circuit breaker.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Pipeline>,
}

struct Pipeline {
    renderers: RendererSet,
    sandboxes: Arc<dyn SandboxFactory>,
    cache: RenderCache,
    retry: RetryPolicy,
    tags: RendererTags,
    /// Guards the sandbox infrastructure; only sandboxed renderers consult it.
    breaker: CircuitBreaker,
}

impl Dispatcher {
    pub fn new(
        config: &PipelineConfig,
        sandboxes: Arc<dyn SandboxFactory>,
        cache: RenderCache,
    ) -> Self {
        Self::with_renderers(config, RendererSet::new(config), sandboxes, cache)
    }

    pub fn with_renderers(
        config: &PipelineConfig,
        renderers: RendererSet,
        sandboxes: Arc<dyn SandboxFactory>,
        cache: RenderCache,
    ) -> Self {
        let retry = config.retry.clone();
        let breaker = CircuitBreaker::new(retry.breaker_threshold, retry.breaker_cooldown());
        Self {
            inner: Arc::new(Pipeline {
                renderers,
                sandboxes,
                cache,
                retry,
                tags: RendererTags::from_config(config),
                breaker,
            }),
        }
    }

    pub fn cache(&self) -> &RenderCache {
        &self.inner.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    /// The cache key `submit` would use for `spec`.
    pub fn fingerprint(&self, spec: &VisualizationSpec) -> Fingerprint {
        fingerprint_with(spec, &self.inner.tags)
    }

    /// Render `spec`, or answer from the cache.
    ///
    /// Never panics and never returns a raw sandbox error: every failure is
    /// a [`RenderResult::Failed`] with a sanitized message.
    #[instrument(skip_all, fields(kind = %spec.kind))]
    pub async fn submit(&self, spec: &VisualizationSpec) -> RenderResult {
        obs::emit_submitted(spec.kind);

        if let Err(e) = spec.validate() {
            let err = RenderError::InvalidSpec(e.to_string());
            let message = err.public_message();
            obs::emit_failed_terminal(None, ErrorKind::InvalidSpec, 0, &message);
            return RenderResult::from_failure(
                None,
                FailureRecord {
                    kind: ErrorKind::InvalidSpec,
                    message,
                    fallback: None,
                },
                false,
            );
        }

        let key = fingerprint_with(spec, &self.inner.tags);
        obs::emit_fingerprint_computed(&key);
        let span = obs::render_span(&key, spec.kind);

        let pipeline = Arc::clone(&self.inner);
        let spec = Arc::new(spec.clone());
        let build_key = key.clone();
        let build_span = span.clone();
        let build = move || {
            async move { pipeline.build(&build_key, &spec).await }.instrument(build_span)
        };

        async {
            match self.inner.cache.get_or_build(&key, build).await {
                Resolution::Hit(entry) => {
                    obs::emit_cache_hit(&key, entry.is_negative());
                    RenderResult::from_entry(&entry, true)
                }
                Resolution::Built(entry) => RenderResult::from_entry(&entry, false),
                Resolution::Uncached(failure) => {
                    RenderResult::from_failure(Some(key.clone()), failure, false)
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl Pipeline {
    /// The `Building`/`Retrying` loop.
    ///
    /// `Ok` outcomes go into the cache (including terminal failures);
    /// `Err` is an infrastructure failure that must not be cached.
    async fn build(
        &self,
        key: &Fingerprint,
        spec: &VisualizationSpec,
    ) -> Result<Outcome, FailureRecord> {
        obs::emit_cache_miss(key);
        let renderer = self.renderers.for_kind(spec.kind);
        let sandboxed = renderer.uses_sandbox();
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            if sandboxed && !self.breaker.try_acquire() {
                let err = RenderError::from(self.breaker.open_error());
                return Err(self.terminal(key, &err, attempt - 1));
            }

            obs::emit_building(key, attempt);
            let ctx = RenderContext {
                sandboxes: Arc::clone(&self.sandboxes),
                attempt,
            };

            let err = match renderer.render(spec, &ctx).await {
                Ok(artifact) => {
                    if sandboxed {
                        self.breaker.record_success();
                    }
                    obs::emit_succeeded(
                        key,
                        attempt,
                        started.elapsed().as_millis() as u64,
                        artifact.size_bytes(),
                    );
                    return Ok(Outcome::Success { artifact });
                }
                Err(err) => err,
            };

            let kind = err.kind();
            if sandboxed {
                // Timeouts and faults mean the infrastructure answered.
                if kind == ErrorKind::RemoteUnavailable {
                    self.breaker.record_failure();
                } else {
                    self.breaker.record_success();
                }
            }

            if attempt < self.retry.max_attempts_for(kind) {
                let delay = self.retry.backoff(attempt);
                obs::emit_retrying(key, attempt, kind, delay.as_millis() as u64);
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let failure = self.terminal(key, &err, attempt);
            return if kind == ErrorKind::RemoteUnavailable {
                Err(failure)
            } else {
                Ok(Outcome::Failure { failure })
            };
        }
    }

    fn terminal(&self, key: &Fingerprint, err: &RenderError, attempts: u32) -> FailureRecord {
        let message = err.public_message();
        obs::emit_failed_terminal(Some(key), err.kind(), attempts, &message);
        FailureRecord {
            kind: err.kind(),
            message,
            fallback: err.fallback().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::SystemClock;
    use crate::config::CacheConfig;
    use crate::sandbox::fakes::{ScriptedFactory, Step};

    fn dispatcher(steps: Vec<Step>) -> (Dispatcher, Arc<ScriptedFactory>) {
        let factory = Arc::new(ScriptedFactory::new(steps));
        let cache = RenderCache::new(CacheConfig::default(), Arc::new(SystemClock));
        let d = Dispatcher::new(&PipelineConfig::default(), factory.clone(), cache);
        (d, factory)
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_invalid_and_uncached() {
        let (d, _) = dispatcher(vec![]);
        // Deserialized without validation so the mismatch reaches submit.
        let spec: VisualizationSpec = serde_json::from_str(
            r#"{"kind": "manim", "payload": {"kind": "plotly", "source": "function", "expr": "x"}}"#,
        )
        .unwrap();

        let result = d.submit(&spec).await;
        assert_eq!(result.status(), "failed");
        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidSpec));
        assert!(result.fingerprint().is_none());
        assert!(d.cache().is_empty());
    }

    #[tokio::test]
    async fn test_result_serializes_with_status_tag() {
        let (d, _) = dispatcher(vec![]);
        let spec = VisualizationSpec::from_json(
            r#"{"kind": "plotly", "payload": {"kind": "plotly", "source": "figure",
                "figure": {"data": [{"type": "bar", "y": [1, 2]}]}}}"#,
        )
        .unwrap();

        let json = serde_json::to_value(d.submit(&spec).await).unwrap();
        assert_eq!(json["status"], "built");
        assert_eq!(json["artifact"]["type"], "figure");
        assert_eq!(json["fingerprint"].as_str().unwrap().len(), 64);

        let json = serde_json::to_value(d.submit(&spec).await).unwrap();
        assert_eq!(json["status"], "hit");
    }

    #[tokio::test]
    async fn test_render_settings_change_the_key() {
        let spec = VisualizationSpec::from_json(
            r#"{"kind": "plotly", "payload": {"kind": "plotly", "source": "function", "expr": "x**2"}}"#,
        )
        .unwrap();
        let cache = RenderCache::new(CacheConfig::default(), Arc::new(SystemClock));
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let coarse = Dispatcher::new(&PipelineConfig::default(), factory.clone(), cache.clone());
        let mut config = PipelineConfig::default();
        config.plotly.samples_per_side = 20;
        let fine = Dispatcher::new(&config, factory, cache);

        let first = coarse.submit(&spec).await;
        assert_eq!(first.fingerprint(), Some(&coarse.fingerprint(&spec)));
        assert_ne!(coarse.fingerprint(&spec), fine.fingerprint(&spec));

        // Same cache, different settings: rebuilt rather than served stale.
        let second = fine.submit(&spec).await;
        assert_eq!(second.status(), "built");
        assert_eq!(fine.submit(&spec).await.status(), "hit");
        assert_eq!(coarse.submit(&spec).await.status(), "hit");
        assert_eq!(fine.cache().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_fails_fast_once_open() {
        let mut config = PipelineConfig::default();
        config.retry.breaker_threshold = 3;
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let cache = RenderCache::new(CacheConfig::default(), Arc::new(SystemClock));
        let d = Dispatcher::new(&config, factory.clone(), cache);

        // Three attempts, all unavailable: breaker opens.
        let spec = VisualizationSpec::from_json(
            r#"{"kind": "manim", "payload": {"kind": "manim", "scene_code": "self.wait(1)"}}"#,
        )
        .unwrap();
        let first = d.submit(&spec).await;
        assert_eq!(first.error_kind(), Some(ErrorKind::RemoteUnavailable));
        assert_eq!(factory.provisioned(), 3);
        assert!(d.breaker().is_open());

        let other = VisualizationSpec::from_json(
            r#"{"kind": "manim", "payload": {"kind": "manim", "scene_code": "self.wait(2)"}}"#,
        )
        .unwrap();
        let second = d.submit(&other).await;
        assert_eq!(second.error_kind(), Some(ErrorKind::RemoteUnavailable));
        assert_eq!(factory.provisioned(), 3, "no sandbox provisioned while open");
        assert!(d.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_admits_single_trial_after_cooldown() {
        let mut config = PipelineConfig::default();
        config.retry.breaker_threshold = 3;
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let cache = RenderCache::new(CacheConfig::default(), Arc::new(SystemClock));
        let d = Dispatcher::new(&config, factory.clone(), cache);

        let scene = |code: &str| {
            VisualizationSpec::from_json(&format!(
                r#"{{"kind": "manim", "payload": {{"kind": "manim", "scene_code": "{code}"}}}}"#
            ))
            .unwrap()
        };
        d.submit(&scene("self.wait(1)")).await;
        assert_eq!(factory.provisioned(), 3);

        tokio::time::advance(config.retry.breaker_cooldown() + Duration::from_secs(1)).await;
        let (s2, s3, s4) = (scene("self.wait(2)"), scene("self.wait(3)"), scene("self.wait(4)"));
        let (a, b, c) = tokio::join!(d.submit(&s2), d.submit(&s3), d.submit(&s4));
        for r in [a, b, c] {
            assert_eq!(r.error_kind(), Some(ErrorKind::RemoteUnavailable));
        }
        // One trial attempt; its failure re-opens the breaker for the rest.
        assert_eq!(factory.provisioned(), 4);
        assert!(d.breaker().is_open());
    }
}
