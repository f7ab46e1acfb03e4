//! Execution controls: isolated single-use runs, backoff, circuit breaker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::error::{SandboxError, SandboxResult};
use super::job::{JobOutput, SandboxJob};
use super::SandboxFactory;

/// Provision a fresh sandbox, run `job` in it under the job's wall-clock
/// timeout and destroy it, whatever the outcome.
#[instrument(skip_all, fields(backend = factory.name(), timeout_ms = job.timeout.as_millis() as u64))]
pub async fn run_isolated(
    factory: &dyn SandboxFactory,
    job: &SandboxJob,
) -> SandboxResult<JobOutput> {
    if job.command.is_empty() {
        return Err(SandboxError::InvalidJob("empty command".into()));
    }

    let limit_ms = job.timeout.as_millis() as u64;
    let mut sandbox = match tokio::time::timeout(job.timeout, factory.provision(&job.limits)).await
    {
        Ok(provisioned) => provisioned?,
        Err(_) => {
            return Err(SandboxError::Unavailable(format!(
                "provisioning did not finish within {limit_ms}ms"
            )))
        }
    };

    let started = Instant::now();
    let result = match tokio::time::timeout(job.timeout, sandbox.execute(job)).await {
        Ok(r) => r,
        Err(_) => Err(SandboxError::Timeout { limit_ms }),
    };
    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        ok = result.is_ok(),
        "sandbox job finished"
    );

    if let Err(e) = sandbox.destroy().await {
        warn!(error = %e, "sandbox destroy failed");
    }
    result
}

/// `base * 2^(attempt - 1)`, capped at `cap`. `attempt` is 1-based.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(cap)
}

/// Circuit breaker that opens after N consecutive failures.
///
/// While open, callers should fail fast. Once `cooldown` has passed since the
/// last failure exactly one caller is admitted as a trial and the cooldown is
/// re-armed, so concurrent callers keep failing fast until the trial reports.
/// A success closes the breaker; a failure restarts the cooldown. A trial that
/// never reports frees the slot after another cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    threshold: u32,
    cooldown: Duration,
    last_failure: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            threshold: threshold.max(1),
            cooldown,
            last_failure: Mutex::new(None),
        }
    }

    /// Returns `true` if callers would be refused right now. Does not admit
    /// a trial; use [`CircuitBreaker::try_acquire`] before calling through.
    pub fn is_open(&self) -> bool {
        if self.consecutive_failures.load(Ordering::Relaxed) < self.threshold {
            return false;
        }
        let last = self.last_failure.lock().map(|g| *g).unwrap_or(None);
        match last {
            Some(at) => at.elapsed() < self.cooldown,
            None => false,
        }
    }

    /// Ask to call through. `false` means fail fast.
    ///
    /// When the breaker is tripped and the cooldown has elapsed, the first
    /// caller gets `true` as the half-open trial.
    pub fn try_acquire(&self) -> bool {
        if self.consecutive_failures.load(Ordering::Relaxed) < self.threshold {
            return true;
        }
        let Ok(mut last) = self.last_failure.lock() else {
            return true;
        };
        match *last {
            Some(at) if at.elapsed() < self.cooldown => false,
            _ => {
                *last = Some(Instant::now());
                debug!(
                    consecutive_failures = self.failure_count(),
                    "circuit breaker half-open, admitting trial"
                );
                true
            }
        }
    }

    /// Record a failure. Returns current consecutive failure count.
    pub fn record_failure(&self) -> u32 {
        if let Ok(mut last) = self.last_failure.lock() {
            *last = Some(Instant::now());
        }
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Reset on success.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// The error to fail fast with while open.
    pub fn open_error(&self) -> SandboxError {
        SandboxError::CircuitBreakerOpen {
            consecutive_failures: self.failure_count(),
            threshold: self.threshold,
        }
    }
}
