//! Pipeline configuration.
//!
//! Every section defaults to the values the pipeline was tuned with, so an
//! empty TOML document is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::expr::MAX_EXPR_LEN;
use crate::sandbox::{backoff_delay, default_forbidden_patterns, CodeScreen, ResourceLimits};
use crate::spec::MAX_SAMPLES_PER_SIDE;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    pub sandbox: SandboxProfiles,
    pub plotly: PlotlyConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.cache.failure_ttl_secs >= self.cache.success_ttl_secs {
            return invalid("cache.failure_ttl_secs must be shorter than cache.success_ttl_secs");
        }
        if self.cache.max_total_bytes == 0 {
            return invalid("cache.max_total_bytes must be positive");
        }
        if self.retry.max_attempts == 0 || self.retry.timeout_attempts == 0 {
            return invalid("retry attempt bounds must be at least 1");
        }
        if self.retry.backoff_base_ms > self.retry.backoff_cap_ms {
            return invalid("retry.backoff_base_ms must not exceed retry.backoff_cap_ms");
        }
        if self.sandbox.manim.timeout_secs == 0 {
            return invalid("sandbox.manim.timeout_secs must be positive");
        }
        if self.sandbox.manim.command.trim().is_empty() {
            return invalid("sandbox.manim.command must not be empty");
        }
        if let Err(e) = CodeScreen::new(&self.sandbox.manim.forbidden_patterns) {
            return Err(ConfigError::Invalid(format!(
                "sandbox.manim.forbidden_patterns: {e}"
            )));
        }
        if self.plotly.samples_per_side == 0
            || self.plotly.samples_per_side > self.sandbox.expression.max_samples_per_side
        {
            return invalid("plotly.samples_per_side must be within 1..=sandbox.expression.max_samples_per_side");
        }
        let [lo, hi] = self.plotly.default_domain;
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return invalid("plotly.default_domain must be an increasing finite pair");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Eviction starts above this many stored bytes.
    pub max_total_bytes: u64,
    pub success_ttl_secs: u64,
    /// Lifetime of negative entries. Must be shorter than `success_ttl_secs`.
    pub failure_ttl_secs: u64,
    /// Directory for the persistent index and blobs; memory only when unset.
    pub persist_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: 512 * 1024 * 1024,
            success_ttl_secs: 7 * 24 * 3600,
            failure_ttl_secs: 10 * 60,
            persist_dir: None,
        }
    }
}

impl CacheConfig {
    pub fn success_ttl(&self) -> Duration {
        Duration::from_secs(self.success_ttl_secs)
    }

    pub fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_ttl_secs)
    }
}

/// Which failures are retried, how often, and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts when the sandbox infrastructure is unavailable.
    pub max_attempts: u32,
    /// Total attempts when execution times out.
    pub timeout_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Consecutive infrastructure failures that open the circuit breaker.
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_attempts: 2,
            backoff_base_ms: 500,
            backoff_cap_ms: 8_000,
            breaker_threshold: 5,
            breaker_cooldown_secs: 30,
        }
    }
}

impl RetryPolicy {
    /// Attempt bound for a failure kind; 1 means never retried.
    pub fn max_attempts_for(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::RemoteUnavailable => self.max_attempts,
            ErrorKind::ExecutionTimeout => self.timeout_attempts,
            ErrorKind::InvalidSpec | ErrorKind::ExecutionFault | ErrorKind::CacheCorruption => 1,
        }
    }

    /// Delay before attempt `failed_attempt + 1`.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        backoff_delay(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
            failed_attempt,
        )
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxProfiles {
    pub expression: ExpressionProfile,
    pub manim: ManimProfile,
}

/// Limits for the in-process expression evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionProfile {
    /// Capped at the evaluator's own hard limit.
    pub max_source_len: usize,
    pub max_samples_per_side: u32,
}

impl Default for ExpressionProfile {
    fn default() -> Self {
        Self {
            max_source_len: MAX_EXPR_LEN,
            max_samples_per_side: 2_000,
        }
    }
}

impl ExpressionProfile {
    pub fn effective_source_len(&self) -> usize {
        self.max_source_len.min(MAX_EXPR_LEN)
    }

    pub fn effective_samples_per_side(&self) -> u32 {
        self.max_samples_per_side.min(MAX_SAMPLES_PER_SIDE)
    }
}

/// Manim render quality presets (`--quality` flag values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Low,
    Medium,
    High,
    Production,
    FourK,
}

impl Quality {
    pub fn flag(self) -> &'static str {
        match self {
            Quality::Low => "l",
            Quality::Medium => "m",
            Quality::High => "h",
            Quality::Production => "p",
            Quality::FourK => "k",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManimProfile {
    /// Executable invoked inside the sandbox.
    pub command: String,
    pub timeout_secs: u64,
    pub limits: ResourceLimits,
    pub quality: Quality,
    /// Retry a timed-out render at low quality instead of unchanged.
    pub degrade_quality_on_retry: bool,
    /// Regexes that reject scene code before a sandbox is provisioned.
    /// An empty list disables the screen.
    pub forbidden_patterns: Vec<String>,
}

impl Default for ManimProfile {
    fn default() -> Self {
        Self {
            command: "manim".to_string(),
            timeout_secs: 300,
            limits: ResourceLimits {
                cpus: 2.0,
                memory_mib: 4096,
                max_output_bytes: 64 * 1024,
                max_artifact_bytes: 256 * 1024 * 1024,
            },
            quality: Quality::Medium,
            degrade_quality_on_retry: false,
            forbidden_patterns: default_forbidden_patterns(),
        }
    }
}

impl ManimProfile {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotlyConfig {
    /// N in the `2N + 1` sample grid when a spec does not set one.
    pub samples_per_side: u32,
    pub default_domain: [f64; 2],
}

impl Default for PlotlyConfig {
    fn default() -> Self {
        Self {
            samples_per_side: 200,
            default_domain: [-10.0, 10.0],
        }
    }
}
