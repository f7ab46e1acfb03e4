//! Error types for the sandbox layer.

use crate::error::RenderError;

/// Errors produced by sandbox provisioning and execution.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox execution timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("sandbox resource limit exceeded: {0}")]
    ResourceExceeded(String),

    /// The code ran and failed; `stderr` is raw and unsanitized.
    #[error("sandboxed code failed: {stderr}")]
    Fault { stderr: String },

    #[error("sandbox unavailable: {0}")]
    Unavailable(String),

    #[error(
        "circuit breaker open: {consecutive_failures} consecutive failures (threshold {threshold})"
    )]
    CircuitBreakerOpen {
        consecutive_failures: u32,
        threshold: u32,
    },

    #[error("invalid sandbox job: {0}")]
    InvalidJob(String),

    #[error("sandbox io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

impl From<SandboxError> for RenderError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Timeout { .. } | SandboxError::ResourceExceeded(_) => {
                RenderError::ExecutionTimeout {
                    reason: err.to_string(),
                }
            }
            SandboxError::Fault { stderr } => RenderError::fault(stderr),
            SandboxError::InvalidJob(msg) => RenderError::fault(msg),
            SandboxError::Unavailable(_)
            | SandboxError::CircuitBreakerOpen { .. }
            | SandboxError::Io(_) => RenderError::RemoteUnavailable(err.to_string()),
        }
    }
}
