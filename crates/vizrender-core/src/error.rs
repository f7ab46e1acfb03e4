//! Render error taxonomy and message sanitization.
//!
//! Every failure that leaves the dispatcher is one of the [`ErrorKind`]s below
//! and carries a message that went through [`sanitize_message`].

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;

/// Longest message handed to callers.
pub const MAX_PUBLIC_MESSAGE_CHARS: usize = 200;

/// Failure classes visible at the dispatcher boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or contradictory input. Never retried.
    InvalidSpec,
    /// Sandbox exceeded its time or resource budget.
    ExecutionTimeout,
    /// Untrusted code ran and produced an error.
    ExecutionFault,
    /// Execution or rendering infrastructure could not be reached.
    RemoteUnavailable,
    /// A stored cache entry could not be read back.
    CacheCorruption,
}

impl ErrorKind {
    /// Infrastructure-level failures worth another attempt.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::ExecutionTimeout | ErrorKind::RemoteUnavailable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidSpec => "invalid_spec",
            ErrorKind::ExecutionTimeout => "execution_timeout",
            ErrorKind::ExecutionFault => "execution_fault",
            ErrorKind::RemoteUnavailable => "remote_unavailable",
            ErrorKind::CacheCorruption => "cache_corruption",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors a renderer may return.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("execution timed out: {reason}")]
    ExecutionTimeout { reason: String },

    /// `fallback` is an artifact that displays the error, when the renderer
    /// can still produce one (plotly error figures).
    #[error("execution fault: {message}")]
    ExecutionFault {
        message: String,
        fallback: Option<Artifact>,
    },

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::InvalidSpec(_) => ErrorKind::InvalidSpec,
            RenderError::ExecutionTimeout { .. } => ErrorKind::ExecutionTimeout,
            RenderError::ExecutionFault { .. } => ErrorKind::ExecutionFault,
            RenderError::RemoteUnavailable(_) => ErrorKind::RemoteUnavailable,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    pub fn fault(message: impl Into<String>) -> Self {
        RenderError::ExecutionFault {
            message: message.into(),
            fallback: None,
        }
    }

    /// Message safe to show to an end user.
    pub fn public_message(&self) -> String {
        match self {
            RenderError::InvalidSpec(m) => sanitize_message(m),
            RenderError::ExecutionTimeout { reason } => sanitize_message(reason),
            RenderError::ExecutionFault { message, .. } => sanitize_message(message),
            RenderError::RemoteUnavailable(_) => {
                "rendering service is temporarily unavailable".to_string()
            }
        }
    }

    pub fn fallback(&self) -> Option<&Artifact> {
        match self {
            RenderError::ExecutionFault { fallback, .. } => fallback.as_ref(),
            _ => None,
        }
    }
}

fn path_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(^|[\s"'(=])((?:[A-Za-z]:)?(?:[/\\][\w.\-]+){2,}[/\\]?)"#).expect("valid regex")
    })
}

fn frame_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*(Traceback \(most recent call last\)|File ".*", line \d+|\^+\s*$|~+\s*$)"#)
            .expect("valid regex")
    })
}

/// Reduce a raw error (possibly multi-line sandbox stderr) to one short line.
///
/// Keeps the last line that is not a traceback frame, replaces filesystem
/// paths with `<path>`, collapses whitespace and truncates to
/// [`MAX_PUBLIC_MESSAGE_CHARS`].
pub fn sanitize_message(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .filter(|l| !frame_pattern().is_match(l))
        .filter(|l| !l.starts_with("    "))
        .last()
        .unwrap_or("");

    let scrubbed = path_pattern().replace_all(line, "${1}<path>");
    let collapsed = scrubbed.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "render failed".to_string();
    }

    if collapsed.chars().count() > MAX_PUBLIC_MESSAGE_CHARS {
        let cut: String = collapsed.chars().take(MAX_PUBLIC_MESSAGE_CHARS - 3).collect();
        format!("{cut}...")
    } else {
        collapsed
    }
}
