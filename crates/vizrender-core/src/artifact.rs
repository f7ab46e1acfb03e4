//! Render outputs and failure records.
//!
//! An [`Outcome`] is what the cache stores for a fingerprint: either the
//! [`Artifact`] a renderer produced or a [`FailureRecord`] for a terminal
//! failure. Both are immutable once built.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;

/// Content type of every video the manim renderer produces.
pub const MP4_CONTENT_TYPE: &str = "video/mp4";

/// Renderer output, tagged by what the client has to do with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
    /// Self-contained HTML document with an embedded script, plus the
    /// parameter bindings it was generated with.
    Script {
        html: String,
        bindings: serde_json::Map<String, Value>,
    },
    /// Plotly figure description (`{"data": [...], "layout": {...}}`).
    Figure { figure: Value },
    /// Encoded video.
    Video {
        content_type: String,
        #[serde(with = "hex_bytes")]
        bytes: Vec<u8>,
    },
}

impl Artifact {
    pub fn type_name(&self) -> &'static str {
        match self {
            Artifact::Script { .. } => "script",
            Artifact::Figure { .. } => "figure",
            Artifact::Video { .. } => "video",
        }
    }

    /// Approximate stored size, used for cache accounting.
    pub fn size_bytes(&self) -> u64 {
        match self {
            Artifact::Script { html, bindings } => {
                (html.len() + Value::Object(bindings.clone()).to_string().len()) as u64
            }
            Artifact::Figure { figure } => figure.to_string().len() as u64,
            Artifact::Video { bytes, .. } => bytes.len() as u64,
        }
    }

    /// Split into a small JSON descriptor and a body for blob storage.
    pub fn to_parts(&self) -> (Value, Vec<u8>) {
        match self {
            Artifact::Script { html, bindings } => (
                serde_json::json!({"type": "script", "bindings": bindings}),
                html.as_bytes().to_vec(),
            ),
            Artifact::Figure { figure } => (
                serde_json::json!({"type": "figure"}),
                figure.to_string().into_bytes(),
            ),
            Artifact::Video {
                content_type,
                bytes,
            } => (
                serde_json::json!({"type": "video", "content_type": content_type}),
                bytes.clone(),
            ),
        }
    }

    /// Inverse of [`to_parts`](Self::to_parts).
    pub fn from_parts(meta: &Value, body: Vec<u8>) -> Result<Self, String> {
        match meta.get("type").and_then(Value::as_str) {
            Some("script") => {
                let bindings = meta
                    .get("bindings")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let html = String::from_utf8(body).map_err(|e| e.to_string())?;
                Ok(Artifact::Script { html, bindings })
            }
            Some("figure") => {
                let figure = serde_json::from_slice(&body).map_err(|e| e.to_string())?;
                Ok(Artifact::Figure { figure })
            }
            Some("video") => {
                let content_type = meta
                    .get("content_type")
                    .and_then(Value::as_str)
                    .ok_or("video descriptor without content_type")?
                    .to_string();
                Ok(Artifact::Video {
                    content_type,
                    bytes: body,
                })
            }
            other => Err(format!("unknown artifact type {other:?}")),
        }
    }
}

/// Terminal failure stored in place of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    /// Already sanitized.
    pub message: String,
    /// Artifact that displays the error, if the renderer produced one.
    pub fallback: Option<Artifact>,
}

/// What a build produced for one fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success { artifact: Artifact },
    Failure { failure: FailureRecord },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            Outcome::Success { artifact } => Some(artifact),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { failure } => Some(failure),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        match self {
            Outcome::Success { artifact } => artifact.size_bytes(),
            Outcome::Failure { failure } => {
                failure.message.len() as u64
                    + failure.fallback.as_ref().map_or(0, Artifact::size_bytes)
            }
        }
    }

    /// Split into a JSON descriptor and blob body for persistence.
    pub fn to_parts(&self) -> (Value, Vec<u8>) {
        match self {
            Outcome::Success { artifact } => {
                let (meta, body) = artifact.to_parts();
                (serde_json::json!({"outcome": "success", "artifact": meta}), body)
            }
            Outcome::Failure { failure } => {
                let (fallback_meta, body) = match &failure.fallback {
                    Some(a) => {
                        let (m, b) = a.to_parts();
                        (m, b)
                    }
                    None => (Value::Null, Vec::new()),
                };
                (
                    serde_json::json!({
                        "outcome": "failure",
                        "kind": failure.kind,
                        "message": failure.message,
                        "fallback": fallback_meta,
                    }),
                    body,
                )
            }
        }
    }

    /// Inverse of [`to_parts`](Self::to_parts).
    pub fn from_parts(meta: &Value, body: Vec<u8>) -> Result<Self, String> {
        match meta.get("outcome").and_then(Value::as_str) {
            Some("success") => {
                let artifact_meta = meta.get("artifact").ok_or("missing artifact descriptor")?;
                Ok(Outcome::Success {
                    artifact: Artifact::from_parts(artifact_meta, body)?,
                })
            }
            Some("failure") => {
                let kind: ErrorKind = serde_json::from_value(
                    meta.get("kind").cloned().unwrap_or(Value::Null),
                )
                .map_err(|e| e.to_string())?;
                let message = meta
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or("failure without message")?
                    .to_string();
                let fallback = match meta.get("fallback") {
                    None | Some(Value::Null) => None,
                    Some(m) => Some(Artifact::from_parts(m, body)?),
                };
                Ok(Outcome::Failure {
                    failure: FailureRecord {
                        kind,
                        message,
                        fallback,
                    },
                })
            }
            other => Err(format!("unknown outcome {other:?}")),
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
