//! Spec fingerprints: the cache key.
//!
//! A fingerprint is the SHA-256 of the canonical JSON of
//! `{kind, renderer, parameters, payload}`, where `payload` has its
//! free-text code fields normalized first. `explanation` is not part of the
//! key since no renderer reads it.
//!
//! `renderer` is a [`RendererTags`] entry: the renderer version plus a short
//! digest of the pipeline settings that change that renderer's output, so a
//! persisted cache stops matching when those settings change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::PipelineConfig;
use crate::expr::normalize_source;
use crate::spec::{Payload, PlotlyPayload, VisualizationSpec, VizKind};

/// Renderer version tags. Bump one whenever its renderer's output for an
/// unchanged spec changes, so stale cache entries stop matching.
pub const INTERACTIVE_JS_RENDERER_VERSION: &str = "interactive_js/1";
pub const PLOTLY_RENDERER_VERSION: &str = "plotly/1";
pub const MANIM_RENDERER_VERSION: &str = "manim/1";

pub fn renderer_version(kind: VizKind) -> &'static str {
    match kind {
        VizKind::InteractiveJs => INTERACTIVE_JS_RENDERER_VERSION,
        VizKind::Plotly => PLOTLY_RENDERER_VERSION,
        VizKind::Manim => MANIM_RENDERER_VERSION,
    }
}

/// Renderer tag per kind, derived from a [`PipelineConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererTags {
    interactive_js: String,
    plotly: String,
    manim: String,
}

impl RendererTags {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let plotly = serde_json::json!({
            "samples_per_side": config.plotly.samples_per_side,
            "default_domain": config.plotly.default_domain,
            "max_samples_per_side": config.sandbox.expression.effective_samples_per_side(),
        });
        let manim = serde_json::json!({
            "quality": config.sandbox.manim.quality,
            "degrade_quality_on_retry": config.sandbox.manim.degrade_quality_on_retry,
        });
        Self {
            // Template expansion reads no settings.
            interactive_js: INTERACTIVE_JS_RENDERER_VERSION.to_string(),
            plotly: settings_tag(PLOTLY_RENDERER_VERSION, &plotly),
            manim: settings_tag(MANIM_RENDERER_VERSION, &manim),
        }
    }

    pub fn for_kind(&self, kind: VizKind) -> &str {
        match kind {
            VizKind::InteractiveJs => &self.interactive_js,
            VizKind::Plotly => &self.plotly,
            VizKind::Manim => &self.manim,
        }
    }
}

impl Default for RendererTags {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// `version+<12 hex>` over the canonical JSON of `settings`.
fn settings_tag(version: &str, settings: &Value) -> String {
    let digest = hex::encode(Sha256::digest(canonical_json(settings).as_bytes()));
    format!("{version}+{}", &digest[..12])
}

/// 64-char lowercase hex SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: &str) -> Option<Self> {
        let ok = hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        ok.then(|| Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache key of `spec` under the default pipeline configuration.
pub fn fingerprint(spec: &VisualizationSpec) -> Fingerprint {
    fingerprint_with(spec, &RendererTags::default())
}

/// Cache key of `spec` for a pipeline whose renderers are tagged `tags`.
pub fn fingerprint_with(spec: &VisualizationSpec, tags: &RendererTags) -> Fingerprint {
    let material = serde_json::json!({
        "kind": spec.kind,
        "renderer": tags.for_kind(spec.kind),
        "parameters": spec.parameters,
        "payload": normalized_payload(&spec.payload),
    });
    let hash = Sha256::digest(canonical_json(&material).as_bytes());
    Fingerprint(hex::encode(hash))
}

/// Serialize with object keys in UTF-16 code unit order and integer-valued
/// floats written as integers.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) if !(n.is_i64() || n.is_u64())
                && f.fract() == 0.0
                && f >= i64::MIN as f64
                && f <= i64::MAX as f64 =>
            {
                out.push_str(&(f as i64).to_string());
            }
            _ => out.push_str(&n.to_string()),
        },
        other => out.push_str(&other.to_string()),
    }
}

fn normalized_payload(payload: &Payload) -> Value {
    let mut value = serde_json::to_value(payload).unwrap_or(Value::Null);
    let Some(obj) = value.as_object_mut() else {
        return value;
    };

    match payload {
        Payload::InteractiveJs(p) => {
            obj.insert("template".into(), Value::String(p.template.trim().to_string()));
            if let Some(Value::Object(bindings)) = obj.get_mut("bindings") {
                for binding in bindings.values_mut() {
                    if let Some(Value::String(src)) = binding.get_mut("expr") {
                        *src = normalize_source(src);
                    }
                }
            }
        }
        Payload::Plotly(PlotlyPayload::Function(f)) => {
            obj.insert("expr".into(), Value::String(normalize_source(&f.expr)));
        }
        Payload::Plotly(PlotlyPayload::Figure { .. }) => {}
        Payload::Manim(p) => {
            obj.insert("scene_code".into(), Value::String(normalize_scene(&p.scene_code)));
        }
    }
    value
}

/// Line-ending and trailing-whitespace normalization for scene bodies.
/// Leading indentation is significant and kept.
pub fn normalize_scene(code: &str) -> String {
    let lines: Vec<&str> = code.lines().map(str::trim_end).collect();
    let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.is_empty()).map_or(start, |i| i + 1);
    lines[start..end].join("\n")
}
