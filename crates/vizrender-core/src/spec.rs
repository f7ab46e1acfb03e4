//! The visualization spec: the validated, immutable description of what to render.
//!
//! Specs arrive from the LLM integration layer already parsed. [`VisualizationSpec::validate`]
//! re-checks the invariants the pipeline relies on, chiefly that the payload
//! variant matches `kind` and that parameter names are plain identifiers
//! (they end up as script variable names).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound on samples per side of a sampling domain.
pub const MAX_SAMPLES_PER_SIDE: u32 = 5_000;

/// Which renderer a spec is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VizKind {
    InteractiveJs,
    Plotly,
    Manim,
}

impl VizKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VizKind::InteractiveJs => "interactive_js",
            VizKind::Plotly => "plotly",
            VizKind::Manim => "manim",
        }
    }
}

impl std::fmt::Display for VizKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allowed values of an interactive parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamRange {
    Numeric {
        min: f64,
        max: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
    },
    Categorical { options: Vec<String> },
}

/// One interactive control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub default: Value,
    pub range: ParamRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ParameterSpec {
    pub fn numeric_default(&self) -> Option<f64> {
        match self.range {
            ParamRange::Numeric { .. } => self.default.as_f64(),
            ParamRange::Categorical { .. } => None,
        }
    }
}

/// Payload for the interactive script renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptPayload {
    /// Identifier of a built-in script template.
    pub template: String,
    /// Template inputs. A binding of the form `{"expr": "..."}` is computed
    /// with the restricted evaluator over the parameter defaults.
    #[serde(default)]
    pub bindings: serde_json::Map<String, Value>,
}

/// Function-expression plot input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionPlot {
    pub expr: String,
    #[serde(default = "default_variable")]
    pub variable: String,
    /// `[lo, hi]`; renderer default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<[f64; 2]>,
    /// N in the `2N + 1` sample grid; renderer default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples_per_side: Option<u32>,
}

fn default_variable() -> String {
    "x".to_string()
}

/// Plotly payload: a literal figure or an expression to sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PlotlyPayload {
    Figure { figure: Value },
    Function(FunctionPlot),
}

/// Payload for the animation renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePayload {
    /// Body of the scene's `construct` method.
    pub scene_code: String,
}

/// Kind-tagged payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    InteractiveJs(ScriptPayload),
    Plotly(PlotlyPayload),
    Manim(ScenePayload),
}

impl Payload {
    pub fn kind(&self) -> VizKind {
        match self {
            Payload::InteractiveJs(_) => VizKind::InteractiveJs,
            Payload::Plotly(_) => VizKind::Plotly,
            Payload::Manim(_) => VizKind::Manim,
        }
    }
}

/// Validated description of a requested visualization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationSpec {
    pub kind: VizKind,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    pub payload: Payload,
}

/// Spec validation failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpecError {
    #[error("payload is {payload} but kind is {kind}")]
    KindMismatch { kind: VizKind, payload: VizKind },

    #[error("parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("invalid sampling domain: {0}")]
    InvalidDomain(String),

    #[error("malformed spec: {0}")]
    Malformed(String),
}

/// Plain ASCII identifier, usable as a script variable name.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 32 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl VisualizationSpec {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, SpecError> {
        let spec: VisualizationSpec =
            serde_json::from_str(text).map_err(|e| SpecError::Malformed(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Check the invariants renderers depend on.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.payload.kind() != self.kind {
            return Err(SpecError::KindMismatch {
                kind: self.kind,
                payload: self.payload.kind(),
            });
        }

        for (name, param) in &self.parameters {
            validate_parameter(name, param)?;
        }

        match &self.payload {
            Payload::InteractiveJs(p) => {
                if p.template.trim().is_empty() {
                    return Err(SpecError::EmptyField("template"));
                }
            }
            Payload::Plotly(PlotlyPayload::Figure { .. }) => {}
            Payload::Plotly(PlotlyPayload::Function(f)) => validate_function(f)?,
            Payload::Manim(p) => {
                if p.scene_code.trim().is_empty() {
                    return Err(SpecError::EmptyField("scene_code"));
                }
            }
        }
        Ok(())
    }

    /// Numeric parameter defaults, keyed by name.
    pub fn numeric_defaults(&self) -> BTreeMap<String, f64> {
        self.parameters
            .iter()
            .filter_map(|(name, p)| p.numeric_default().map(|v| (name.clone(), v)))
            .collect()
    }
}

fn validate_parameter(name: &str, param: &ParameterSpec) -> Result<(), SpecError> {
    let invalid = |reason: String| SpecError::InvalidParameter {
        name: name.to_string(),
        reason,
    };

    if !is_identifier(name) {
        return Err(invalid("name must be an identifier".into()));
    }

    match &param.range {
        ParamRange::Numeric { min, max, step } => {
            if !min.is_finite() || !max.is_finite() || min >= max {
                return Err(invalid(format!("range [{min}, {max}] is empty")));
            }
            if let Some(step) = step {
                if !step.is_finite() || *step <= 0.0 {
                    return Err(invalid(format!("step {step} must be positive")));
                }
            }
            let default = param
                .default
                .as_f64()
                .ok_or_else(|| invalid("numeric parameter needs a numeric default".into()))?;
            if default < *min || default > *max {
                return Err(invalid(format!("default {default} outside [{min}, {max}]")));
            }
        }
        ParamRange::Categorical { options } => {
            if options.is_empty() {
                return Err(invalid("categorical parameter has no options".into()));
            }
            let default = param.default.as_str().unwrap_or_default();
            if !options.iter().any(|o| o == default) {
                return Err(invalid(format!("default {:?} is not an option", param.default)));
            }
        }
    }
    Ok(())
}

fn validate_function(f: &FunctionPlot) -> Result<(), SpecError> {
    if f.expr.trim().is_empty() {
        return Err(SpecError::EmptyField("expr"));
    }
    if !is_identifier(&f.variable) {
        return Err(SpecError::InvalidDomain(format!(
            "variable {:?} is not an identifier",
            f.variable
        )));
    }
    if let Some([lo, hi]) = f.domain {
        if !lo.is_finite() || !hi.is_finite() || lo >= hi {
            return Err(SpecError::InvalidDomain(format!("[{lo}, {hi}]")));
        }
    }
    if let Some(n) = f.samples_per_side {
        if n == 0 || n > MAX_SAMPLES_PER_SIDE {
            return Err(SpecError::InvalidDomain(format!(
                "samples_per_side {n} outside 1..={MAX_SAMPLES_PER_SIDE}"
            )));
        }
    }
    Ok(())
}
