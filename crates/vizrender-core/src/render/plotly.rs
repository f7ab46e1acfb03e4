//! Plotly figures from a literal description or a sampled expression.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{RenderContext, Renderer};
use crate::artifact::Artifact;
use crate::config::{ExpressionProfile, PlotlyConfig};
use crate::error::{sanitize_message, RenderError};
use crate::expr::{normalize_source, sample, Expression};
use crate::spec::{FunctionPlot, Payload, PlotlyPayload, VisualizationSpec, VizKind};

pub struct PlotlyRenderer {
    config: PlotlyConfig,
    limits: ExpressionProfile,
}

impl PlotlyRenderer {
    pub fn new(config: PlotlyConfig, limits: ExpressionProfile) -> Self {
        Self { config, limits }
    }

    fn function_figure(
        &self,
        f: &FunctionPlot,
        spec: &VisualizationSpec,
    ) -> Result<Artifact, RenderError> {
        let defaults = spec.numeric_defaults();
        let mut variables: Vec<&str> = vec![f.variable.as_str()];
        variables.extend(defaults.keys().map(String::as_str).filter(|n| *n != f.variable));

        if f.expr.len() > self.limits.effective_source_len() {
            return Err(fault_with_figure(format!(
                "expression longer than {} bytes",
                self.limits.effective_source_len()
            )));
        }
        let expr = Expression::parse(&f.expr, &variables)
            .map_err(|e| fault_with_figure(format!("cannot parse '{}': {}", f.expr, e.message)))?;

        let domain = f.domain.unwrap_or(self.config.default_domain);
        let per_side = f
            .samples_per_side
            .unwrap_or(self.config.samples_per_side)
            .min(self.limits.effective_samples_per_side())
            .max(1);

        let samples = sample(&expr, &f.variable, domain, per_side, &defaults).map_err(|e| {
            fault_with_figure(format!("cannot evaluate '{}': {e}", f.expr))
        })?;
        debug!(points = samples.x.len(), gaps = samples.gaps(), "expression sampled");

        let figure = json!({
            "data": [{
                "type": "scatter",
                "mode": "lines",
                "name": normalize_source(&f.expr),
                "x": samples.x,
                "y": samples.y,
            }],
            "layout": {
                "xaxis": {"title": {"text": f.variable}},
                "yaxis": {"title": {"text": "y"}},
            },
        });
        Ok(Artifact::Figure { figure })
    }
}

#[async_trait]
impl Renderer for PlotlyRenderer {
    fn kind(&self) -> VizKind {
        VizKind::Plotly
    }

    async fn render(
        &self,
        spec: &VisualizationSpec,
        _ctx: &RenderContext,
    ) -> Result<Artifact, RenderError> {
        match &spec.payload {
            Payload::Plotly(PlotlyPayload::Figure { figure }) => literal_figure(figure),
            Payload::Plotly(PlotlyPayload::Function(f)) => self.function_figure(f, spec),
            other => Err(RenderError::InvalidSpec(format!(
                "plotly renderer got a {} payload",
                other.kind()
            ))),
        }
    }
}

/// Check a literal figure and fill in an empty layout.
fn literal_figure(figure: &Value) -> Result<Artifact, RenderError> {
    let obj = figure
        .as_object()
        .ok_or_else(|| RenderError::InvalidSpec("figure must be an object".into()))?;

    let data = match obj.get("data") {
        Some(Value::Array(traces)) if !traces.is_empty() => traces,
        Some(Value::Array(_)) => {
            return Err(RenderError::InvalidSpec("figure.data is empty".into()))
        }
        Some(_) => return Err(RenderError::InvalidSpec("figure.data must be a list".into())),
        None => return Err(RenderError::InvalidSpec("figure.data is missing".into())),
    };
    if let Some(i) = data.iter().position(|t| !t.is_object()) {
        return Err(RenderError::InvalidSpec(format!(
            "figure.data[{i}] must be an object"
        )));
    }

    let layout = match obj.get("layout") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::Object(l)) => Value::Object(l.clone()),
        Some(_) => return Err(RenderError::InvalidSpec("figure.layout must be an object".into())),
    };

    let mut out = Map::new();
    out.insert("data".into(), Value::Array(data.clone()));
    out.insert("layout".into(), layout);
    if let Some(frames) = obj.get("frames").filter(|f| f.is_array()) {
        out.insert("frames".into(), frames.clone());
    }
    Ok(Artifact::Figure {
        figure: Value::Object(out),
    })
}

/// Figure that displays `message` instead of a plot.
pub fn error_figure(message: &str) -> Value {
    json!({
        "data": [],
        "layout": {
            "title": {"text": "Plot Generation Error"},
            "xaxis": {"visible": false},
            "yaxis": {"visible": false},
            "annotations": [{
                "text": format!("Could not generate plot:<br>{}", sanitize_message(message)),
                "xref": "paper",
                "yref": "paper",
                "showarrow": false,
                "font": {"size": 14, "color": "red"},
            }],
        },
    })
}

fn fault_with_figure(message: String) -> RenderError {
    RenderError::ExecutionFault {
        fallback: Some(Artifact::Figure {
            figure: error_figure(&message),
        }),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sandbox::fakes::ScriptedFactory;
    use std::sync::Arc;

    fn ctx() -> RenderContext {
        RenderContext {
            sandboxes: Arc::new(ScriptedFactory::new(vec![])),
            attempt: 1,
        }
    }

    fn renderer() -> PlotlyRenderer {
        PlotlyRenderer::new(PlotlyConfig::default(), ExpressionProfile::default())
    }

    async fn render(json: &str) -> Result<Artifact, RenderError> {
        let spec = VisualizationSpec::from_json(json).unwrap();
        renderer().render(&spec, &ctx()).await
    }

    #[tokio::test]
    async fn test_parabola_samples_401_points() {
        let artifact = render(
            r#"{"kind": "plotly", "payload": {"kind": "plotly", "source": "function", "expr": "x**2", "domain": [-10, 10]}}"#,
        )
        .await
        .unwrap();
        let Artifact::Figure { figure } = artifact else {
            panic!("expected a figure");
        };
        let trace = &figure["data"][0];
        assert_eq!(trace["x"].as_array().unwrap().len(), 401);
        assert_eq!(trace["y"][0], json!(100.0));
        assert_eq!(trace["y"][200], json!(0.0));
        assert_eq!(trace["y"][400], json!(100.0));
        assert_eq!(trace["name"], "x ** 2");
    }

    #[tokio::test]
    async fn test_parameters_use_defaults() {
        let artifact = render(
            r#"{"kind": "plotly",
                "parameters": {"a": {"default": 3, "range": {"type": "numeric", "min": 0, "max": 10}}},
                "payload": {"kind": "plotly", "source": "function", "expr": "a * x", "domain": [0, 1], "samples_per_side": 1}}"#,
        )
        .await
        .unwrap();
        let Artifact::Figure { figure } = artifact else {
            panic!("expected a figure");
        };
        assert_eq!(figure["data"][0]["y"], json!([0.0, 1.5, 3.0]));
    }

    #[tokio::test]
    async fn test_division_by_zero_is_fault_with_error_figure() {
        let err = render(
            r#"{"kind": "plotly", "payload": {"kind": "plotly", "source": "function", "expr": "1/0"}}"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFault);
        let Some(Artifact::Figure { figure }) = err.fallback() else {
            panic!("expected an error figure");
        };
        let text = figure["layout"]["annotations"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("Could not generate plot:<br>"));
        assert!(text.contains("division by zero"));
        assert_eq!(figure["layout"]["xaxis"]["visible"], json!(false));
    }

    #[tokio::test]
    async fn test_disallowed_code_is_fault() {
        let err = render(
            r#"{"kind": "plotly", "payload": {"kind": "plotly", "source": "function", "expr": "__import__('os').system('id')"}}"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFault);
        assert!(err.fallback().is_some());
    }

    #[tokio::test]
    async fn test_literal_figure_gets_empty_layout() {
        let artifact = render(
            r#"{"kind": "plotly", "payload": {"kind": "plotly", "source": "figure",
                "figure": {"data": [{"type": "bar", "x": ["a"], "y": [1]}]}}}"#,
        )
        .await
        .unwrap();
        assert_eq!(
            artifact,
            Artifact::Figure {
                figure: json!({"data": [{"type": "bar", "x": ["a"], "y": [1]}], "layout": {}})
            }
        );
    }

    #[tokio::test]
    async fn test_literal_figure_without_data_is_invalid() {
        for figure in [r#"{}"#, r#"{"data": []}"#, r#"{"data": [1]}"#, r#"[1, 2]"#] {
            let json = format!(
                r#"{{"kind": "plotly", "payload": {{"kind": "plotly", "source": "figure", "figure": {figure}}}}}"#
            );
            let err = render(&json).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidSpec, "figure {figure}");
        }
    }

    #[test]
    fn test_error_figure_truncates_message() {
        let figure = error_figure(&"e".repeat(1_000));
        let text = figure["layout"]["annotations"][0]["text"].as_str().unwrap();
        assert!(text.len() < 250);
        assert!(text.ends_with("..."));
    }
}
