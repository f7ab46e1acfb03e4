//! Renderers: one per [`VizKind`], behind a common trait.
//!
//! - [`interactive_js`]: self-contained HTML/JS page from a built-in template
//! - [`plotly`]:         Plotly figure from a literal or a sampled expression
//! - [`manim`]:          MP4 video rendered in a sandbox

pub mod interactive_js;
pub mod manim;
pub mod plotly;

use std::sync::Arc;

use async_trait::async_trait;

use crate::artifact::Artifact;
use crate::config::PipelineConfig;
use crate::error::RenderError;
use crate::fingerprint::renderer_version;
use crate::sandbox::SandboxFactory;
use crate::spec::{VisualizationSpec, VizKind};

pub use interactive_js::InteractiveJsRenderer;
pub use manim::ManimRenderer;
pub use plotly::PlotlyRenderer;

/// Per-attempt inputs a renderer may use.
#[derive(Clone)]
pub struct RenderContext {
    pub sandboxes: Arc<dyn SandboxFactory>,
    /// 1-based attempt number within one build.
    pub attempt: u32,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    fn kind(&self) -> VizKind;

    /// Version tag folded into fingerprints of this renderer's specs.
    fn version(&self) -> &'static str {
        renderer_version(self.kind())
    }

    /// Whether rendering goes through the sandbox factory.
    fn uses_sandbox(&self) -> bool {
        false
    }

    /// Produce the artifact for `spec`, whose payload is already known to
    /// match [`kind`](Self::kind).
    async fn render(
        &self,
        spec: &VisualizationSpec,
        ctx: &RenderContext,
    ) -> Result<Artifact, RenderError>;
}

/// The fixed set of renderers, selected by kind.
pub struct RendererSet {
    interactive_js: InteractiveJsRenderer,
    plotly: PlotlyRenderer,
    manim: ManimRenderer,
}

impl RendererSet {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            interactive_js: InteractiveJsRenderer::new(config.sandbox.expression.clone()),
            plotly: PlotlyRenderer::new(config.plotly.clone(), config.sandbox.expression.clone()),
            manim: ManimRenderer::new(config.sandbox.manim.clone()),
        }
    }

    pub fn for_kind(&self, kind: VizKind) -> &dyn Renderer {
        match kind {
            VizKind::InteractiveJs => &self.interactive_js,
            VizKind::Plotly => &self.plotly,
            VizKind::Manim => &self.manim,
        }
    }
}

impl Default for RendererSet {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}
