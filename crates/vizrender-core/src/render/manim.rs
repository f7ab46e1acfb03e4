//! Manim scenes rendered to MP4 inside a sandbox.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{RenderContext, Renderer};
use crate::artifact::{Artifact, MP4_CONTENT_TYPE};
use crate::config::{ManimProfile, Quality};
use crate::error::RenderError;
use crate::sandbox::{run_isolated, CodeScreen, SandboxJob};
use crate::spec::{Payload, VisualizationSpec, VizKind};

pub const SCENE_FILE: &str = "scene.py";
pub const SCENE_CLASS: &str = "GeneratedScene";
pub const OUTPUT_FILE: &str = "output.mp4";

const HARNESS_HEADER: &str = "from manim import *\nimport numpy as np\n\n\nclass GeneratedScene(Scene):\n    def construct(self):\n";
const BODY_INDENT: &str = "        ";

pub struct ManimRenderer {
    profile: ManimProfile,
    screen: CodeScreen,
}

impl ManimRenderer {
    pub fn new(profile: ManimProfile) -> Self {
        let screen = CodeScreen::new(&profile.forbidden_patterns).unwrap_or_else(|e| {
            warn!(error = %e, "invalid sandbox.manim.forbidden_patterns, using the built-in list");
            CodeScreen::default()
        });
        Self { profile, screen }
    }

    /// Quality for a given attempt.
    pub fn quality_for(&self, attempt: u32) -> Quality {
        if attempt > 1 && self.profile.degrade_quality_on_retry {
            Quality::Low
        } else {
            self.profile.quality
        }
    }

    pub fn job(&self, scene_code: &str, attempt: u32) -> SandboxJob {
        let quality = format!("--quality={}", self.quality_for(attempt).flag());
        SandboxJob {
            code: scene_script(scene_code),
            script_name: SCENE_FILE.to_string(),
            command: vec![
                self.profile.command.clone(),
                SCENE_FILE.to_string(),
                SCENE_CLASS.to_string(),
                "--format=mp4".to_string(),
                quality,
                "--output_file".to_string(),
                OUTPUT_FILE.to_string(),
                "--progress_bar=none".to_string(),
            ],
            artifact_name: OUTPUT_FILE.to_string(),
            limits: self.profile.limits.clone(),
            timeout: self.profile.timeout(),
        }
    }
}

#[async_trait]
impl Renderer for ManimRenderer {
    fn kind(&self) -> VizKind {
        VizKind::Manim
    }

    fn uses_sandbox(&self) -> bool {
        true
    }

    async fn render(
        &self,
        spec: &VisualizationSpec,
        ctx: &RenderContext,
    ) -> Result<Artifact, RenderError> {
        let Payload::Manim(payload) = &spec.payload else {
            return Err(RenderError::InvalidSpec(format!(
                "manim renderer got a {} payload",
                spec.payload.kind()
            )));
        };
        if payload.scene_code.trim().is_empty() {
            return Err(RenderError::InvalidSpec("scene_code is empty".into()));
        }
        if let Some(offending) = self.screen.violation(&payload.scene_code) {
            info!(offending, "scene code rejected before execution");
            return Err(RenderError::fault(format!(
                "scene code rejected as unsafe: `{offending}` is not allowed"
            )));
        }

        let job = self.job(&payload.scene_code, ctx.attempt);
        debug!(attempt = ctx.attempt, command = ?job.command, "submitting manim job");
        let output = run_isolated(ctx.sandboxes.as_ref(), &job).await?;

        match output.artifact {
            Some(bytes) if !bytes.is_empty() => {
                info!(bytes = bytes.len(), "manim video rendered");
                Ok(Artifact::Video {
                    content_type: MP4_CONTENT_TYPE.to_string(),
                    bytes,
                })
            }
            _ => Err(RenderError::fault(
                "render finished without producing a video; does the scene play any animation?",
            )),
        }
    }
}

/// Wrap a `construct` body in the fixed scene harness.
///
/// The body is dedented by its common run of leading spaces (tabs count as
/// four) and re-indented under
/// `construct`. An all-blank body becomes `pass`.
pub fn scene_script(body: &str) -> String {
    let lines: Vec<String> = body
        .lines()
        .map(|l| l.trim_end().replace('\t', "    "))
        .collect();
    let indent = lines
        .iter()
        .filter(|l| !l.is_empty())
        .map(|l| l.len() - l.trim_start_matches(' ').len())
        .min()
        .unwrap_or(0);

    let mut script = String::from(HARNESS_HEADER);
    let mut wrote_any = false;
    for line in &lines {
        if line.is_empty() {
            script.push('\n');
            continue;
        }
        script.push_str(BODY_INDENT);
        script.push_str(&line[indent..]);
        script.push('\n');
        wrote_any = true;
    }
    if !wrote_any {
        script.push_str(BODY_INDENT);
        script.push_str("pass\n");
    }
    script
}
