//! VizRender Core Library
//!
//! Render orchestration for LLM-produced visualization specs: fingerprinting,
//! a single-flight outcome cache, renderers for interactive JS, Plotly and
//! Manim, and the sandbox those renderers run untrusted code in.

pub mod artifact;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod expr;
pub mod fingerprint;
pub mod obs;
pub mod render;
pub mod sandbox;
pub mod spec;
pub mod telemetry;

pub use artifact::{Artifact, FailureRecord, Outcome, MP4_CONTENT_TYPE};

pub use cache::{
    CacheEntry, CacheError, CacheResult, CacheStats, Clock, GcReport, ManualClock, PutResult,
    RenderCache, Resolution, SystemClock,
};

pub use config::{
    CacheConfig, ConfigError, ExpressionProfile, ManimProfile, PipelineConfig, PlotlyConfig,
    Quality, RetryPolicy, SandboxProfiles,
};

pub use dispatcher::{Dispatcher, RenderResult};
pub use error::{sanitize_message, ErrorKind, RenderError};
pub use expr::{EvalError, ExprError, Expression};
pub use fingerprint::{
    fingerprint, fingerprint_with, renderer_version, Fingerprint, RendererTags,
};

pub use render::{
    InteractiveJsRenderer, ManimRenderer, PlotlyRenderer, RenderContext, Renderer, RendererSet,
};

pub use sandbox::{
    run_isolated, CircuitBreaker, JobOutput, ProcessSandboxFactory, RemoteSandboxFactory,
    ResourceLimits, Sandbox, SandboxError, SandboxFactory, SandboxJob, SandboxResult,
};

pub use spec::{
    FunctionPlot, ParamRange, ParameterSpec, Payload, PlotlyPayload, ScenePayload, ScriptPayload,
    SpecError, VisualizationSpec, VizKind,
};

pub use telemetry::init_tracing;
