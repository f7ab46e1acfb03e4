//! Sandbox: isolated, resource- and time-bounded execution of untrusted code.
//!
//! A [`SandboxFactory`] provisions one [`Sandbox`] per job; the sandbox is
//! owned by a single render attempt and destroyed after use.
//! [`run_isolated`] is the only way the renderers run a job, and guarantees
//! the timeout and the destroy.
//!
//! # Modules
//!
//! - [`job`]:       `SandboxJob`, `ResourceLimits`, `JobOutput`
//! - [`execution`]: `run_isolated()`, `CircuitBreaker`, `backoff_delay()`
//! - [`process`]:   local child-process backend
//! - [`remote`]:    HTTP backend for a remote sandbox service
//! - [`fakes`]:     scripted in-memory backend for tests
//! - [`screen`]:    pattern screen applied to scene code before it runs
//! - [`error`]:     `SandboxError` / `SandboxResult`

pub mod error;
pub mod execution;
pub mod fakes;
pub mod job;
pub mod process;
pub mod remote;
pub mod screen;

use async_trait::async_trait;

pub use error::{SandboxError, SandboxResult};
pub use execution::{backoff_delay, run_isolated, CircuitBreaker};
pub use job::{JobOutput, ResourceLimits, SandboxJob};
pub use process::ProcessSandboxFactory;
pub use remote::RemoteSandboxFactory;
pub use screen::{default_forbidden_patterns, CodeScreen};

/// A single-use isolated execution context.
#[async_trait]
pub trait Sandbox: Send {
    /// Run the job's command to completion.
    ///
    /// A non-zero exit is reported as `SandboxError::Fault` with the captured
    /// stderr. A missing artifact after a zero exit is not an error here.
    async fn execute(&mut self, job: &SandboxJob) -> SandboxResult<JobOutput>;

    /// Release every resource held by the sandbox.
    async fn destroy(self: Box<Self>) -> SandboxResult<()>;
}

/// Provisions fresh sandboxes.
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    async fn provision(&self, limits: &ResourceLimits) -> SandboxResult<Box<dyn Sandbox>>;
}
