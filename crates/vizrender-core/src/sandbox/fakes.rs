//! Scripted in-memory sandbox backend for tests.
//!
//! Each provision consumes the next [`Step`]; the factory counts provisions
//! and destroys so tests can assert every sandbox was released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::error::{SandboxError, SandboxResult};
use super::job::{JobOutput, ResourceLimits, SandboxJob};
use super::{Sandbox, SandboxFactory};

/// Scripted behavior of one provisioned sandbox.
#[derive(Debug, Clone)]
pub enum Step {
    /// Exit 0 with this artifact.
    Artifact(Vec<u8>),
    /// Sleep, then exit 0 with this artifact.
    Slow(Duration, Vec<u8>),
    /// Exit 0 without producing an artifact.
    NoArtifact,
    /// Non-zero exit with this stderr.
    Fault(String),
    /// Report a timeout without waiting.
    Timeout,
    /// Report a resource ceiling breach.
    ResourceExceeded,
    /// Never finish.
    Hang,
    /// Fail provisioning.
    Unavailable(String),
}

#[derive(Debug)]
pub struct ScriptedFactory {
    steps: Mutex<VecDeque<Step>>,
    provisioned: AtomicUsize,
    destroyed: Arc<AtomicUsize>,
    jobs: Arc<Mutex<Vec<SandboxJob>>>,
}

impl ScriptedFactory {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            provisioned: AtomicUsize::new(0),
            destroyed: Arc::new(AtomicUsize::new(0)),
            jobs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Provision calls so far, including failed ones.
    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Jobs executed so far, in order.
    pub fn jobs(&self) -> Vec<SandboxJob> {
        self.jobs.lock().map(|j| j.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SandboxFactory for ScriptedFactory {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn provision(&self, _limits: &ResourceLimits) -> SandboxResult<Box<dyn Sandbox>> {
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .ok_or_else(|| SandboxError::Unavailable("no scripted steps left".into()))?;

        if let Step::Unavailable(msg) = step {
            return Err(SandboxError::Unavailable(msg));
        }
        Ok(Box::new(ScriptedSandbox {
            step,
            destroyed: Arc::clone(&self.destroyed),
            jobs: Arc::clone(&self.jobs),
        }))
    }
}

struct ScriptedSandbox {
    step: Step,
    destroyed: Arc<AtomicUsize>,
    jobs: Arc<Mutex<Vec<SandboxJob>>>,
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn execute(&mut self, job: &SandboxJob) -> SandboxResult<JobOutput> {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(job.clone());
        }
        let done = |artifact: Option<Vec<u8>>| JobOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            artifact,
        };

        match self.step.clone() {
            Step::Artifact(bytes) => Ok(done(Some(bytes))),
            Step::Slow(delay, bytes) => {
                tokio::time::sleep(delay).await;
                Ok(done(Some(bytes)))
            }
            Step::NoArtifact => Ok(done(None)),
            Step::Fault(stderr) => Err(SandboxError::Fault { stderr }),
            Step::Timeout => Err(SandboxError::Timeout {
                limit_ms: job.timeout.as_millis() as u64,
            }),
            Step::ResourceExceeded => Err(SandboxError::ResourceExceeded(format!(
                "memory above {} MiB",
                job.limits.memory_mib
            ))),
            Step::Hang => {
                std::future::pending::<()>().await;
                Ok(done(None))
            }
            Step::Unavailable(msg) => Err(SandboxError::Unavailable(msg)),
        }
    }

    async fn destroy(self: Box<Self>) -> SandboxResult<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
