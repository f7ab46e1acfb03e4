//! Sandbox job and result types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resource ceiling requested for one sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub cpus: f64,
    pub memory_mib: u64,
    /// Per-stream cap on captured stdout/stderr. Excess output is dropped.
    pub max_output_bytes: usize,
    /// Artifacts larger than this fail the job.
    pub max_artifact_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpus: 1.0,
            memory_mib: 512,
            max_output_bytes: 64 * 1024,
            max_artifact_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Untrusted code plus everything needed to run it once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxJob {
    /// Source written to `script_name` in the sandbox working directory.
    pub code: String,
    pub script_name: String,
    /// Program and arguments, run from the working directory.
    pub command: Vec<String>,
    /// File name of the artifact the command produces.
    pub artifact_name: String,
    pub limits: ResourceLimits,
    /// Hard wall-clock budget for the command.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

/// What a finished command left behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub artifact: Option<Vec<u8>>,
}

impl JobOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
