//! Local child-process sandbox.
//!
//! Each sandbox is a fresh temporary working directory. The command runs in
//! it with a cleared environment and piped output capped per stream. On Unix
//! it leads its own process group, and the whole group is killed when the
//! command exits, times out or the sandbox is destroyed, so nothing it forks
//! outlives the job. Memory and CPU ceilings are not enforced locally; use
//! the remote backend where those matter.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::{SandboxError, SandboxResult};
use super::job::{JobOutput, ResourceLimits, SandboxJob};
use super::{Sandbox, SandboxFactory};

/// `PATH` inside the sandbox.
pub const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// How deep to look for an artifact that the command wrote into a
/// subdirectory rather than the working directory.
const ARTIFACT_SEARCH_DEPTH: usize = 6;

#[derive(Debug, Clone, Default)]
pub struct ProcessSandboxFactory {
    /// Parent for sandbox directories; the system temp dir when `None`.
    root: Option<PathBuf>,
}

impl ProcessSandboxFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

#[async_trait]
impl SandboxFactory for ProcessSandboxFactory {
    fn name(&self) -> &str {
        "process"
    }

    async fn provision(&self, limits: &ResourceLimits) -> SandboxResult<Box<dyn Sandbox>> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("vizrender-job-");
            b
        };
        let dir = match &self.root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| SandboxError::Unavailable(format!("cannot create sandbox dir: {e}")))?;

        debug!(dir = %dir.path().display(), "process sandbox provisioned");
        Ok(Box::new(ProcessSandbox {
            dir,
            limits: limits.clone(),
            process_group: None,
        }))
    }
}

pub struct ProcessSandbox {
    dir: TempDir,
    limits: ResourceLimits,
    /// Group led by the last spawned command.
    process_group: Option<u32>,
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn execute(&mut self, job: &SandboxJob) -> SandboxResult<JobOutput> {
        let (program, args) = job
            .command
            .split_first()
            .ok_or_else(|| SandboxError::InvalidJob("empty command".into()))?;
        if job.script_name.contains(['/', '\\']) || job.artifact_name.contains(['/', '\\']) {
            return Err(SandboxError::InvalidJob(
                "script and artifact names must be plain file names".into(),
            ));
        }

        let workdir = self.dir.path();
        tokio::fs::write(workdir.join(&job.script_name), &job.code).await?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(workdir)
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .env("HOME", workdir)
            .env("TMPDIR", workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| SandboxError::Unavailable(format!("cannot start {program}: {e}")))?;
        let group = child.id();
        self.process_group = group;

        let cap = self.limits.max_output_bytes;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = async {
            // Background children may hold the pipes open; kill them as soon
            // as the command itself exits so the readers see EOF.
            let wait = async {
                let status = child.wait().await;
                kill_process_group(group);
                status
            };
            let (out, err, status) =
                tokio::join!(read_capped(stdout, cap), read_capped(stderr, cap), wait);
            Ok::<_, std::io::Error>((out?, err?, status?))
        };
        let finished = tokio::time::timeout(job.timeout, run).await;

        let (stdout, stderr, status) = match finished {
            Ok(result) => result?,
            Err(_) => {
                kill_process_group(group);
                let _ = child.start_kill();
                return Err(SandboxError::Timeout {
                    limit_ms: job.timeout.as_millis() as u64,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        if !status.success() {
            return Err(SandboxError::Fault { stderr });
        }

        let artifact = match find_artifact(workdir, &job.artifact_name).await? {
            Some(path) => {
                let size = tokio::fs::metadata(&path).await?.len();
                if size > self.limits.max_artifact_bytes {
                    return Err(SandboxError::ResourceExceeded(format!(
                        "artifact is {size} bytes, limit {}",
                        self.limits.max_artifact_bytes
                    )));
                }
                Some(tokio::fs::read(&path).await?)
            }
            None => None,
        };

        Ok(JobOutput {
            exit_code: status.code(),
            stdout,
            stderr,
            artifact,
        })
    }

    async fn destroy(self: Box<Self>) -> SandboxResult<()> {
        let ProcessSandbox {
            dir, process_group, ..
        } = *self;
        kill_process_group(process_group);
        let path = dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(|e| SandboxError::Unavailable(format!("destroy task failed: {e}")))??;
        debug!(dir = %path.display(), "process sandbox destroyed");
        Ok(())
    }
}

/// SIGKILL every process in the group led by `leader`. An empty or
/// already-reaped group is not an error.
#[cfg(unix)]
fn kill_process_group(leader: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(raw) = leader.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pgid = raw, "sandbox process group killed"),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pgid = raw, error = %e, "cannot kill sandbox process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_leader: Option<u32>) {}

/// Read to EOF, keeping at most `cap` bytes.
async fn read_capped<R: AsyncRead + Unpin>(
    reader: Option<R>,
    cap: usize,
) -> std::io::Result<Vec<u8>> {
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        let room = cap.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
}

/// The working directory's `name`, or the first file called `name` below it.
async fn find_artifact(workdir: &Path, name: &str) -> std::io::Result<Option<PathBuf>> {
    let direct = workdir.join(name);
    if tokio::fs::metadata(&direct).await.is_ok_and(|m| m.is_file()) {
        return Ok(Some(direct));
    }

    let mut level = vec![workdir.to_path_buf()];
    for _ in 0..ARTIFACT_SEARCH_DEPTH {
        let mut next = Vec::new();
        for dir in level {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    next.push(entry.path());
                } else if file_type.is_file() && entry.file_name() == name {
                    return Ok(Some(entry.path()));
                }
            }
        }
        if next.is_empty() {
            break;
        }
        level = next;
    }
    Ok(None)
}
