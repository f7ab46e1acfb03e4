//! HTTP client for a remote sandbox service.
//!
//! Protocol:
//!
//! - `POST {endpoint}/v1/jobs` with the job as JSON runs it to completion.
//!   `200` returns the artifact bytes as the body (empty body: no artifact),
//!   `408`/`504` report a timeout, `413` a resource ceiling breach and `422`
//!   a failed run with `{"stderr": ..., "exit_code": ...}`. Every other
//!   status (`401`/`403` for a bad token, `429`, `5xx`, ...) says nothing
//!   about the code and means the service cannot take the job.
//! - `DELETE {endpoint}/v1/jobs/{job_id}` releases anything the service kept
//!   for the job. Best effort.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{SandboxError, SandboxResult};
use super::job::{duration_ms, JobOutput, ResourceLimits, SandboxJob};
use super::{Sandbox, SandboxFactory};

/// Extra time the HTTP request gets on top of the job's own timeout.
const REQUEST_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RemoteSandboxFactory {
    endpoint: String,
    api_token: Option<String>,
    http_client: reqwest::Client,
}

impl RemoteSandboxFactory {
    pub fn new(endpoint: impl Into<String>, api_token: Option<String>) -> SandboxResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("vizrender/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SandboxError::Unavailable(format!("cannot build http client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_token,
            http_client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SandboxFactory for RemoteSandboxFactory {
    fn name(&self) -> &str {
        "remote"
    }

    async fn provision(&self, limits: &ResourceLimits) -> SandboxResult<Box<dyn Sandbox>> {
        Ok(Box::new(RemoteSandbox {
            job_id: Uuid::new_v4(),
            factory: self.clone(),
            limits: limits.clone(),
            submitted: false,
        }))
    }
}

struct RemoteSandbox {
    job_id: Uuid,
    factory: RemoteSandboxFactory,
    limits: ResourceLimits,
    submitted: bool,
}

#[derive(Serialize)]
struct JobRequest<'a> {
    job_id: Uuid,
    code: &'a str,
    script_name: &'a str,
    command: &'a [String],
    artifact_name: &'a str,
    limits: &'a ResourceLimits,
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    timeout: Duration,
}

#[derive(Deserialize)]
struct FaultBody {
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    exit_code: Option<i32>,
}

impl RemoteSandbox {
    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let req = self.factory.http_client.request(method, url);
        match &self.factory.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl Sandbox for RemoteSandbox {
    async fn execute(&mut self, job: &SandboxJob) -> SandboxResult<JobOutput> {
        let body = JobRequest {
            job_id: self.job_id,
            code: &job.code,
            script_name: &job.script_name,
            command: &job.command,
            artifact_name: &job.artifact_name,
            limits: &self.limits,
            timeout: job.timeout,
        };
        let url = format!("{}/v1/jobs", self.factory.endpoint);
        self.submitted = true;

        let response = self
            .request(reqwest::Method::POST, url)
            .timeout(job.timeout + REQUEST_GRACE)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, job.timeout))?;

        let status = response.status();
        debug!(job_id = %self.job_id, status = status.as_u16(), "remote sandbox responded");
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, job.timeout))?;

        match status {
            StatusCode::OK => {
                if bytes.len() as u64 > self.limits.max_artifact_bytes {
                    return Err(SandboxError::ResourceExceeded(format!(
                        "artifact is {} bytes, limit {}",
                        bytes.len(),
                        self.limits.max_artifact_bytes
                    )));
                }
                Ok(JobOutput {
                    exit_code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                    artifact: (!bytes.is_empty()).then(|| bytes.to_vec()),
                })
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                Err(SandboxError::Timeout {
                    limit_ms: job.timeout.as_millis() as u64,
                })
            }
            StatusCode::PAYLOAD_TOO_LARGE => Err(SandboxError::ResourceExceeded(
                String::from_utf8_lossy(&bytes).into_owned(),
            )),
            StatusCode::UNPROCESSABLE_ENTITY => {
                let stderr = match serde_json::from_slice::<FaultBody>(&bytes) {
                    Ok(fault) => {
                        debug!(exit_code = ?fault.exit_code, "remote job failed");
                        fault.stderr
                    }
                    Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
                };
                Err(SandboxError::Fault { stderr })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(job_id = %self.job_id, status = status.as_u16(), "sandbox service refused credentials");
                Err(SandboxError::Unavailable(format!(
                    "sandbox service refused credentials ({status})"
                )))
            }
            s => Err(SandboxError::Unavailable(format!(
                "sandbox service returned {s}"
            ))),
        }
    }

    async fn destroy(self: Box<Self>) -> SandboxResult<()> {
        if !self.submitted {
            return Ok(());
        }
        let url = format!("{}/v1/jobs/{}", self.factory.endpoint, self.job_id);
        match self
            .request(reqwest::Method::DELETE, url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND => {}
            Ok(resp) => warn!(job_id = %self.job_id, status = resp.status().as_u16(), "remote job cleanup refused"),
            Err(e) => warn!(job_id = %self.job_id, error = %e, "remote job cleanup failed"),
        }
        Ok(())
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> SandboxError {
    if err.is_timeout() {
        SandboxError::Timeout {
            limit_ms: timeout.as_millis() as u64,
        }
    } else {
        SandboxError::Unavailable(err.to_string())
    }
}
