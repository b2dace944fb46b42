//! Slurm backend driven through the `slurmrestd` HTTP API.
//!
//! The REST API returns as soon as the job is queued, so completion is
//! observed by polling the job until it reaches a terminal state or the
//! controller forgets it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{
    JobProperties, ProcessHandle, SchedulerClient, SchedulerError, SchedulerJobId, Submission,
};

/// Environment passed to jobs submitted over the API, which unlike `sbatch`
/// does not inherit one.
const DEFAULT_JOB_ENVIRONMENT: &[&str] = &["PATH=/usr/local/bin:/usr/bin:/bin"];

/// Connection settings for `slurmrestd`.
#[derive(Debug, Clone)]
pub struct SlurmRestConfig {
    /// Base URL, e.g. `http://slurmrestd:6820`.
    pub base_url: String,

    /// API version path segment, e.g. `v0.0.40`.
    pub api_version: String,

    /// Value for `X-SLURM-USER-NAME`.
    pub user_name: Option<String>,

    /// Value for `X-SLURM-USER-TOKEN`.
    pub token: Option<String>,

    /// Interval between completion polls.
    pub poll_interval: Duration,

    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl SlurmRestConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_version: "v0.0.40".to_string(),
            user_name: None,
            token: None,
            poll_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    script: &'a str,
    job: SubmitJob<'a>,
}

#[derive(Debug, Serialize)]
struct SubmitJob<'a> {
    current_working_directory: &'a str,
    environment: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    job_id: Option<u64>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<JobProperties>,
}

/// Scheduler client for `slurmrestd`.
#[derive(Clone)]
pub struct SlurmRestClient {
    client: reqwest::Client,
    config: Arc<SlurmRestConfig>,
}

impl SlurmRestClient {
    /// Create a new REST client.
    pub fn new(config: SlurmRestConfig) -> Result<Self, SchedulerError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/slurm/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version,
            path
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, self.url(path));
        if let Some(user) = &self.config.user_name {
            builder = builder.header("X-SLURM-USER-NAME", user);
        }
        if let Some(token) = &self.config.token {
            builder = builder.header("X-SLURM-USER-TOKEN", token);
        }
        builder
    }

    async fn error_from(response: reqwest::Response) -> SchedulerError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        SchedulerError::Api { status, body }
    }

    /// Poll until the job is terminal or unknown to the scheduler.
    async fn wait_for_completion(self, id: SchedulerJobId) -> Result<(), SchedulerError> {
        let mut consecutive_failures = 0u32;
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.tick().await;

        loop {
            interval.tick().await;
            match self.get_job(id).await {
                Ok(props) if props.is_terminal() => {
                    debug!(
                        scheduler_job_id = %id,
                        state = ?props.state(),
                        "Job reached terminal state"
                    );
                    return Ok(());
                }
                Ok(_) => {
                    consecutive_failures = 0;
                }
                Err(SchedulerError::NotFound(_)) => {
                    debug!(scheduler_job_id = %id, "Job no longer known to scheduler");
                    return Ok(());
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures <= 3 {
                        warn!(
                            scheduler_job_id = %id,
                            error = %e,
                            consecutive_failures,
                            "Completion poll failed"
                        );
                    } else {
                        error!(
                            scheduler_job_id = %id,
                            error = %e,
                            consecutive_failures,
                            "Completion poll failed repeatedly"
                        );
                    }
                }
            }
        }
    }
}

#[async_trait]
impl SchedulerClient for SlurmRestClient {
    fn name(&self) -> &'static str {
        "slurmrest"
    }

    async fn submit_batch(
        &self,
        script_path: &Path,
        working_dir: &Path,
    ) -> Result<Submission, SchedulerError> {
        let script = tokio::fs::read_to_string(script_path)
            .await
            .map_err(|source| SchedulerError::Script {
                path: script_path.display().to_string(),
                source,
            })?;
        let working_dir = working_dir.display().to_string();

        let body = SubmitRequest {
            script: &script,
            job: SubmitJob {
                current_working_directory: &working_dir,
                environment: DEFAULT_JOB_ENVIRONMENT.to_vec(),
            },
        };

        let response = self
            .request(reqwest::Method::POST, "job/submit")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let submitted: SubmitResponse = response.json().await?;
        let scheduler_job_id = submitted
            .job_id
            .and_then(SchedulerJobId::new)
            .ok_or_else(|| {
                SchedulerError::Parse(format!(
                    "submit response carried no job id (errors: {:?})",
                    submitted.errors
                ))
            })?;

        info!(
            scheduler_job_id = %scheduler_job_id,
            script = %script_path.display(),
            "Batch job submitted via slurmrestd"
        );

        let poller = self.clone();
        let handle = ProcessHandle::new(poller.wait_for_completion(scheduler_job_id));

        Ok(Submission {
            scheduler_job_id,
            handle,
        })
    }

    async fn cancel_job(&self, id: SchedulerJobId) -> Result<(), SchedulerError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("job/{id}"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        info!(scheduler_job_id = %id, "Cancellation requested via slurmrestd");
        Ok(())
    }

    async fn get_job(&self, id: SchedulerJobId) -> Result<JobProperties, SchedulerError> {
        let response = self
            .request(reqwest::Method::GET, &format!("job/{id}"))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SchedulerError::NotFound(id));
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body: JobsResponse = response.json().await?;
        body.jobs
            .into_iter()
            .find(|job| job.job_id == id.get())
            .ok_or(SchedulerError::NotFound(id))
    }
}
