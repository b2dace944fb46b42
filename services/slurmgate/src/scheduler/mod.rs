//! Scheduler backend interface.
//!
//! The scheduler interface abstracts the external batch scheduler:
//! - Submitting a batch script and tracking its completion
//! - Cancelling a running job
//! - Querying live job properties
//!
//! Implementations:
//! - [`SlurmCliClient`]: shells out to `sbatch`, `scancel` and `scontrol`
//! - [`SlurmRestClient`]: talks to `slurmrestd`
//! - [`MockScheduler`]: in-process backend for tests and development

mod cli;
mod mock;
mod rest;

use std::fmt;
use std::future::Future;
use std::num::NonZeroU64;
use std::path::Path;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub use cli::{SlurmCliClient, SlurmCliConfig};
pub use mock::MockScheduler;
pub use rest::{SlurmRestClient, SlurmRestConfig};

/// Errors from scheduler backends.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A scheduler command could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The batch script could not be read for submission.
    #[error("failed to read batch script {path}: {source}")]
    Script {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A scheduler command exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    /// The scheduler API answered with an error status.
    #[error("scheduler API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The scheduler API could not be reached.
    #[error("scheduler API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Output did not carry the expected content.
    #[error("{0}")]
    Parse(String),

    /// Scheduler JSON could not be decoded.
    #[error("invalid scheduler JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The scheduler does not know the job.
    #[error("scheduler job {0} not found")]
    NotFound(SchedulerJobId),
}

/// Job id assigned by the scheduler. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulerJobId(NonZeroU64);

impl SchedulerJobId {
    /// Wrap a raw id; zero is not a valid scheduler job id.
    #[must_use]
    pub fn new(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    /// Get the raw id.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for SchedulerJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse the job id from the first line of submission output.
///
/// `sbatch` prints `Submitted batch job <id>`; the id is the final
/// whitespace-separated token.
pub fn parse_submission_line(line: &str) -> Result<SchedulerJobId, SchedulerError> {
    let token = line
        .split_whitespace()
        .last()
        .ok_or_else(|| SchedulerError::Parse("empty submission output".to_string()))?;

    let raw: u64 = token.parse().map_err(|_| {
        SchedulerError::Parse(format!("no job id in submission output: {line:?}"))
    })?;

    SchedulerJobId::new(raw)
        .ok_or_else(|| SchedulerError::Parse(format!("scheduler assigned job id 0: {line:?}")))
}

/// Slurm states after which a job will not run again.
const TERMINAL_STATES: &[&str] = &[
    "COMPLETED",
    "FAILED",
    "CANCELLED",
    "TIMEOUT",
    "NODE_FAIL",
    "PREEMPTED",
    "OUT_OF_MEMORY",
    "BOOT_FAIL",
    "DEADLINE",
];

/// Returns true if the Slurm job state is terminal.
pub fn is_terminal_state(state: &str) -> bool {
    // scontrol may append a reason, e.g. "CANCELLED by 1000"
    let head = state.split_whitespace().next().unwrap_or_default();
    TERMINAL_STATES
        .iter()
        .any(|terminal| head.eq_ignore_ascii_case(terminal))
}

/// Scheduler-reported job properties.
///
/// The well-known fields are decoded; everything else the scheduler returned
/// is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProperties {
    #[serde(default)]
    pub job_id: u64,

    #[serde(default)]
    pub name: String,

    /// Current state, e.g. `PENDING` or `RUNNING`.
    #[serde(default, deserialize_with = "deserialize_job_state")]
    pub job_state: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_time: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<serde_json::Value>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobProperties {
    /// The primary state, if any was reported.
    pub fn state(&self) -> Option<&str> {
        self.job_state.first().map(String::as_str)
    }

    /// Returns true if the reported state is terminal.
    pub fn is_terminal(&self) -> bool {
        self.job_state.iter().any(|s| is_terminal_state(s))
    }
}

/// Older Slurm releases report `job_state` as a string, newer ones as a list.
fn deserialize_job_state<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StateRepr {
        One(String),
        Many(Vec<String>),
        Missing(()),
    }

    Ok(match StateRepr::deserialize(deserializer)? {
        StateRepr::One(s) => vec![s],
        StateRepr::Many(v) => v,
        StateRepr::Missing(()) => Vec::new(),
    })
}

/// Handle to a submitted job. Resolves when the job terminates.
pub struct ProcessHandle {
    completion: BoxFuture<'static, Result<(), SchedulerError>>,
}

impl ProcessHandle {
    /// Wrap a future that completes when the scheduler job ends.
    pub fn new<F>(completion: F) -> Self
    where
        F: Future<Output = Result<(), SchedulerError>> + Send + 'static,
    {
        Self {
            completion: Box::pin(completion),
        }
    }

    /// Wait for the job to end, whether it completed or was cancelled.
    pub async fn wait(self) -> Result<(), SchedulerError> {
        self.completion.await
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle").finish_non_exhaustive()
    }
}

/// Result of a successful submission.
#[derive(Debug)]
pub struct Submission {
    pub scheduler_job_id: SchedulerJobId,
    pub handle: ProcessHandle,
}

/// Scheduler backend interface.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Submit a batch script and return once the scheduler has assigned an id.
    async fn submit_batch(
        &self,
        script_path: &Path,
        working_dir: &Path,
    ) -> Result<Submission, SchedulerError>;

    /// Request termination of a job. Local state is not touched.
    async fn cancel_job(&self, id: SchedulerJobId) -> Result<(), SchedulerError>;

    /// Query live properties of a job.
    async fn get_job(&self, id: SchedulerJobId) -> Result<JobProperties, SchedulerError>;
}
