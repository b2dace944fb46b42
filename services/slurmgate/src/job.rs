//! Job entity and status model.
//!
//! A job's identity, name, directory and spec never change after creation.
//! Its mutable state sits behind a per-job mutex so transitions on one job
//! never serialize against another.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slurmgate_id::{JobId, TenantId};
use tokio::sync::{watch, Mutex, MutexGuard, TryLockError};

use crate::batch::BatchSpec;
use crate::error::Error;
use crate::scheduler::{JobProperties, SchedulerJobId};

/// File name of the rendered batch script inside a job directory.
pub const BATCH_SCRIPT: &str = "batch.sh";

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Not submitted, or the last submission has ended.
    Stopped,
    /// Submitted to the scheduler and not yet observed to end.
    Started,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Stopped => "stopped",
            JobStatus::Started => "started",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(JobStatus::Started),
            "stopped" => Ok(JobStatus::Stopped),
            other => Err(Error::Validation(format!(
                "unknown job status {other:?}, expected \"started\" or \"stopped\""
            ))),
        }
    }
}

/// Last scheduler-reported properties and when they were fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedProperties {
    pub properties: JobProperties,
    pub refreshed_at: DateTime<Utc>,
}

/// Mutable per-job state.
///
/// `scheduler_job_id` is `Some` exactly when `status` is `Started`. Every
/// start opens a new run; watcher and reconciler writes carry the run they
/// were issued for and are dropped if the job has moved on.
#[derive(Debug)]
pub struct JobState {
    status: JobStatus,
    scheduler_job_id: Option<SchedulerJobId>,
    run: u64,
    scheduler_job: Option<CachedProperties>,
    cancel_requested: bool,
    retired: bool,
}

impl JobState {
    fn new() -> Self {
        Self {
            status: JobStatus::Stopped,
            scheduler_job_id: None,
            run: 0,
            scheduler_job: None,
            cancel_requested: false,
            retired: false,
        }
    }

    /// True if a cancel was accepted for the current run.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub(crate) fn mark_cancel_requested(&mut self) {
        self.cancel_requested = true;
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn scheduler_job_id(&self) -> Option<SchedulerJobId> {
        self.scheduler_job_id
    }

    /// Current run number; 0 before the first start.
    pub fn run(&self) -> u64 {
        self.run
    }

    pub fn scheduler_job(&self) -> Option<&CachedProperties> {
        self.scheduler_job.as_ref()
    }

    /// True once the job has been deleted.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// `Stopped -> Started`. Returns the new run number.
    pub(crate) fn mark_started(&mut self, id: SchedulerJobId) -> u64 {
        debug_assert_eq!(self.status, JobStatus::Stopped);
        self.run += 1;
        self.status = JobStatus::Started;
        self.scheduler_job_id = Some(id);
        self.scheduler_job = None;
        self.cancel_requested = false;
        self.run
    }

    /// `Started -> Stopped` for the given run.
    ///
    /// Returns false, changing nothing, if that run already ended.
    pub(crate) fn mark_stopped(&mut self, run: u64) -> bool {
        if self.run != run || self.status != JobStatus::Started {
            return false;
        }
        self.status = JobStatus::Stopped;
        self.scheduler_job_id = None;
        self.scheduler_job = None;
        self.cancel_requested = false;
        true
    }

    /// Store freshly queried properties if the job is still in `run` under
    /// scheduler id `id`.
    pub(crate) fn refresh(
        &mut self,
        run: u64,
        id: SchedulerJobId,
        properties: JobProperties,
        refreshed_at: DateTime<Utc>,
    ) -> bool {
        if self.run != run
            || self.status != JobStatus::Started
            || self.scheduler_job_id != Some(id)
        {
            return false;
        }
        self.scheduler_job = Some(CachedProperties {
            properties,
            refreshed_at,
        });
        true
    }

    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }
}

/// A job owned by one tenant.
pub struct Job {
    id: JobId,
    tenant_id: TenantId,
    name: String,
    directory: PathBuf,
    spec: BatchSpec,
    created_at: DateTime<Utc>,
    state: Mutex<JobState>,
    status_tx: watch::Sender<JobStatus>,
    /// Highest run number that has ended.
    ended_tx: watch::Sender<u64>,
}

impl Job {
    pub(crate) fn new(id: JobId, tenant_id: TenantId, directory: PathBuf, spec: BatchSpec) -> Self {
        let (status_tx, _) = watch::channel(JobStatus::Stopped);
        let (ended_tx, _) = watch::channel(0);
        Self {
            id,
            tenant_id,
            name: spec.job_name.clone(),
            directory,
            spec,
            created_at: Utc::now(),
            state: Mutex::new(JobState::new()),
            status_tx,
            ended_tx,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn script_path(&self) -> PathBuf {
        self.directory.join(BATCH_SCRIPT)
    }

    pub fn spec(&self) -> &BatchSpec {
        &self.spec
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Enter the job's exclusive section.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().await
    }

    /// Enter the exclusive section only if nobody else is in it.
    pub(crate) fn try_lock(&self) -> Result<MutexGuard<'_, JobState>, TryLockError> {
        self.state.try_lock()
    }

    /// Announce a status change. Call while holding the job lock.
    pub(crate) fn publish(&self, status: JobStatus) {
        self.status_tx.send_replace(status);
    }

    /// Announce that `run` ended. Call while holding the job lock.
    pub(crate) fn publish_run_end(&self, run: u64) {
        self.ended_tx.send_if_modified(|ended| {
            if run > *ended {
                *ended = run;
                true
            } else {
                false
            }
        });
    }

    /// Current status and scheduler fields.
    pub async fn snapshot(&self) -> JobSnapshot {
        let state = self.lock().await;
        self.snapshot_locked(&state)
    }

    pub(crate) fn snapshot_locked(&self, state: &JobState) -> JobSnapshot {
        let cached = state.scheduler_job();
        JobSnapshot {
            id: self.id,
            name: self.name.clone(),
            status: state.status(),
            run: state.run(),
            scheduler_job_id: state.scheduler_job_id().map_or(0, |id| id.get()),
            scheduler_job: cached.map(|c| c.properties.clone()),
            scheduler_job_refreshed_at: cached.map(|c| c.refreshed_at),
            created_at: self.created_at,
        }
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }

    /// Wait until the current status equals `status`.
    ///
    /// Only the latest status is observed. A stop followed by a restart
    /// before this task runs is missed; use [`Job::wait_for_run_end`] to wait
    /// for a specific run.
    pub async fn wait_for_status(&self, status: JobStatus) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this only returns on a match.
        let _ = rx.wait_for(|current| *current == status).await;
    }

    /// Wait until run `run` has ended, even if a later run already started.
    pub async fn wait_for_run_end(&self, run: u64) {
        let mut rx = self.ended_tx.subscribe();
        let _ = rx.wait_for(|ended| *ended >= run).await;
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("name", &self.name)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a job, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    /// Number of starts so far; pass to [`Job::wait_for_run_end`].
    pub run: u64,
    /// 0 when the job is not started.
    pub scheduler_job_id: u64,
    pub scheduler_job: Option<JobProperties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_job_refreshed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
