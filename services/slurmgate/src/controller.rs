//! Job lifecycle controller.
//!
//! Every transition on a job runs inside that job's exclusive section:
//! - `start` renders `batch.sh`, submits it and spawns a completion watcher
//! - `stop` asks the scheduler to cancel and leaves the status alone; the
//!   watcher flips the job to `Stopped` once the process actually exits
//! - `delete` cancels a running job, removes its directory, then retires
//!   and unregisters it

use std::sync::Arc;

use slurmgate_id::JobId;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchRenderer, BatchSpec};
use crate::error::{Error, Result};
use crate::job::{Job, JobSnapshot, JobStatus, JobState, BATCH_SCRIPT};
use crate::scheduler::{ProcessHandle, SchedulerClient, SchedulerJobId, Submission};
use crate::tenant::Tenant;

/// Drives jobs through their lifecycle against a scheduler backend.
pub struct JobController {
    scheduler: Arc<dyn SchedulerClient>,
    renderer: Arc<dyn BatchRenderer>,
}

impl JobController {
    pub fn new(scheduler: Arc<dyn SchedulerClient>, renderer: Arc<dyn BatchRenderer>) -> Self {
        Self {
            scheduler,
            renderer,
        }
    }

    pub fn scheduler(&self) -> &Arc<dyn SchedulerClient> {
        &self.scheduler
    }

    /// Create a stopped job under `tenant`.
    ///
    /// The job directory and its `batch.sh` exist before the job becomes
    /// visible in the tenant's registry.
    pub async fn create(&self, tenant: &Tenant, spec: BatchSpec) -> Result<Arc<Job>> {
        spec.validate()?;

        let id = JobId::new();
        let jobs_dir = tenant.jobs_dir();
        tokio::fs::create_dir_all(&jobs_dir).await?;

        let directory = jobs_dir.join(id.to_string());
        // create_dir fails on an existing path, so two jobs never share one.
        tokio::fs::create_dir(&directory).await?;

        let job = Arc::new(Job::new(id, tenant.id().clone(), directory, spec));

        let registered = match self.render_script(&job).await {
            Ok(()) => tenant
                .jobs()
                .insert_new(id.to_string(), Arc::clone(&job))
                .await
                .map_err(Error::from),
            Err(e) => Err(e),
        };
        if let Err(e) = registered {
            if let Err(cleanup) = tokio::fs::remove_dir_all(job.directory()).await {
                warn!(
                    job_id = %id,
                    error = %cleanup,
                    "Failed to remove directory of rejected job"
                );
            }
            return Err(e);
        }

        info!(
            tenant_id = %tenant.id(),
            job_id = %id,
            job_name = %job.name(),
            "Job created"
        );

        Ok(job)
    }

    /// Submit a stopped job. Starting a started job is a no-op.
    pub async fn start(&self, job: &Arc<Job>) -> Result<JobSnapshot> {
        let mut state = job.lock().await;
        ensure_live(job, &state)?;

        if state.status() == JobStatus::Started {
            debug!(job_id = %job.id(), "Job already started");
            return Ok(job.snapshot_locked(&state));
        }

        self.render_script(job).await?;

        let Submission {
            scheduler_job_id,
            handle,
        } = self
            .scheduler
            .submit_batch(&job.script_path(), job.directory())
            .await
            .inspect_err(|e| {
                warn!(job_id = %job.id(), error = %e, "Submission failed");
            })?;

        let run = state.mark_started(scheduler_job_id);
        job.publish(JobStatus::Started);

        info!(
            tenant_id = %job.tenant_id(),
            job_id = %job.id(),
            scheduler_job_id = %scheduler_job_id,
            run,
            scheduler = self.scheduler.name(),
            "Job started"
        );

        spawn_watcher(Arc::clone(job), run, scheduler_job_id, handle);

        Ok(job.snapshot_locked(&state))
    }

    /// Request cancellation of a started job.
    ///
    /// The returned snapshot still reads `Started`; the job becomes
    /// `Stopped` when the scheduler process exits. Stopping a stopped job,
    /// or one whose cancel was already accepted, does not touch the
    /// scheduler.
    pub async fn stop(&self, job: &Job) -> Result<JobSnapshot> {
        let mut state = job.lock().await;
        ensure_live(job, &state)?;
        self.cancel_locked(job, &mut state).await?;
        Ok(job.snapshot_locked(&state))
    }

    /// Move a job towards `desired`, one of `started` or `stopped`.
    pub async fn set_status(&self, job: &Arc<Job>, desired: &str) -> Result<JobSnapshot> {
        match desired.parse::<JobStatus>()? {
            JobStatus::Started => self.start(job).await,
            JobStatus::Stopped => self.stop(job).await,
        }
    }

    /// Cancel if running, delete the job directory, then remove the job
    /// from `tenant`.
    ///
    /// If the cancel or the directory removal fails the job stays
    /// registered, so the delete can be retried.
    pub async fn delete(&self, tenant: &Tenant, job: &Job) -> Result<()> {
        let mut state = job.lock().await;
        ensure_live(job, &state)?;
        self.cancel_locked(job, &mut state).await?;

        match tokio::fs::remove_dir_all(job.directory()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(job_id = %job.id(), "Job directory already gone");
            }
            Err(e) => {
                warn!(job_id = %job.id(), error = %e, "Failed to remove job directory");
                return Err(Error::Io(e));
            }
        }

        state.retire();
        tenant.jobs().delete(&job.id().to_string()).await?;
        drop(state);

        info!(tenant_id = %tenant.id(), job_id = %job.id(), "Job deleted");
        Ok(())
    }

    async fn cancel_locked(&self, job: &Job, state: &mut JobState) -> Result<()> {
        let Some(scheduler_job_id) = state.scheduler_job_id() else {
            debug!(job_id = %job.id(), "Job not started, nothing to cancel");
            return Ok(());
        };
        if state.cancel_requested() {
            debug!(job_id = %job.id(), %scheduler_job_id, "Cancel already requested");
            return Ok(());
        }

        self.scheduler
            .cancel_job(scheduler_job_id)
            .await
            .inspect_err(|e| {
                warn!(
                    job_id = %job.id(),
                    %scheduler_job_id,
                    error = %e,
                    "Cancel failed"
                );
            })?;
        state.mark_cancel_requested();

        info!(job_id = %job.id(), %scheduler_job_id, "Cancel requested");
        Ok(())
    }

    /// Write `batch.sh` for the job's spec.
    ///
    /// The script is written next to its final path and renamed into place
    /// so the scheduler never reads a partial file.
    async fn render_script(&self, job: &Job) -> Result<()> {
        let mut buf = Vec::new();
        self.renderer.render(job.spec(), &mut buf)?;

        let staging = job.directory().join(format!(".{BATCH_SCRIPT}.tmp"));
        tokio::fs::write(&staging, &buf).await?;
        tokio::fs::rename(&staging, job.script_path()).await?;
        Ok(())
    }
}

fn ensure_live(job: &Job, state: &JobState) -> Result<()> {
    if state.is_retired() {
        return Err(Error::JobNotFound(job.id().to_string()));
    }
    Ok(())
}

/// Watch one run of a job and mark it stopped when the process ends.
///
/// The completion wait runs in its own task so a panic there still ends
/// the run.
fn spawn_watcher(
    job: Arc<Job>,
    run: u64,
    scheduler_job_id: SchedulerJobId,
    handle: ProcessHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::spawn(handle.wait()).await {
            Ok(Ok(())) => {
                debug!(job_id = %job.id(), %scheduler_job_id, run, "Scheduler process exited");
            }
            Ok(Err(e)) => {
                warn!(
                    job_id = %job.id(),
                    %scheduler_job_id,
                    run,
                    error = %e,
                    "Lost track of scheduler job, treating it as ended"
                );
            }
            Err(e) => {
                error!(
                    job_id = %job.id(),
                    %scheduler_job_id,
                    run,
                    error = %e,
                    "Completion watch aborted, treating job as ended"
                );
            }
        }

        let mut state = job.lock().await;
        if state.mark_stopped(run) {
            job.publish(JobStatus::Stopped);
            job.publish_run_end(run);
            info!(
                tenant_id = %job.tenant_id(),
                job_id = %job.id(),
                %scheduler_job_id,
                run,
                "Job stopped"
            );
        } else {
            debug!(job_id = %job.id(), run, "Run already ended");
        }
    })
}
