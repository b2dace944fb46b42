//! In-process scheduler for testing and development.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

use super::{
    JobProperties, ProcessHandle, SchedulerClient, SchedulerError, SchedulerJobId, Submission,
};

/// A job the mock considers running.
struct MockJob {
    done: oneshot::Sender<()>,
    properties: JobProperties,
}

/// Mock scheduler.
///
/// Jobs stay running until [`MockScheduler::complete`] is called or they are
/// cancelled, mirroring `sbatch --wait` returning when the job ends.
pub struct MockScheduler {
    /// Next id to assign.
    next_id: AtomicU64,

    running: Mutex<HashMap<SchedulerJobId, MockJob>>,

    submit_delay: Duration,

    fail_submits: AtomicBool,
    fail_cancels: AtomicBool,
    fail_queries: AtomicBool,

    /// Whether a successful cancel also ends the job.
    cancel_completes: AtomicBool,

    submit_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    cancelled: Mutex<Vec<SchedulerJobId>>,
    query_calls: AtomicUsize,
}

impl MockScheduler {
    /// Create a mock that assigns ids starting at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a mock that assigns ids starting at `first_id` (minimum 1).
    pub fn starting_at(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id.max(1)),
            running: Mutex::new(HashMap::new()),
            submit_delay: Duration::ZERO,
            fail_submits: AtomicBool::new(false),
            fail_cancels: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            cancel_completes: AtomicBool::new(true),
            submit_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            cancelled: Mutex::new(Vec::new()),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// Delay each submission, widening race windows in tests.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn set_fail_submits(&self, fail: bool) {
        self.fail_submits.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_cancels(&self, fail: bool) {
        self.fail_cancels.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// When false, a cancelled job keeps running until `complete` is called.
    pub fn set_cancel_completes(&self, completes: bool) {
        self.cancel_completes.store(completes, Ordering::SeqCst);
    }

    /// End a running job as if it finished naturally.
    ///
    /// Returns false if the job was not running.
    pub async fn complete(&self, id: SchedulerJobId) -> bool {
        let job = self.running.lock().await.remove(&id);
        match job {
            Some(job) => {
                debug!(scheduler_job_id = %id, "[MOCK] Job completed");
                let _ = job.done.send(());
                true
            }
            None => false,
        }
    }

    /// Replace the properties reported for a running job.
    pub async fn set_properties(&self, id: SchedulerJobId, properties: JobProperties) {
        if let Some(job) = self.running.lock().await.get_mut(&id) {
            job.properties = properties;
        }
    }

    /// Ids of jobs that have not ended.
    pub async fn running_jobs(&self) -> Vec<SchedulerJobId> {
        let mut ids: Vec<_> = self.running.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Ids of accepted cancels, in call order.
    pub async fn cancelled_jobs(&self) -> Vec<SchedulerJobId> {
        self.cancelled.lock().await.clone()
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchedulerClient for MockScheduler {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn submit_batch(
        &self,
        script_path: &Path,
        working_dir: &Path,
    ) -> Result<Submission, SchedulerError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }

        if self.fail_submits.load(Ordering::SeqCst) {
            return Err(SchedulerError::Command {
                program: "sbatch".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "mock scheduler configured to fail".to_string(),
            });
        }

        let raw = self.next_id.fetch_add(1, Ordering::SeqCst);
        let scheduler_job_id = SchedulerJobId::new(raw)
            .ok_or_else(|| SchedulerError::Parse("mock id counter wrapped".to_string()))?;

        info!(
            scheduler_job_id = %scheduler_job_id,
            script = %script_path.display(),
            working_dir = %working_dir.display(),
            "[MOCK] Submitted batch job"
        );

        let (done, finished) = oneshot::channel();
        let properties = JobProperties {
            job_id: raw,
            job_state: vec!["RUNNING".to_string()],
            ..JobProperties::default()
        };
        self.running
            .lock()
            .await
            .insert(scheduler_job_id, MockJob { done, properties });

        let handle = ProcessHandle::new(async move {
            // A dropped sender also means the job is gone.
            let _ = finished.await;
            Ok(())
        });

        Ok(Submission {
            scheduler_job_id,
            handle,
        })
    }

    async fn cancel_job(&self, id: SchedulerJobId) -> Result<(), SchedulerError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_cancels.load(Ordering::SeqCst) {
            return Err(SchedulerError::Command {
                program: "scancel".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "mock scheduler configured to fail".to_string(),
            });
        }

        info!(scheduler_job_id = %id, "[MOCK] Cancelling job");
        self.cancelled.lock().await.push(id);
        if self.cancel_completes.load(Ordering::SeqCst) {
            self.complete(id).await;
        }
        Ok(())
    }

    async fn get_job(&self, id: SchedulerJobId) -> Result<JobProperties, SchedulerError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(SchedulerError::Command {
                program: "scontrol".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "mock scheduler configured to fail".to_string(),
            });
        }

        self.running
            .lock()
            .await
            .get(&id)
            .map(|job| job.properties.clone())
            .ok_or(SchedulerError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_assigns_sequential_ids() {
        let mock = MockScheduler::starting_at(42);
        let a = mock
            .submit_batch(Path::new("batch.sh"), Path::new("."))
            .await
            .unwrap();
        let b = mock
            .submit_batch(Path::new("batch.sh"), Path::new("."))
            .await
            .unwrap();
        assert_eq!(a.scheduler_job_id.get(), 42);
        assert_eq!(b.scheduler_job_id.get(), 43);
        assert_eq!(mock.submit_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_complete_resolves_handle() {
        let mock = MockScheduler::new();
        let submission = mock
            .submit_batch(Path::new("batch.sh"), Path::new("."))
            .await
            .unwrap();
        let id = submission.scheduler_job_id;

        assert!(mock.get_job(id).await.is_ok());
        assert!(mock.complete(id).await);
        submission.handle.wait().await.unwrap();
        assert!(matches!(
            mock.get_job(id).await,
            Err(SchedulerError::NotFound(_))
        ));
        assert!(!mock.complete(id).await);
    }

    #[tokio::test]
    async fn test_mock_cancel_ends_job() {
        let mock = MockScheduler::new();
        let submission = mock
            .submit_batch(Path::new("batch.sh"), Path::new("."))
            .await
            .unwrap();

        mock.cancel_job(submission.scheduler_job_id).await.unwrap();
        submission.handle.wait().await.unwrap();
        assert!(mock.running_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_failures() {
        let mock = MockScheduler::new();
        mock.set_fail_submits(true);
        assert!(mock
            .submit_batch(Path::new("batch.sh"), Path::new("."))
            .await
            .is_err());

        mock.set_fail_cancels(true);
        assert!(mock
            .cancel_job(SchedulerJobId::new(1).unwrap())
            .await
            .is_err());
        assert_eq!(mock.cancel_calls(), 1);
    }
}
