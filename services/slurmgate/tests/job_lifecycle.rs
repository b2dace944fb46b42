//! End-to-end job lifecycle through the orchestrator.
//!
//! The CLI tests drive `SlurmCliClient` against fake `sbatch`/`scancel`
//! scripts: `sbatch` prints its submission line and then blocks until a
//! trigger file appears, which stands in for the job ending.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use slurmgate::config::TenantConfig;
use slurmgate::scheduler::{MockScheduler, SlurmCliClient, SlurmCliConfig};
use slurmgate::{
    BatchSpec, Error, ErrorKind, JobStatus, Orchestrator, SbatchRenderer, SchedulerClient,
    SchedulerJobId,
};
use slurmgate_id::{JobId, TenantId};
use tempfile::TempDir;

struct FakeSlurm {
    dir: TempDir,
}

impl FakeSlurm {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn tool(&self, name: &str, body: &str) -> Vec<String> {
        let path = self.path(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        vec!["sh".to_string(), path.display().to_string()]
    }

    /// Let the blocked `sbatch` exit.
    fn finish_job(&self) {
        std::fs::write(self.path("exit"), "").unwrap();
    }

    fn scancel_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.path("scancel.log"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn client(&self, job_id: u64) -> SlurmCliClient {
        let trigger = self.path("exit");
        let log = self.path("scancel.log");
        SlurmCliClient::new(SlurmCliConfig {
            sbatch: self.tool(
                "sbatch.sh",
                &format!(
                    "echo \"Submitted batch job {job_id}\"\n\
                     while [ ! -f '{trigger}' ]; do sleep 0.05; done",
                    trigger = trigger.display()
                ),
            ),
            scancel: self.tool(
                "scancel.sh",
                &format!(
                    "echo \"$1\" >> '{log}'\ntouch '{trigger}'",
                    log = log.display(),
                    trigger = trigger.display()
                ),
            ),
            scontrol: self.tool("scontrol.sh", "exit 1"),
        })
    }
}

impl Drop for FakeSlurm {
    fn drop(&mut self) {
        // Never leave a blocked fake sbatch behind.
        let _ = std::fs::write(self.path("exit"), "");
    }
}

async fn orchestrator(working_dir: &Path, scheduler: Arc<dyn SchedulerClient>) -> Orchestrator {
    Orchestrator::new(
        working_dir,
        &[TenantConfig {
            id: TenantId::parse("T1").unwrap(),
            name: None,
            token: "t1-token".to_string(),
        }],
        scheduler,
        Arc::new(SbatchRenderer::new()),
    )
    .await
    .unwrap()
}

async fn wait_for(orchestrator: &Orchestrator, job_id: &str, status: JobStatus) {
    let job = orchestrator.job("T1", job_id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), job.wait_for_status(status))
        .await
        .unwrap_or_else(|_| panic!("job never reached {status}"));
}

#[tokio::test]
async fn test_hello_job_scenario() {
    let slurm = FakeSlurm::new();
    let work = TempDir::new().unwrap();
    let orchestrator = orchestrator(work.path(), Arc::new(slurm.client(42))).await;

    // Create.
    let created = orchestrator
        .create_job("T1", BatchSpec::new("hello", "echo hello"))
        .await
        .unwrap();
    assert_eq!(created.name, "hello");
    assert_eq!(created.status, JobStatus::Stopped);
    assert_eq!(created.scheduler_job_id, 0);

    let id = created.id.to_string();
    let job = orchestrator.job("T1", &id).await.unwrap();
    assert!(job.directory().is_absolute());
    assert_eq!(
        job.directory(),
        orchestrator
            .working_dir()
            .join("applications/T1/jobs")
            .join(&id)
    );
    assert_eq!(
        std::fs::read_to_string(job.script_path()).unwrap(),
        "#!/bin/bash\n#SBATCH --job-name=hello\n\necho hello\n"
    );

    // Start.
    let started = orchestrator
        .set_job_status("T1", &id, "started")
        .await
        .unwrap();
    assert_eq!(started.status, JobStatus::Started);
    assert_eq!(started.scheduler_job_id, 42);
    assert_eq!(
        orchestrator.get_job("T1", &id).await.unwrap().scheduler_job_id,
        42
    );

    // The scheduler process exits.
    slurm.finish_job();
    wait_for(&orchestrator, &id, JobStatus::Stopped).await;
    let stopped = orchestrator.get_job("T1", &id).await.unwrap();
    assert_eq!(stopped.status, JobStatus::Stopped);
    assert_eq!(stopped.scheduler_job_id, 0);

    // Stopping a stopped job changes nothing and never reaches scancel.
    let again = orchestrator
        .set_job_status("T1", &id, "stopped")
        .await
        .unwrap();
    assert_eq!(again.status, JobStatus::Stopped);
    assert!(slurm.scancel_calls().is_empty());

    // Unknown ids.
    let err = orchestrator
        .get_job("T1", &JobId::new().to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(
        orchestrator.get_job("T1", "not-a-uuid").await,
        Err(Error::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_stop_cancels_and_waits_for_exit() {
    let slurm = FakeSlurm::new();
    let work = TempDir::new().unwrap();
    let orchestrator = orchestrator(work.path(), Arc::new(slurm.client(7))).await;

    let id = orchestrator
        .create_job("T1", BatchSpec::new("sleepy", "sleep 600"))
        .await
        .unwrap()
        .id
        .to_string();
    orchestrator
        .set_job_status("T1", &id, "started")
        .await
        .unwrap();

    let snapshot = orchestrator
        .set_job_status("T1", &id, "stopped")
        .await
        .unwrap();
    // Cancellation is a request; the watcher finishes the transition.
    assert_eq!(snapshot.status, JobStatus::Started);
    assert_eq!(slurm.scancel_calls(), vec!["7".to_string()]);

    wait_for(&orchestrator, &id, JobStatus::Stopped).await;
    assert_eq!(
        orchestrator.get_job("T1", &id).await.unwrap().scheduler_job_id,
        0
    );
}

#[tokio::test]
async fn test_delete_started_job() {
    let slurm = FakeSlurm::new();
    let work = TempDir::new().unwrap();
    let orchestrator = orchestrator(work.path(), Arc::new(slurm.client(9))).await;

    let keep = orchestrator
        .create_job("T1", BatchSpec::new("keep", "echo keep"))
        .await
        .unwrap()
        .id
        .to_string();
    let doomed = orchestrator
        .create_job("T1", BatchSpec::new("doomed", "sleep 600"))
        .await
        .unwrap()
        .id
        .to_string();
    orchestrator
        .set_job_status("T1", &doomed, "started")
        .await
        .unwrap();
    let directory = orchestrator
        .job("T1", &doomed)
        .await
        .unwrap()
        .directory()
        .to_path_buf();

    orchestrator.delete_job("T1", &doomed).await.unwrap();

    assert_eq!(slurm.scancel_calls(), vec!["9".to_string()]);
    assert!(!directory.exists());
    assert!(matches!(
        orchestrator.get_job("T1", &doomed).await,
        Err(Error::JobNotFound(_))
    ));
    assert!(matches!(
        orchestrator.delete_job("T1", &doomed).await,
        Err(Error::JobNotFound(_))
    ));

    // Only the named job went away.
    let remaining = orchestrator.list_jobs("T1").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id.to_string(), keep);
}

#[tokio::test]
async fn test_created_jobs_get_distinct_directories() {
    let work = TempDir::new().unwrap();
    let orchestrator = orchestrator(work.path(), Arc::new(MockScheduler::new())).await;

    let mut handles = Vec::new();
    let orchestrator = Arc::new(orchestrator);
    for i in 0..16 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator
                .create_job("T1", BatchSpec::new(format!("job-{i}"), "echo"))
                .await
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let snapshot = handle.await.unwrap().unwrap();
        assert!(ids.insert(snapshot.id));
        let job = orchestrator
            .job("T1", &snapshot.id.to_string())
            .await
            .unwrap();
        assert!(job.script_path().is_file());
    }
    assert_eq!(orchestrator.list_jobs("T1").await.unwrap().len(), 16);
}

#[tokio::test]
async fn test_concurrent_stops_end_run_once() {
    let work = TempDir::new().unwrap();
    let mock = Arc::new(MockScheduler::starting_at(42));
    mock.set_cancel_completes(false);
    let orchestrator = Arc::new(orchestrator(work.path(), mock.clone()).await);

    let id = orchestrator
        .create_job("T1", BatchSpec::new("hello", "sleep 600"))
        .await
        .unwrap()
        .id
        .to_string();
    orchestrator
        .set_job_status("T1", &id, "started")
        .await
        .unwrap();

    let mut stops = Vec::new();
    for _ in 0..4 {
        let orchestrator = Arc::clone(&orchestrator);
        let id = id.clone();
        stops.push(tokio::spawn(async move {
            orchestrator.set_job_status("T1", &id, "stopped").await
        }));
    }
    for stop in stops {
        assert_eq!(stop.await.unwrap().unwrap().status, JobStatus::Started);
    }
    assert_eq!(mock.cancel_calls(), 1);

    assert!(mock.complete(SchedulerJobId::new(42).unwrap()).await);
    wait_for(&orchestrator, &id, JobStatus::Stopped).await;

    // Starting again opens a fresh run the old watcher cannot touch.
    let restarted = orchestrator
        .set_job_status("T1", &id, "started")
        .await
        .unwrap();
    assert_eq!(restarted.scheduler_job_id, 43);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        orchestrator.get_job("T1", &id).await.unwrap().status,
        JobStatus::Started
    );
    mock.complete(SchedulerJobId::new(43).unwrap()).await;
}

#[tokio::test]
async fn test_cancel_failure_reported() {
    let work = TempDir::new().unwrap();
    let mock = Arc::new(MockScheduler::starting_at(42));
    let orchestrator = orchestrator(work.path(), mock.clone()).await;

    let id = orchestrator
        .create_job("T1", BatchSpec::new("hello", "sleep 600"))
        .await
        .unwrap()
        .id
        .to_string();
    orchestrator
        .set_job_status("T1", &id, "started")
        .await
        .unwrap();

    mock.set_fail_cancels(true);
    let err = orchestrator
        .set_job_status("T1", &id, "stopped")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert_eq!(
        orchestrator.get_job("T1", &id).await.unwrap().status,
        JobStatus::Started
    );

    let err = orchestrator.delete_job("T1", &id).await.unwrap_err();
    assert!(matches!(err, Error::Scheduler(_)));
    assert!(orchestrator.get_job("T1", &id).await.is_ok());
    mock.complete(SchedulerJobId::new(42).unwrap()).await;
}

#[tokio::test]
async fn test_invalid_requests() {
    let work = TempDir::new().unwrap();
    let orchestrator = orchestrator(work.path(), Arc::new(MockScheduler::new())).await;

    let err = orchestrator
        .create_job("T1", BatchSpec::new("hello", ""))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let id = orchestrator
        .create_job("T1", BatchSpec::new("hello", "echo"))
        .await
        .unwrap()
        .id
        .to_string();
    let err = orchestrator
        .set_job_status("T1", &id, "running")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(
        orchestrator
            .set_job_status("T2", &id, "started")
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
}
