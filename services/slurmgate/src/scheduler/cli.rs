//! Slurm backend driven through its command-line tools.
//!
//! - Submission runs `sbatch --wait <script>` in the job directory. The first
//!   stdout line carries the assigned job id and the process exits when the
//!   job ends, so the child process itself is the completion handle.
//! - Cancellation runs `scancel <id>`.
//! - Queries run `scontrol --json show job <id>`.

use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{
    parse_submission_line, JobProperties, ProcessHandle, SchedulerClient, SchedulerError,
    SchedulerJobId, Submission,
};

/// Program invocations for the Slurm tools.
///
/// Each entry is a program followed by leading arguments, so the tools can be
/// reached through a wrapper such as `ssh login1 sbatch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmCliConfig {
    pub sbatch: Vec<String>,
    pub scancel: Vec<String>,
    pub scontrol: Vec<String>,
}

impl Default for SlurmCliConfig {
    fn default() -> Self {
        Self {
            sbatch: vec!["sbatch".to_string()],
            scancel: vec!["scancel".to_string()],
            scontrol: vec!["scontrol".to_string()],
        }
    }
}

/// Scheduler client that shells out to the Slurm CLI.
pub struct SlurmCliClient {
    config: SlurmCliConfig,
}

impl SlurmCliClient {
    /// Create a new CLI client.
    pub fn new(config: SlurmCliConfig) -> Self {
        Self { config }
    }

    fn command(invocation: &[String]) -> Result<(Command, String), SchedulerError> {
        let (program, prefix) = invocation.split_first().ok_or_else(|| SchedulerError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(prefix).stdin(Stdio::null());
        Ok((cmd, program.clone()))
    }

    /// Cancel whatever job an unparseable sbatch line may have queued.
    ///
    /// Killing `sbatch --wait` does not withdraw a job Slurm already
    /// accepted. If no id can be recovered from the line, or `scancel`
    /// fails, that job is left running unmanaged.
    async fn cancel_unparsed(&self, line: &str) {
        let Some(id) = salvage_job_id(line) else {
            error!(line = %line, "No job id in sbatch output, a queued job may be orphaned");
            return;
        };
        match self.run(&self.config.scancel, &[id.to_string()]).await {
            Ok(_) => info!(scheduler_job_id = %id, "Cancelled job from unparsed submission"),
            Err(e) => error!(
                scheduler_job_id = %id,
                error = %e,
                "Failed to cancel job from unparsed submission, it may be orphaned"
            ),
        }
    }

    /// Run a short-lived command to completion and require success.
    async fn run(&self, invocation: &[String], args: &[String]) -> Result<Output, SchedulerError> {
        let (mut cmd, program) = Self::command(invocation)?;
        debug!(program = %program, args = ?args, "Running scheduler command");

        let output = cmd
            .args(args)
            .output()
            .await
            .map_err(|source| SchedulerError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SchedulerError::Command {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }
}

impl Default for SlurmCliClient {
    fn default() -> Self {
        Self::new(SlurmCliConfig::default())
    }
}

#[async_trait]
impl SchedulerClient for SlurmCliClient {
    fn name(&self) -> &'static str {
        "slurmcli"
    }

    async fn submit_batch(
        &self,
        script_path: &Path,
        working_dir: &Path,
    ) -> Result<Submission, SchedulerError> {
        let (mut cmd, program) = Self::command(&self.config.sbatch)?;

        let mut child = cmd
            .arg("--wait")
            .arg(script_path)
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SchedulerError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SchedulerError::Parse("sbatch stdout was not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let first_line = lines
            .next_line()
            .await
            .map_err(|source| SchedulerError::Spawn {
                program: program.clone(),
                source,
            })?;

        let Some(first_line) = first_line else {
            // Nothing on stdout means sbatch rejected the script.
            let output = child
                .wait_with_output()
                .await
                .map_err(|source| SchedulerError::Spawn {
                    program: program.clone(),
                    source,
                })?;
            return Err(SchedulerError::Command {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        };

        let scheduler_job_id = match parse_submission_line(&first_line) {
            Ok(id) => id,
            Err(e) => {
                error!(line = %first_line, "Unrecognized sbatch output, abandoning submission");
                if let Err(kill_err) = child.start_kill() {
                    warn!(error = %kill_err, "Failed to kill sbatch");
                }
                self.cancel_unparsed(&first_line).await;
                return Err(e);
            }
        };

        info!(
            scheduler_job_id = %scheduler_job_id,
            script = %script_path.display(),
            "Batch job submitted"
        );

        let handle = ProcessHandle::new(async move {
            let drain = async {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(scheduler_job_id = %scheduler_job_id, line = %line, "sbatch output");
                }
            };
            let ((), output) = tokio::join!(drain, child.wait_with_output());
            let output = output.map_err(|source| SchedulerError::Spawn { program, source })?;

            if output.status.success() {
                debug!(scheduler_job_id = %scheduler_job_id, "sbatch exited");
            } else {
                // Failed and cancelled jobs also end the wait.
                info!(
                    scheduler_job_id = %scheduler_job_id,
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "sbatch exited unsuccessfully"
                );
            }
            Ok(())
        });

        Ok(Submission {
            scheduler_job_id,
            handle,
        })
    }

    async fn cancel_job(&self, id: SchedulerJobId) -> Result<(), SchedulerError> {
        self.run(&self.config.scancel, &[id.to_string()]).await?;
        info!(scheduler_job_id = %id, "Cancellation requested");
        Ok(())
    }

    async fn get_job(&self, id: SchedulerJobId) -> Result<JobProperties, SchedulerError> {
        let args = [
            "--json".to_string(),
            "show".to_string(),
            "job".to_string(),
            id.to_string(),
        ];

        let output = match self.run(&self.config.scontrol, &args).await {
            Ok(output) => output,
            Err(SchedulerError::Command { stderr, .. })
                if stderr.to_ascii_lowercase().contains("invalid job id") =>
            {
                return Err(SchedulerError::NotFound(id));
            }
            Err(e) => return Err(e),
        };

        parse_scontrol_jobs(&output.stdout, id)
    }
}

/// First whitespace-separated token of `line` that is a valid job id.
fn salvage_job_id(line: &str) -> Option<SchedulerJobId> {
    line.split_whitespace()
        .filter_map(|token| token.parse::<u64>().ok())
        .find_map(SchedulerJobId::new)
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<JobProperties>,
}

/// Pick the requested job out of an `scontrol --json` payload.
fn parse_scontrol_jobs(stdout: &[u8], id: SchedulerJobId) -> Result<JobProperties, SchedulerError> {
    let response: JobsResponse = serde_json::from_slice(stdout)?;
    let mut jobs = response.jobs.into_iter();
    let first = jobs.next().ok_or(SchedulerError::NotFound(id))?;

    if first.job_id == id.get() {
        return Ok(first);
    }
    // Array or heterogeneous jobs may list components first.
    std::iter::once(first)
        .chain(jobs)
        .find(|job| job.job_id == id.get())
        .ok_or(SchedulerError::NotFound(id))
}
