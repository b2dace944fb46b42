//! Reconciliation loop for scheduler-side job properties.
//!
//! Each sweep visits every started job, asks the scheduler what it thinks
//! of the job, and caches the answer. Sweeps never change a job's status;
//! only the completion watcher does that.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::job::JobStatus;
use crate::registry::Registry;
use crate::scheduler::SchedulerClient;
use crate::tenant::Tenant;

/// Reconciliation loop configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between sweeps.
    pub interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub tenants: usize,
    /// Started jobs queried.
    pub jobs_checked: usize,
    /// Jobs whose cached properties were replaced.
    pub jobs_refreshed: usize,
    pub jobs_failed: usize,
    /// Jobs busy with a transition when the sweep reached them.
    pub jobs_skipped: usize,
}

/// Periodically refreshes cached scheduler properties.
pub struct Reconciler {
    tenants: Arc<Registry<Tenant>>,
    scheduler: Arc<dyn SchedulerClient>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        tenants: Arc<Registry<Tenant>>,
        scheduler: Arc<dyn SchedulerClient>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            tenants,
            scheduler,
            config,
        }
    }

    /// Run sweeps until shutdown. The first sweep runs immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            scheduler = self.scheduler.name(),
            "Starting reconciliation loop"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Perform a single pass over all tenants.
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        for tenant in self.tenants.list().await {
            stats.tenants += 1;

            for job in tenant.jobs().list().await {
                // Snapshot under the lock, query outside it.
                let (run, scheduler_job_id) = match job.try_lock() {
                    Ok(state) => match (state.status(), state.scheduler_job_id()) {
                        (JobStatus::Started, Some(id)) if !state.is_retired() => {
                            (state.run(), id)
                        }
                        _ => continue,
                    },
                    Err(_) => {
                        debug!(job_id = %job.id(), "Job busy, skipping this sweep");
                        stats.jobs_skipped += 1;
                        continue;
                    }
                };

                stats.jobs_checked += 1;
                match self.scheduler.get_job(scheduler_job_id).await {
                    Ok(properties) => {
                        let mut state = job.lock().await;
                        if state.refresh(run, scheduler_job_id, properties, Utc::now()) {
                            stats.jobs_refreshed += 1;
                        } else {
                            debug!(
                                job_id = %job.id(),
                                %scheduler_job_id,
                                "Job moved on during query, discarding result"
                            );
                        }
                    }
                    Err(e) => {
                        stats.jobs_failed += 1;
                        warn!(
                            tenant_id = %tenant.id(),
                            job_id = %job.id(),
                            %scheduler_job_id,
                            error = %e,
                            "Failed to refresh scheduler job"
                        );
                    }
                }
            }
        }

        if stats.jobs_checked > 0 || stats.jobs_skipped > 0 {
            info!(
                tenants = stats.tenants,
                jobs_checked = stats.jobs_checked,
                jobs_refreshed = stats.jobs_refreshed,
                jobs_failed = stats.jobs_failed,
                jobs_skipped = stats.jobs_skipped,
                "Reconciliation sweep complete"
            );
        } else {
            debug!(tenants = stats.tenants, "Reconciliation sweep found no started jobs");
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciler_config_default() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(10));
    }

    #[test]
    fn test_sweep_stats_default_is_zero() {
        assert_eq!(
            SweepStats::default(),
            SweepStats {
                tenants: 0,
                jobs_checked: 0,
                jobs_refreshed: 0,
                jobs_failed: 0,
                jobs_skipped: 0,
            }
        );
    }
}
