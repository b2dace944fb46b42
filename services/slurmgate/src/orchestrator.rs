//! Tenant-scoped entry point.
//!
//! The orchestrator owns the tenant registry, routes each operation to the
//! right tenant and job, and hands transitions to the [`JobController`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::batch::{BatchRenderer, BatchSpec};
use crate::config::TenantConfig;
use crate::controller::JobController;
use crate::error::{Error, Result};
use crate::job::{Job, JobSnapshot};
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::registry::{EntityKind, Registry};
use crate::scheduler::SchedulerClient;
use crate::tenant::{Tenant, TenantSummary};

/// Directory under the working dir holding one directory per tenant.
pub const APPLICATIONS_DIR: &str = "applications";

pub struct Orchestrator {
    working_dir: PathBuf,
    tenants: Arc<Registry<Tenant>>,
    controller: JobController,
}

impl Orchestrator {
    /// Lay out the working directory and register the configured tenants.
    ///
    /// `working_dir` is created if missing and canonicalized, so every job
    /// directory handed to the scheduler is absolute.
    pub async fn new(
        working_dir: &Path,
        tenants: &[TenantConfig],
        scheduler: Arc<dyn SchedulerClient>,
        renderer: Arc<dyn BatchRenderer>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(working_dir).await?;
        let working_dir = tokio::fs::canonicalize(working_dir).await?;

        let registry = Registry::new(EntityKind::Tenant);
        for config in tenants {
            let directory = working_dir
                .join(APPLICATIONS_DIR)
                .join(config.id.as_str());
            let tenant = Tenant::new(
                config.id.clone(),
                config.display_name(),
                config.token.clone(),
                directory,
            );
            tokio::fs::create_dir_all(tenant.jobs_dir()).await?;

            registry
                .insert_new(config.id.as_str(), Arc::new(tenant))
                .await?;
            info!(tenant_id = %config.id, "Registered tenant");
        }

        info!(
            working_dir = %working_dir.display(),
            tenants = tenants.len(),
            scheduler = scheduler.name(),
            "Orchestrator ready"
        );

        Ok(Self {
            working_dir,
            tenants: Arc::new(registry),
            controller: JobController::new(scheduler, renderer),
        })
    }

    /// Canonical working directory.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn tenants(&self) -> &Arc<Registry<Tenant>> {
        &self.tenants
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    /// A reconciler over this orchestrator's tenants and scheduler.
    pub fn reconciler(&self, config: ReconcilerConfig) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.tenants),
            Arc::clone(self.controller.scheduler()),
            config,
        )
    }

    /// Start the reconciliation loop in the background.
    pub fn spawn_reconciler(
        &self,
        config: ReconcilerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let reconciler = self.reconciler(config);
        tokio::spawn(async move { reconciler.run(shutdown).await })
    }

    pub async fn tenant(&self, tenant_id: &str) -> Result<Arc<Tenant>> {
        Ok(self.tenants.get(tenant_id).await?)
    }

    /// Resolve a tenant and check its access token.
    pub async fn authorize(&self, tenant_id: &str, token: &str) -> Result<Arc<Tenant>> {
        let tenant = self.tenant(tenant_id).await?;
        if !tenant.verify_token(token) {
            return Err(Error::Unauthorized(tenant_id.to_string()));
        }
        Ok(tenant)
    }

    pub async fn list_tenants(&self) -> Vec<TenantSummary> {
        let mut summaries = Vec::new();
        for tenant in self.tenants.list().await {
            summaries.push(tenant.summary().await);
        }
        summaries
    }

    /// Look up a job handle, e.g. to subscribe to its status.
    pub async fn job(&self, tenant_id: &str, job_id: &str) -> Result<Arc<Job>> {
        let tenant = self.tenant(tenant_id).await?;
        Ok(tenant.jobs().get(job_id).await?)
    }

    /// Snapshots of a tenant's jobs, ordered by job id.
    pub async fn list_jobs(&self, tenant_id: &str) -> Result<Vec<JobSnapshot>> {
        let tenant = self.tenant(tenant_id).await?;
        let mut snapshots = Vec::new();
        for job in tenant.jobs().list().await {
            snapshots.push(job.snapshot().await);
        }
        Ok(snapshots)
    }

    pub async fn create_job(&self, tenant_id: &str, spec: BatchSpec) -> Result<JobSnapshot> {
        let tenant = self.tenant(tenant_id).await?;
        let job = self.controller.create(&tenant, spec).await?;
        Ok(job.snapshot().await)
    }

    pub async fn get_job(&self, tenant_id: &str, job_id: &str) -> Result<JobSnapshot> {
        let job = self.job(tenant_id, job_id).await?;
        Ok(job.snapshot().await)
    }

    /// Drive a job towards `desired`, `"started"` or `"stopped"`.
    pub async fn set_job_status(
        &self,
        tenant_id: &str,
        job_id: &str,
        desired: &str,
    ) -> Result<JobSnapshot> {
        let job = self.job(tenant_id, job_id).await?;
        self.controller.set_status(&job, desired).await
    }

    pub async fn delete_job(&self, tenant_id: &str, job_id: &str) -> Result<()> {
        let tenant = self.tenant(tenant_id).await?;
        let job = tenant.jobs().get(job_id).await?;
        self.controller.delete(&tenant, &job).await
    }
}
