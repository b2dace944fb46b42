//! Tenants (applications) and their job registries.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use slurmgate_id::TenantId;

use crate::job::Job;
use crate::registry::{EntityKind, Registry};

/// Name of the per-tenant directory holding job directories.
pub const JOBS_DIR: &str = "jobs";

/// An isolated namespace owning jobs, a directory tree and a credential.
pub struct Tenant {
    id: TenantId,
    name: String,
    token: String,
    directory: PathBuf,
    jobs: Registry<Job>,
}

impl Tenant {
    pub fn new(
        id: TenantId,
        name: impl Into<String>,
        token: impl Into<String>,
        directory: PathBuf,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            token: token.into(),
            directory,
            jobs: Registry::new(EntityKind::Job),
        }
    }

    pub fn id(&self) -> &TenantId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tenant root, `<working_dir>/applications/<tenant_id>`.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.directory.join(JOBS_DIR)
    }

    pub fn jobs(&self) -> &Registry<Job> {
        &self.jobs
    }

    /// Check an access token against the tenant's credential.
    pub fn verify_token(&self, token: &str) -> bool {
        constant_time_eq(self.token.as_bytes(), token.as_bytes())
    }

    pub async fn summary(&self) -> TenantSummary {
        TenantSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            job_count: self.jobs.len().await,
        }
    }
}

impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Public view of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantSummary {
    pub id: TenantId,
    pub name: String,
    pub job_count: usize,
}
