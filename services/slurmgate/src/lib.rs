//! slurmgate
//!
//! Per-tenant batch job gateway in front of a Slurm scheduler. Tenants own
//! jobs; each job renders its spec into a `batch.sh`, is submitted to the
//! scheduler on start, and is watched until the scheduler process exits.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator
//! ├── Registry<Tenant>
//! │   └── Registry<Job>        (per tenant)
//! ├── JobController            (start / stop / delete, one watcher per run)
//! └── Reconciler               (periodic scheduler property refresh)
//! ```
//!
//! ## Modules
//!
//! - `scheduler`: scheduler clients (Slurm CLI, slurmrestd, mock)
//! - `batch`: job specs and `#SBATCH` script rendering
//! - `registry`: keyed store for tenants and jobs
//! - `controller`: job lifecycle transitions
//! - `reconciler`: scheduler property refresh loop

pub mod batch;
pub mod config;
pub mod controller;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod reconciler;
pub mod registry;
pub mod scheduler;
pub mod tenant;

pub use batch::{BatchRenderer, BatchSpec, SbatchRenderer};
pub use error::{Error, ErrorKind, Result};
pub use job::{Job, JobSnapshot, JobStatus};
pub use orchestrator::Orchestrator;
pub use reconciler::{Reconciler, ReconcilerConfig, SweepStats};
pub use scheduler::{SchedulerClient, SchedulerError, SchedulerJobId};
pub use tenant::{Tenant, TenantSummary};
