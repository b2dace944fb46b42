//! Error types for gateway operations.

use thiserror::Error;

use crate::scheduler::SchedulerError;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by orchestrator and controller operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown tenant id.
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    /// Unknown job id within a tenant.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Malformed batch spec, job id, or desired status.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Access token did not match the tenant's credential.
    #[error("unauthorized for tenant {0}")]
    Unauthorized(String),

    /// Submit, cancel, or query failed at the scheduler.
    #[error("scheduler error: {0}")]
    Scheduler(SchedulerError),

    /// Scheduler output did not carry the expected job id.
    #[error("unexpected scheduler output: {0}")]
    Parse(String),

    /// Job directory or batch script could not be written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classes for the request-handling boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Unauthorized,
    /// Scheduler, parse, and filesystem failures.
    Unavailable,
}

impl Error {
    /// Classify the error for response mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TenantNotFound(_) | Error::JobNotFound(_) => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Scheduler(_) | Error::Parse(_) | Error::Io(_) => ErrorKind::Unavailable,
        }
    }

    /// Stable reason code for diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            Error::TenantNotFound(_) => "tenant_not_found",
            Error::JobNotFound(_) => "job_not_found",
            Error::Validation(_) => "validation_failed",
            Error::Unauthorized(_) => "unauthorized",
            Error::Scheduler(_) => "scheduler_error",
            Error::Parse(_) => "scheduler_output_invalid",
            Error::Io(_) => "io_error",
        }
    }
}

impl From<SchedulerError> for Error {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Parse(msg) => Error::Parse(msg),
            other => Error::Scheduler(other),
        }
    }
}
