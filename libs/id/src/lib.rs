//! # slurmgate-id
//!
//! Identifier types for tenants and jobs.
//!
//! ## Design Principles
//!
//! - Tenant IDs come from configuration and are opaque, but they name a
//!   directory on disk, so parsing rejects anything that is not a single
//!   safe path component
//! - Job IDs are system-generated UUIDs and are never reused
//! - All IDs have a canonical string representation with strict parsing
//! - IDs are typed to prevent passing a tenant ID where a job ID is expected
//!
//! ## ID Format
//!
//! - `TenantId`: `[A-Za-z0-9._-]{1,128}`, not `.` or `..`
//!   (e.g. `T1`, `3f0d2c1e-9d38-4bd7-8a4e-4f3b8c7d2a10`)
//! - `JobId`: hyphenated UUID v4
//!   (e.g. `6a1f4f4e-8a9c-4b5e-9d3f-0e2b7c1d5a66`)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export uuid for consumers that need raw UUID operations
pub use uuid::Uuid;
