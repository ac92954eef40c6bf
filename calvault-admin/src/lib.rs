//! Job control surface for CalVault.
//!
//! Each top-level job (restore, dump, subscription check, alias fix, data
//! repair) runs as one independent background worker; at most one instance
//! of each kind runs at a time. Workers publish human-readable progress
//! lines and counter snapshots through a shared snapshot that pollers read
//! without blocking the worker.
//!
//! Cancellation is not provided; callers needing it should wrap the job
//! worker and force a terminal read error on the underlying stream.

mod jobs;
mod repair;

pub use jobs::{JobError, JobKind, JobProgress, JobRunner, JobRunnerConfig, JobSnapshot, JobStatus};
pub use repair::{repair_locations, RepairConfig, RepairTallies};
