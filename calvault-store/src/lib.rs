//! Persistence/service API for CalVault.
//!
//! The engines are written against the [`CalendarSvc`] trait; the real
//! calendaring backend lives behind it and is out of scope here. Sessions
//! are opened per impersonated identity through [`SvcFactory`], because
//! authorization is evaluated against the session's principal.
//!
//! [`MemCal`] is the in-memory reference implementation used by the test
//! suites and the admin binary.

mod mem;
mod svc;

pub use mem::MemCal;
pub use svc::{
    CalendarSvc, FixShareeResult, Identity, SubscriptionCheck, SvcFactory,
};

/// Result type for service operations.
pub type SvcResult<T> = Result<T, SvcError>;

/// Errors surfaced by the service API.
#[derive(Debug, thiserror::Error)]
pub enum SvcError {
    /// The session's identity lacks the privilege for the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// An entity with the same identifier already exists.
    #[error("duplicate entity: {0}")]
    Duplicate(String),

    /// A mutating call was made outside a transaction.
    #[error("no open transaction")]
    NoTransaction,

    /// Underlying store failure.
    #[error("persistence failure: {0}")]
    Persistence(String),
}
