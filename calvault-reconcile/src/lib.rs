//! Alias and external-subscription reconciler for CalVault.
//!
//! After a dump or restore, sharing relationships may be inconsistent:
//! external subscriptions can have lost their synchronization-service
//! registration, and the invitation records on shared collections may no
//! longer match the access the sharees actually hold. This crate repairs
//! both, running against the live persisted data rather than any in-memory
//! tree.
//!
//! The per-alias repair is a two-phase protocol under two different
//! impersonated identities. Phase one becomes the alias owner (the sharee)
//! and measures the access that sharee has on the target collection. Phase
//! two becomes the target owner (the sharer) and rewrites the invitation
//! record accordingly. The sharee session is fully released before the
//! sharer session opens; the two are never held concurrently.

mod reconciler;
mod session;

pub use reconciler::Reconciler;
pub use session::SessionCache;

/// Errors internal to the reconciliation protocol.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The sharer phase was entered without a valid phase-one access
    /// descriptor. Fatal to that alias only.
    #[error("alias-fix protocol violation: {0}")]
    ProtocolViolation(String),

    /// Service failure outside the per-item classification.
    #[error("service error: {0}")]
    Service(#[from] calvault_store::SvcError),
}
