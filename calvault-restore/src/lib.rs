//! Streaming restore engine for CalVault.
//!
//! Rebuilds a live, referentially consistent object graph from a dump
//! stream in a single forward pass. A rule stack machine turns tag events
//! into partially built entities on an explicit construction stack; the
//! entity registry resolves forward references (recurrence overrides,
//! alias targets); the driver commits one top-level collection subtree at
//! a time so a failed run leaves previously committed subtrees intact.

mod engine;
mod machine;
mod registry;
mod rules;

pub use engine::{
    load_alias_info, AliasInfoDump, RestoreConfig, RestoreOutcome, RestoreRun, RestoreScope,
    Restorer,
};
pub use machine::Mode;
pub use registry::{EntityRegistry, OrphanOverride};

/// Result type for restore operations.
pub type RestoreResult<T> = Result<T, RestoreError>;

/// Errors that abort a restore run.
///
/// Per-entity problems never surface here: they are tallied in the run's
/// counters and reported as diagnostic lines instead.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    /// Malformed or unexpected markup. Fatal to the current run.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// The stream header carries a version this build does not understand.
    #[error("unsupported dump format version {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },

    /// Markup-level parse error.
    #[error("markup error: {0}")]
    Markup(#[from] quick_xml::Error),

    /// The stream could not be read.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The restore session itself failed (opening, transactions).
    #[error("service error: {0}")]
    Service(#[from] calvault_store::SvcError),
}
