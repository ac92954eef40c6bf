//! Dump tree walker for CalVault.
//!
//! Visits the live service in a fixed order (categories, locations,
//! contacts, then each owner's collection tree with events nested, then the
//! alias and external-subscription sections) and emits the dump markup
//! with the current version stamp. Collects alias/subscription info for the
//! reconciler along the way.
//!
//! Shares the tag vocabulary and versioning scheme with the restore engine;
//! it is the same schema walked in the inverse direction.

mod walker;

pub use walker::{DumpConfig, DumpOutcome, Dumper};

/// Result type for dump operations.
pub type DumpResult<T> = Result<T, DumpError>;

/// Errors that abort a dump run.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    /// The output could not be written.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Markup-level write error.
    #[error("markup error: {0}")]
    Markup(#[from] quick_xml::Error),

    /// The dump session failed.
    #[error("service error: {0}")]
    Service(#[from] calvault_store::SvcError),
}
