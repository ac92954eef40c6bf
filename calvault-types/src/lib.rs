//! Core type definitions for CalVault.
//!
//! This crate defines the fundamental, engine-agnostic types used throughout
//! the dump/restore pipeline:
//! - Owner and collection-path identifiers
//! - The dump-format version stamp and tag vocabulary
//! - Access descriptors exchanged between the reconciler phases
//! - Alias/subscription bookkeeping records
//! - Run counters and reconciliation tallies
//!
//! Everything service-specific (the persistence API, the entity model)
//! belongs in its own crate, not here.

mod access;
mod alias;
mod counters;
mod ids;
pub mod tags;
mod version;

pub use access::{DesiredAccess, Privilege};
pub use alias::{AliasEntry, AliasInfo};
pub use counters::{EntityCounts, NullListener, ProgressListener, ReconcileTallies, SubsTallies};
pub use ids::{CollectionPath, OwnerId};
pub use version::{VersionStamp, FORMAT_MAJOR, FORMAT_MINOR};
