//! Run counters and reconciliation tallies.
//!
//! Counters are purely observational: nothing depends on them for
//! correctness. They are reset at the start of a run, incremented
//! monotonically, and reported at the end (or snapshotted mid-run for
//! progress polling).

use serde::{Deserialize, Serialize};

/// Receives progress from a long-running engine pass.
///
/// Implementations must not block: workers publish through this from the
/// middle of a streaming pass.
pub trait ProgressListener: Send + Sync {
    /// A human-readable diagnostic or progress line.
    fn line(&self, msg: &str);

    /// A snapshot of the per-kind counters gathered so far.
    fn counts(&self, counts: &EntityCounts);
}

/// Listener that discards everything.
pub struct NullListener;

impl ProgressListener for NullListener {
    fn line(&self, _msg: &str) {}
    fn counts(&self, _counts: &EntityCounts) {}
}

/// Per-entity-kind tallies for one dump or restore pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub categories: u64,
    pub locations: u64,
    pub contacts: u64,
    pub collections: u64,
    pub events: u64,
    pub overrides: u64,
    pub aliases: u64,
    pub external_subs: u64,
    /// Subtrees skipped by scope gating or lenient-mode unknown elements.
    pub skipped: u64,
    /// Per-entity failures that did not abort the run.
    pub failures: u64,
    /// Forward references never satisfied by end of stream.
    pub unresolved: u64,
}

impl EntityCounts {
    /// Formats the counters as report lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("   categories: {}", self.categories),
            format!("    locations: {}", self.locations),
            format!("     contacts: {}", self.contacts),
            format!("  collections: {}", self.collections),
            format!("       events: {}", self.events),
            format!("    overrides: {}", self.overrides),
            format!("      aliases: {}", self.aliases),
            format!(" external subs: {}", self.external_subs),
            format!("      skipped: {}", self.skipped),
            format!("     failures: {}", self.failures),
            format!("   unresolved: {}", self.unresolved),
        ]
    }
}

/// Tallies for one external-subscription check batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsTallies {
    pub checked: u64,
    pub ok: u64,
    pub not_found: u64,
    pub not_external: u64,
    pub resubscribed: u64,
    pub failed: u64,
    pub access_errors: u64,
    pub errors: u64,
}

impl SubsTallies {
    /// Formats the tallies as report lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("Checked {} subscriptions", self.checked),
            format!("       errors: {}", self.errors),
            format!("access errors: {}", self.access_errors),
            format!("           ok: {}", self.ok),
            format!("    not found: {}", self.not_found),
            format!("  notExternal: {}", self.not_external),
            format!(" resubscribed: {}", self.resubscribed),
            format!("       failed: {}", self.failed),
        ]
    }
}

/// Tallies for one alias-repair batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileTallies {
    pub checked: u64,
    pub ok: u64,
    pub public: u64,
    pub not_found: u64,
    pub no_access: u64,
    /// Write-without-read aliases: warned and skipped, never repaired.
    pub incompatible: u64,
    /// Grants actually rewritten (`reshared`).
    pub fixed: u64,
    pub failed: u64,
    /// Unexpected errors, classified separately from domain-level failures.
    pub errors: u64,
}

impl ReconcileTallies {
    /// Formats the tallies as report lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("Checked {} aliases", self.checked),
            format!("       errors: {}", self.errors),
            format!("access errors: {}", self.no_access),
            format!("           ok: {}", self.ok),
            format!("       public: {}", self.public),
            format!("    not found: {}", self.not_found),
            format!(" incompatible: {}", self.incompatible),
            format!("        fixed: {}", self.fixed),
            format!("       failed: {}", self.failed),
        ]
    }
}
