//! Alias and external-subscription bookkeeping.
//!
//! These records are produced while a dump or restore walks the collection
//! tree and are consumed only by the reconciler. They are never persisted in
//! this form; a run hands them over by reference and drops them.

use crate::{CollectionPath, OwnerId};
use serde::{Deserialize, Serialize};

/// One alias or external subscription observed during a run.
///
/// `path` is the alias collection itself (the sharee's side); the target it
/// points at is the key of the enclosing [`AliasEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasInfo {
    /// Owner of the alias collection (the sharee).
    pub owner: OwnerId,
    /// True when the alias lives in the public tree.
    pub public_owner: bool,
    /// Path of the alias collection.
    pub path: CollectionPath,
    /// Set by the reconciler when fetching the target as the sharee failed
    /// (missing or access denied). Carried in alias-info dumps so a later
    /// pass can see which aliases are broken without re-running the repair.
    pub no_access: bool,
}

impl AliasInfo {
    /// Creates a record for an alias collection.
    pub fn new(owner: OwnerId, path: CollectionPath, public_owner: bool) -> Self {
        Self {
            owner,
            public_owner,
            path,
            no_access: false,
        }
    }
}

/// Every alias pointing at one shared (target) collection.
///
/// Insertion order is preserved for deterministic reporting; it carries no
/// semantic meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    /// Path of the target collection.
    pub target: CollectionPath,
    /// The aliases pointing at it.
    pub aliases: Vec<AliasInfo>,
}

impl AliasEntry {
    /// Creates an empty entry for a target path.
    pub fn new(target: CollectionPath) -> Self {
        Self {
            target,
            aliases: Vec::new(),
        }
    }

    /// Adds one alias record.
    pub fn push(&mut self, info: AliasInfo) {
        self.aliases.push(info);
    }
}
