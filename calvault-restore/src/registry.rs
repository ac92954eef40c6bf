//! Entity registry for one streaming pass.
//!
//! Resolves references between entities that arrive in stream order:
//! recurrence overrides referencing their master, aliases referencing a
//! target path. References that can be wired immediately are; the rest are
//! queued and either satisfied when the target appears or flagged as
//! unresolved when the stream ends.

use calvault_types::{AliasEntry, AliasInfo, CollectionPath, EntityCounts, ProgressListener};
use std::collections::{HashMap, HashSet};

/// An orphaned override whose master never appeared in its collection.
#[derive(Debug, Clone)]
pub struct OrphanOverride {
    pub collection: CollectionPath,
    pub uid: String,
    pub recurrence_id: String,
}

/// In-memory reference map for one dump or restore pass.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    /// Collection paths observed in the stream.
    seen: HashSet<CollectionPath>,
    /// Alias records grouped by target path.
    aliases: HashMap<CollectionPath, AliasEntry>,
    /// External subscriptions in stream order.
    external_subs: Vec<AliasInfo>,
    /// Overrides left without a master at their collection's close.
    orphans: Vec<OrphanOverride>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a collection path exists in the stream.
    pub fn collection_seen(&mut self, path: CollectionPath) {
        self.seen.insert(path);
    }

    /// Records one alias pointing at `target`. A dump stream describes an
    /// alias twice (as a collection in the tree and as an alias-section
    /// record), so entries are deduplicated by alias path.
    pub fn record_alias(&mut self, target: CollectionPath, info: AliasInfo) {
        let entry = self
            .aliases
            .entry(target.clone())
            .or_insert_with(|| AliasEntry::new(target));
        if !entry.aliases.iter().any(|a| a.path == info.path) {
            entry.push(info);
        }
    }

    /// Records one external subscription, deduplicated by path.
    pub fn record_external_sub(&mut self, info: AliasInfo) {
        if !self.external_subs.iter().any(|s| s.path == info.path) {
            self.external_subs.push(info);
        }
    }

    /// Records an override whose master was missing at collection close.
    pub fn orphan_override(&mut self, orphan: OrphanOverride) {
        self.orphans.push(orphan);
    }

    /// Number of unresolved references so far (for mid-run snapshots).
    #[must_use]
    pub fn unresolved_len(&self) -> usize {
        self.orphans.len()
    }

    /// Ends the pass: flags every still-unresolved reference, updates the
    /// counters, and hands the alias info over to the caller.
    pub fn finish(
        self,
        counts: &mut EntityCounts,
        listener: &dyn ProgressListener,
    ) -> (HashMap<CollectionPath, AliasEntry>, Vec<AliasInfo>) {
        for orphan in &self.orphans {
            counts.unresolved += 1;
            listener.line(&format!(
                "Unresolved override {} ({}) in {}: master never appeared",
                orphan.uid, orphan.recurrence_id, orphan.collection
            ));
        }

        for (target, entry) in &self.aliases {
            if !self.seen.contains(target) {
                counts.unresolved += 1;
                listener.line(&format!(
                    "Alias target {target} not present in stream ({} alias(es))",
                    entry.aliases.len()
                ));
            }
        }

        (self.aliases, self.external_subs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calvault_types::{NullListener, OwnerId};

    #[test]
    fn missing_alias_target_is_flagged() {
        let mut reg = EntityRegistry::new();
        reg.record_alias(
            CollectionPath::new("/user/r/shared"),
            AliasInfo::new(
                OwnerId::new("sam"),
                CollectionPath::new("/user/sam/link"),
                false,
            ),
        );

        let mut counts = EntityCounts::default();
        let (aliases, subs) = reg.finish(&mut counts, &NullListener);
        assert_eq!(counts.unresolved, 1);
        assert_eq!(aliases.len(), 1);
        assert!(subs.is_empty());
    }

    #[test]
    fn seen_alias_target_is_clean() {
        let mut reg = EntityRegistry::new();
        reg.collection_seen(CollectionPath::new("/user/r/shared"));
        reg.record_alias(
            CollectionPath::new("/user/r/shared"),
            AliasInfo::new(
                OwnerId::new("sam"),
                CollectionPath::new("/user/sam/link"),
                false,
            ),
        );

        let mut counts = EntityCounts::default();
        let (aliases, _) = reg.finish(&mut counts, &NullListener);
        assert_eq!(counts.unresolved, 0);
        assert_eq!(aliases[&CollectionPath::new("/user/r/shared")].aliases.len(), 1);
    }
}
