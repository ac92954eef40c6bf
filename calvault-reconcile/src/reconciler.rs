//! Subscription checking and two-phase alias repair.

use crate::session::SessionCache;
use crate::ReconcileError;
use calvault_model::Collection;
use calvault_store::{
    FixShareeResult, Identity, SubscriptionCheck, SvcError, SvcFactory,
};
use calvault_types::{
    AliasEntry, AliasInfo, CollectionPath, DesiredAccess, Privilege, ProgressListener,
    ReconcileTallies, SubsTallies,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of the sharee phase for one alias.
enum Phase1 {
    /// The alias was classified; no repair is needed or possible.
    Settled,
    /// The sharee's effective access was measured; run the sharer phase.
    Granted {
        target: Collection,
        access: DesiredAccess,
    },
}

/// Batch reconciler for alias and subscription consistency.
///
/// Every item is processed independently; failure in one never blocks the
/// next. The only batch-fatal condition is an unavailable synchronization
/// service, which stops the subscription check immediately.
pub struct Reconciler {
    cache: SessionCache,
}

impl Reconciler {
    pub fn new(factory: Arc<dyn SvcFactory>) -> Self {
        Self {
            cache: SessionCache::new(factory),
        }
    }

    /// Verifies every external subscription against the synchronization
    /// service, classifying and tallying each outcome.
    pub async fn check_subscriptions(
        &mut self,
        subs: &[AliasInfo],
        listener: &dyn ProgressListener,
    ) -> SubsTallies {
        let mut tallies = SubsTallies::default();
        if subs.is_empty() {
            listener.line("No external subscriptions");
            return tallies;
        }
        info!("about to process {} external subscriptions", subs.len());

        'check: for info in subs {
            let identity = Identity {
                owner: info.owner.clone(),
                public_admin: info.public_owner,
            };
            let svc = match self.cache.session(&identity).await {
                Ok(svc) => svc,
                Err(err) => {
                    tallies.errors += 1;
                    error!("session for {}: {err}", info.owner);
                    continue;
                }
            };

            match svc.check_subscription(&info.path).await {
                Ok(result) => {
                    match result {
                        SubscriptionCheck::Ok => tallies.ok += 1,
                        SubscriptionCheck::NotFound => tallies.not_found += 1,
                        SubscriptionCheck::NotExternal => tallies.not_external += 1,
                        SubscriptionCheck::Resubscribed => tallies.resubscribed += 1,
                        SubscriptionCheck::NoSynchService => {
                            listener.line("Synch service is unavailable");
                            info!("synch service is unavailable");
                            break 'check;
                        }
                        SubscriptionCheck::Failed => tallies.failed += 1,
                    }
                    if !matches!(
                        result,
                        SubscriptionCheck::Ok | SubscriptionCheck::Resubscribed
                    ) {
                        listener.line(&format!(
                            "Status: {result} for {} owner: {}",
                            info.path, info.owner
                        ));
                    }
                    tallies.checked += 1;
                    if tallies.checked % 100 == 0 {
                        info!("checked {} subscriptions", tallies.checked);
                        listener.line(&format!("Checked {} subscriptions", tallies.checked));
                    }
                }
                Err(SvcError::AccessDenied(_)) => {
                    tallies.access_errors += 1;
                }
                Err(err) => {
                    tallies.errors += 1;
                    error!("checking {}: {err}", info.path);
                }
            }
        }

        self.cache.release().await;
        for line in tallies.lines() {
            listener.line(&line);
        }
        tallies
    }

    /// Repairs the sharing metadata of every aliased collection by
    /// recomputing each sharee's effective access and writing it into the
    /// sharer's invitation record. Aliases whose sharee-side fetch fails
    /// get their `no_access` flag set, so a later alias-info dump records
    /// which links are broken.
    pub async fn fix_aliases(
        &mut self,
        aliases: &mut HashMap<CollectionPath, AliasEntry>,
        listener: &dyn ProgressListener,
    ) -> ReconcileTallies {
        let mut tallies = ReconcileTallies::default();
        if aliases.is_empty() {
            listener.line("No aliases");
            return tallies;
        }
        info!("about to process {} alias targets", aliases.len());

        // deterministic reporting across runs
        let mut targets: Vec<CollectionPath> = aliases.keys().cloned().collect();
        targets.sort();

        for target in &targets {
            let Some(entry) = aliases.get_mut(target) else {
                continue;
            };
            for info in &mut entry.aliases {
                tallies.checked += 1;

                let phase1 = self.sharee_phase(target, info, &mut tallies, listener).await;
                if matches!(phase1, Phase1::Settled) {
                    continue;
                }
                if let Err(err) = self
                    .sharer_phase(phase1, info, &mut tallies, listener)
                    .await
                {
                    tallies.failed += 1;
                    error!("alias {}: {err}", info.path);
                    listener.line(&format!("Failed {}: {err}", info.path));
                }

                if tallies.checked % 100 == 0 {
                    info!("checked {} aliases", tallies.checked);
                    listener.line(&format!("Checked {} aliases", tallies.checked));
                }
            }
        }

        self.cache.release().await;
        for line in tallies.lines() {
            listener.line(&line);
        }
        tallies
    }

    /// Phase one: impersonate the sharee and measure its effective access
    /// on the target collection.
    async fn sharee_phase(
        &mut self,
        target: &CollectionPath,
        info: &mut AliasInfo,
        tallies: &mut ReconcileTallies,
        listener: &dyn ProgressListener,
    ) -> Phase1 {
        if info.public_owner {
            tallies.public += 1;
            return Phase1::Settled;
        }

        let identity = Identity::user(info.owner.clone());
        let svc = match self.cache.session(&identity).await {
            Ok(svc) => svc,
            Err(err) => {
                tallies.errors += 1;
                error!("session for sharee {}: {err}", info.owner);
                return Phase1::Settled;
            }
        };

        let target_col = match svc.get_collection(target).await {
            Ok(Some(col)) => col,
            Ok(None) => {
                info.no_access = true;
                tallies.no_access += 1;
                return Phase1::Settled;
            }
            Err(SvcError::AccessDenied(_)) => {
                info.no_access = true;
                tallies.no_access += 1;
                return Phase1::Settled;
            }
            Err(err) => {
                tallies.errors += 1;
                error!("fetching {target} as {}: {err}", info.owner);
                return Phase1::Settled;
            }
        };

        if target_col.public {
            tallies.public += 1;
            return Phase1::Settled;
        }

        let write = match svc.check_access(&target_col, Privilege::Write, true).await {
            Ok(granted) => granted,
            Err(err) => {
                tallies.errors += 1;
                error!("write check on {target}: {err}");
                return Phase1::Settled;
            }
        };
        let read = match svc.check_access(&target_col, Privilege::Read, true).await {
            Ok(granted) => granted,
            Err(err) => {
                tallies.errors += 1;
                error!("read check on {target}: {err}");
                return Phase1::Settled;
            }
        };

        match DesiredAccess::from_checks(read, write) {
            Some(access) => Phase1::Granted {
                target: target_col,
                access,
            },
            None if !read && !write => {
                tallies.no_access += 1;
                Phase1::Settled
            }
            None => {
                // write without read cannot be expressed in the sharing
                // model: warn and skip, never an error
                warn!("incompatible access for {}", info.path);
                listener.line(&format!("Incompatible access for {}", info.path));
                tallies.incompatible += 1;
                Phase1::Settled
            }
        }
    }

    /// Phase two: impersonate the sharer and align its invitation record
    /// with the measured access. Must never run without a phase-one grant.
    async fn sharer_phase(
        &mut self,
        phase1: Phase1,
        info: &AliasInfo,
        tallies: &mut ReconcileTallies,
        listener: &dyn ProgressListener,
    ) -> Result<(), ReconcileError> {
        let Phase1::Granted { target, access } = phase1 else {
            return Err(ReconcileError::ProtocolViolation(
                "sharer phase entered without an access descriptor".to_string(),
            ));
        };

        // switching identity releases the sharee session first
        let identity = Identity::user(target.owner.clone());
        let svc = match self.cache.session(&identity).await {
            Ok(svc) => svc,
            Err(err) => {
                tallies.errors += 1;
                error!("session for sharer {}: {err}", target.owner);
                return Ok(());
            }
        };

        match svc.fix_sharee(&target, &info.owner, access).await {
            Ok(result) => {
                match result {
                    FixShareeResult::Ok => tallies.ok += 1,
                    FixShareeResult::NoAccess => tallies.no_access += 1,
                    FixShareeResult::WrongAccess => {
                        warn!("incompatible access for {}", info.path);
                        tallies.incompatible += 1;
                    }
                    FixShareeResult::NotFound | FixShareeResult::Broken => {
                        tallies.not_found += 1;
                    }
                    FixShareeResult::Circular => {
                        warn!("circular aliases for {}", info.path);
                        listener.line(&format!("Circular aliases for {}", info.path));
                    }
                    FixShareeResult::Reshared => tallies.fixed += 1,
                    FixShareeResult::Failed => tallies.failed += 1,
                }
                if !matches!(result, FixShareeResult::Ok | FixShareeResult::Reshared) {
                    listener.line(&format!(
                        "Status: {result} for {} owner: {}",
                        info.path, info.owner
                    ));
                }
            }
            Err(SvcError::AccessDenied(_)) => {
                tallies.no_access += 1;
            }
            Err(err) => {
                tallies.errors += 1;
                error!("fix sharee on {}: {err}", target.path);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calvault_store::MemCal;
    use calvault_types::NullListener;

    #[tokio::test]
    async fn sharer_phase_without_grant_is_a_protocol_violation() {
        let mut reconciler = Reconciler::new(Arc::new(MemCal::new()));
        let info = AliasInfo::new(
            calvault_types::OwnerId::new("sam"),
            CollectionPath::new("/user/sam/link"),
            false,
        );
        let mut tallies = ReconcileTallies::default();
        let err = reconciler
            .sharer_phase(Phase1::Settled, &info, &mut tallies, &NullListener)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::ProtocolViolation(_)));
    }
}
