//! The service API trait and its result vocabulary.

use crate::SvcResult;
use async_trait::async_trait;
use calvault_model::{Category, Collection, Contact, Event, Location};
use calvault_types::{CollectionPath, DesiredAccess, OwnerId, Privilege};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The principal a session is opened as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub owner: OwnerId,
    /// True for the public-admin principal used by dump/restore/repair.
    pub public_admin: bool,
}

impl Identity {
    /// A plain user identity.
    pub fn user(owner: OwnerId) -> Self {
        Self {
            owner,
            public_admin: false,
        }
    }

    /// The administrative identity for a given service account.
    pub fn admin(owner: OwnerId) -> Self {
        Self {
            owner,
            public_admin: true,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.public_admin {
            write!(f, "{} (admin)", self.owner)
        } else {
            write!(f, "{}", self.owner)
        }
    }
}

/// Outcome of checking one external subscription against the
/// synchronization service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionCheck {
    /// Subscription is healthy; nothing to do.
    Ok,
    /// Target no longer resolvable.
    NotFound,
    /// The collection is not an external subscription.
    NotExternal,
    /// Subscription was re-established.
    Resubscribed,
    /// The synchronization service itself is unreachable. Fatal for the
    /// whole batch.
    NoSynchService,
    /// The check failed for this subscription only.
    Failed,
}

impl fmt::Display for SubscriptionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::NotFound => "notFound",
            Self::NotExternal => "notExternal",
            Self::Resubscribed => "resubscribed",
            Self::NoSynchService => "noSynchService",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Outcome of the idempotent fix-sharee operation on a sharer's
/// invitation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixShareeResult {
    /// Invitation already matches the desired access.
    Ok,
    /// The sharer lost access to its own record.
    NoAccess,
    /// The desired access cannot be expressed in the sharing model.
    WrongAccess,
    /// Target collection vanished between the phases.
    NotFound,
    /// Applying the grant would create an alias cycle. Nothing is applied.
    Circular,
    /// The target is an alias whose own target is gone.
    Broken,
    /// Invitation was rewritten with the desired access.
    Reshared,
    /// Underlying persistence error for this sharee only.
    Failed,
}

impl fmt::Display for FixShareeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::NoAccess => "noAccess",
            Self::WrongAccess => "wrongAccess",
            Self::NotFound => "notFound",
            Self::Circular => "circular",
            Self::Broken => "broken",
            Self::Reshared => "reshared",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One open session against the calendaring service, bound to the identity
/// it was opened with.
///
/// Mutating operations require an open transaction. `merge` on the `put_*`
/// family overwrites an existing entity with the same identifier instead of
/// failing with [`crate::SvcError::Duplicate`].
#[async_trait]
pub trait CalendarSvc: Send + Sync {
    /// The identity this session was opened as.
    fn identity(&self) -> &Identity;

    async fn begin_transaction(&self) -> SvcResult<()>;
    async fn end_transaction(&self) -> SvcResult<()>;

    // ── Restore-side writers ─────────────────────────────────────

    async fn put_category(&self, cat: Category, merge: bool) -> SvcResult<()>;
    async fn put_location(&self, loc: Location, merge: bool) -> SvcResult<()>;
    async fn put_contact(&self, contact: Contact, merge: bool) -> SvcResult<()>;
    async fn put_collection(&self, col: Collection, merge: bool) -> SvcResult<()>;
    async fn put_event(
        &self,
        collection: &CollectionPath,
        event: Event,
        merge: bool,
    ) -> SvcResult<()>;

    // ── Dump-side readers ────────────────────────────────────────

    async fn owners(&self) -> SvcResult<Vec<OwnerId>>;
    async fn categories(&self) -> SvcResult<Vec<Category>>;
    async fn locations(&self) -> SvcResult<Vec<Location>>;
    async fn contacts(&self) -> SvcResult<Vec<Contact>>;
    async fn child_collections(&self, path: &CollectionPath) -> SvcResult<Vec<Collection>>;
    async fn events_in(&self, path: &CollectionPath) -> SvcResult<Vec<Event>>;

    // ── Lookups and repair ───────────────────────────────────────

    /// Fetches a collection under this session's identity. `Ok(None)` when
    /// it does not exist; `AccessDenied` when it exists but the identity
    /// may not see it.
    async fn get_collection(&self, path: &CollectionPath) -> SvcResult<Option<Collection>>;

    async fn get_event(&self, href: &str) -> SvcResult<Option<Event>>;
    async fn update_event(&self, href: &str, event: Event) -> SvcResult<()>;

    /// Ordered enumeration of event hrefs, for resumable batch jobs.
    async fn event_hrefs(&self, offset: usize, limit: usize) -> SvcResult<Vec<String>>;

    // ── Access and sharing ───────────────────────────────────────

    /// Checks one privilege of this session's identity on a collection.
    /// `mandatory` requests evaluation against explicit grants only,
    /// without inherited defaults.
    async fn check_access(
        &self,
        col: &Collection,
        privilege: Privilege,
        mandatory: bool,
    ) -> SvcResult<bool>;

    async fn check_subscription(&self, path: &CollectionPath) -> SvcResult<SubscriptionCheck>;

    /// Idempotently aligns the sharer's invitation record for `sharee`
    /// with the desired access.
    async fn fix_sharee(
        &self,
        target: &Collection,
        sharee: &OwnerId,
        access: DesiredAccess,
    ) -> SvcResult<FixShareeResult>;
}

/// Opens sessions for impersonated identities.
#[async_trait]
pub trait SvcFactory: Send + Sync {
    async fn open_session(&self, identity: Identity) -> SvcResult<Arc<dyn CalendarSvc>>;
}
