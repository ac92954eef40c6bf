//! In-memory reference implementation of the service API.
//!
//! Backs the test suites and the admin binary. All sessions opened from one
//! [`MemCal`] share a single dataset behind an async lock; access checks and
//! the sharing model are implemented faithfully enough to exercise the
//! engines, including alias-cycle detection and injectable failure modes.

use crate::svc::{CalendarSvc, FixShareeResult, Identity, SubscriptionCheck, SvcFactory};
use crate::{SvcError, SvcResult};
use async_trait::async_trait;
use calvault_model::{Category, Collection, CollectionKind, Contact, Event, Location};
use calvault_types::{CollectionPath, DesiredAccess, OwnerId, Privilege};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct MemState {
    owners: BTreeSet<OwnerId>,
    categories: BTreeMap<String, Category>,
    locations: BTreeMap<String, Location>,
    contacts: BTreeMap<String, Contact>,
    collections: BTreeMap<CollectionPath, Collection>,
    /// Events per collection, keyed by uid.
    events: BTreeMap<CollectionPath, BTreeMap<String, Event>>,
    /// Explicit (read, write) grants per (collection, sharee).
    grants: HashMap<(CollectionPath, OwnerId), (bool, bool)>,
    /// Sharer-side invitation records per target collection.
    invites: HashMap<CollectionPath, HashMap<OwnerId, DesiredAccess>>,
    /// Injected subscription-check outcomes for specific paths.
    subscription_results: HashMap<CollectionPath, SubscriptionCheck>,
    /// Paths whose fix-sharee call fails with a persistence error.
    fail_fix: HashSet<CollectionPath>,
    synch_available: bool,
    /// Number of sharing-state mutations performed (for idempotence tests).
    mutations: u64,
}

/// Shared in-memory calendaring service.
#[derive(Clone)]
pub struct MemCal {
    state: Arc<RwLock<MemState>>,
}

impl MemCal {
    /// Creates an empty service with the synchronization service up.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemState {
                synch_available: true,
                ..Default::default()
            })),
        }
    }

    // ── Dataset setup and inspection (bypasses access checks) ────

    /// Grants `sharee` explicit read/write access on a collection.
    pub async fn grant(&self, path: CollectionPath, sharee: OwnerId, read: bool, write: bool) {
        self.state
            .write()
            .await
            .grants
            .insert((path, sharee), (read, write));
    }

    /// Forces the outcome of `check_subscription` for a path.
    pub async fn set_subscription_result(&self, path: CollectionPath, result: SubscriptionCheck) {
        self.state
            .write()
            .await
            .subscription_results
            .insert(path, result);
    }

    /// Marks the synchronization service up or down.
    pub async fn set_synch_available(&self, available: bool) {
        self.state.write().await.synch_available = available;
    }

    /// Makes `fix_sharee` fail with a persistence error for a path.
    pub async fn fail_fix_for(&self, path: CollectionPath) {
        self.state.write().await.fail_fix.insert(path);
    }

    /// Number of sharing-state mutations performed so far.
    pub async fn mutations(&self) -> u64 {
        self.state.read().await.mutations
    }

    /// Raw collection lookup, ignoring access checks.
    pub async fn collection(&self, path: &CollectionPath) -> Option<Collection> {
        self.state.read().await.collections.get(path).cloned()
    }

    /// Raw event lookup by href, ignoring access checks.
    pub async fn event(&self, href: &str) -> Option<Event> {
        let (path, uid) = split_href(href)?;
        self.state
            .read()
            .await
            .events
            .get(&path)
            .and_then(|m| m.get(uid).cloned())
    }

    /// The sharer-side invitation for `sharee` on `target`, if any.
    pub async fn invite_for(
        &self,
        target: &CollectionPath,
        sharee: &OwnerId,
    ) -> Option<DesiredAccess> {
        self.state
            .read()
            .await
            .invites
            .get(target)
            .and_then(|m| m.get(sharee).copied())
    }
}

impl Default for MemCal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SvcFactory for MemCal {
    async fn open_session(&self, identity: Identity) -> SvcResult<Arc<dyn CalendarSvc>> {
        debug!("opening session for {identity}");
        Ok(Arc::new(MemSession {
            state: self.state.clone(),
            identity,
            in_tx: AtomicBool::new(false),
        }))
    }
}

struct MemSession {
    state: Arc<RwLock<MemState>>,
    identity: Identity,
    in_tx: AtomicBool,
}

impl MemSession {
    fn require_tx(&self) -> SvcResult<()> {
        if self.in_tx.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SvcError::NoTransaction)
        }
    }
}

/// Splits an event href into its collection path and uid.
fn split_href(href: &str) -> Option<(CollectionPath, &str)> {
    let idx = href.rfind('/')?;
    if idx == 0 {
        return None;
    }
    Some((CollectionPath::new(&href[..idx]), &href[idx + 1..]))
}

/// Walks the alias chain from `start`; true when it revisits a node.
fn alias_chain_is_circular(state: &MemState, start: &CollectionPath) -> bool {
    let mut visited = HashSet::new();
    let mut current = start.clone();
    loop {
        if !visited.insert(current.clone()) {
            return true;
        }
        match state.collections.get(&current).map(|c| &c.kind) {
            Some(CollectionKind::Alias { target }) => current = target.clone(),
            _ => return false,
        }
    }
}

#[async_trait]
impl CalendarSvc for MemSession {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn begin_transaction(&self) -> SvcResult<()> {
        self.in_tx.store(true, Ordering::Release);
        Ok(())
    }

    async fn end_transaction(&self) -> SvcResult<()> {
        self.in_tx.store(false, Ordering::Release);
        Ok(())
    }

    async fn put_category(&self, cat: Category, merge: bool) -> SvcResult<()> {
        self.require_tx()?;
        let mut st = self.state.write().await;
        if !merge && st.categories.contains_key(&cat.uid) {
            return Err(SvcError::Duplicate(format!("category {}", cat.uid)));
        }
        st.categories.insert(cat.uid.clone(), cat);
        Ok(())
    }

    async fn put_location(&self, loc: Location, merge: bool) -> SvcResult<()> {
        self.require_tx()?;
        let mut st = self.state.write().await;
        if !merge && st.locations.contains_key(&loc.uid) {
            return Err(SvcError::Duplicate(format!("location {}", loc.uid)));
        }
        st.locations.insert(loc.uid.clone(), loc);
        Ok(())
    }

    async fn put_contact(&self, contact: Contact, merge: bool) -> SvcResult<()> {
        self.require_tx()?;
        let mut st = self.state.write().await;
        if !merge && st.contacts.contains_key(&contact.uid) {
            return Err(SvcError::Duplicate(format!("contact {}", contact.uid)));
        }
        st.contacts.insert(contact.uid.clone(), contact);
        Ok(())
    }

    async fn put_collection(&self, col: Collection, merge: bool) -> SvcResult<()> {
        self.require_tx()?;
        let mut st = self.state.write().await;
        if !merge && st.collections.contains_key(&col.path) {
            return Err(SvcError::Duplicate(format!("collection {}", col.path)));
        }
        st.owners.insert(col.owner.clone());
        st.collections.insert(col.path.clone(), col);
        Ok(())
    }

    async fn put_event(
        &self,
        collection: &CollectionPath,
        event: Event,
        merge: bool,
    ) -> SvcResult<()> {
        self.require_tx()?;
        let mut st = self.state.write().await;
        if !st.collections.contains_key(collection) {
            return Err(SvcError::Persistence(format!(
                "no collection {collection} for event {}",
                event.uid
            )));
        }
        let events = st.events.entry(collection.clone()).or_default();
        if !merge && events.contains_key(&event.uid) {
            return Err(SvcError::Duplicate(format!("event {}", event.uid)));
        }
        events.insert(event.uid.clone(), event);
        Ok(())
    }

    async fn owners(&self) -> SvcResult<Vec<OwnerId>> {
        Ok(self.state.read().await.owners.iter().cloned().collect())
    }

    async fn categories(&self) -> SvcResult<Vec<Category>> {
        Ok(self.state.read().await.categories.values().cloned().collect())
    }

    async fn locations(&self) -> SvcResult<Vec<Location>> {
        Ok(self.state.read().await.locations.values().cloned().collect())
    }

    async fn contacts(&self) -> SvcResult<Vec<Contact>> {
        Ok(self.state.read().await.contacts.values().cloned().collect())
    }

    async fn child_collections(&self, path: &CollectionPath) -> SvcResult<Vec<Collection>> {
        let st = self.state.read().await;
        Ok(st
            .collections
            .values()
            .filter(|c| c.path.parent().as_ref() == Some(path))
            .cloned()
            .collect())
    }

    async fn events_in(&self, path: &CollectionPath) -> SvcResult<Vec<Event>> {
        let st = self.state.read().await;
        Ok(st
            .events
            .get(path)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_collection(&self, path: &CollectionPath) -> SvcResult<Option<Collection>> {
        let st = self.state.read().await;
        let Some(col) = st.collections.get(path) else {
            return Ok(None);
        };
        if self.identity.public_admin || col.owner == self.identity.owner || col.public {
            return Ok(Some(col.clone()));
        }
        match st.grants.get(&(path.clone(), self.identity.owner.clone())) {
            Some((read, write)) if *read || *write => Ok(Some(col.clone())),
            _ => Err(SvcError::AccessDenied(format!(
                "{} may not read {path}",
                self.identity
            ))),
        }
    }

    async fn get_event(&self, href: &str) -> SvcResult<Option<Event>> {
        let Some((path, uid)) = split_href(href) else {
            return Err(SvcError::Persistence(format!("invalid href {href}")));
        };
        let st = self.state.read().await;
        Ok(st.events.get(&path).and_then(|m| m.get(uid).cloned()))
    }

    async fn update_event(&self, href: &str, event: Event) -> SvcResult<()> {
        self.require_tx()?;
        let Some((path, uid)) = split_href(href) else {
            return Err(SvcError::Persistence(format!("invalid href {href}")));
        };
        let mut st = self.state.write().await;
        let Some(events) = st.events.get_mut(&path) else {
            return Err(SvcError::Persistence(format!("no collection {path}")));
        };
        if !events.contains_key(uid) {
            return Err(SvcError::Persistence(format!("no event {href}")));
        }
        events.insert(uid.to_string(), event);
        Ok(())
    }

    async fn event_hrefs(&self, offset: usize, limit: usize) -> SvcResult<Vec<String>> {
        let st = self.state.read().await;
        Ok(st
            .events
            .iter()
            .flat_map(|(path, events)| {
                events.keys().map(move |uid| format!("{path}/{uid}"))
            })
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn check_access(
        &self,
        col: &Collection,
        privilege: Privilege,
        _mandatory: bool,
    ) -> SvcResult<bool> {
        if self.identity.public_admin || col.owner == self.identity.owner {
            return Ok(true);
        }
        if col.public {
            return Ok(matches!(privilege, Privilege::Read));
        }
        let st = self.state.read().await;
        let granted = st
            .grants
            .get(&(col.path.clone(), self.identity.owner.clone()))
            .map(|(read, write)| match privilege {
                Privilege::Read => *read,
                Privilege::Write => *write,
            })
            .unwrap_or(false);
        Ok(granted)
    }

    async fn check_subscription(&self, path: &CollectionPath) -> SvcResult<SubscriptionCheck> {
        let st = self.state.read().await;
        if !st.synch_available {
            return Ok(SubscriptionCheck::NoSynchService);
        }
        if let Some(result) = st.subscription_results.get(path) {
            return Ok(*result);
        }
        match st.collections.get(path).map(|c| &c.kind) {
            None => Ok(SubscriptionCheck::NotFound),
            Some(CollectionKind::ExternalSub { .. }) => Ok(SubscriptionCheck::Ok),
            Some(_) => Ok(SubscriptionCheck::NotExternal),
        }
    }

    async fn fix_sharee(
        &self,
        target: &Collection,
        sharee: &OwnerId,
        access: DesiredAccess,
    ) -> SvcResult<FixShareeResult> {
        self.require_tx()?;
        let mut st = self.state.write().await;
        if st.fail_fix.contains(&target.path) {
            return Ok(FixShareeResult::Failed);
        }
        let Some(current) = st.collections.get(&target.path) else {
            return Ok(FixShareeResult::NotFound);
        };
        if let CollectionKind::Alias { target: next } = &current.kind {
            if !st.collections.contains_key(next) {
                return Ok(FixShareeResult::Broken);
            }
        }
        if alias_chain_is_circular(&st, &target.path) {
            return Ok(FixShareeResult::Circular);
        }
        let entry = st.invites.entry(target.path.clone()).or_default();
        if entry.get(sharee) == Some(&access) {
            return Ok(FixShareeResult::Ok);
        }
        entry.insert(sharee.clone(), access);
        st.mutations += 1;
        debug!("reshared {} on {} as {access}", sharee, target.path);
        Ok(FixShareeResult::Reshared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_href_rejects_rootless() {
        assert!(split_href("noslash").is_none());
        assert!(split_href("/toplevel").is_none());
        let (path, uid) = split_href("/user/fred/cal/abc").unwrap();
        assert_eq!(path.as_str(), "/user/fred/cal");
        assert_eq!(uid, "abc");
    }
}
