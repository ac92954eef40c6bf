//! Identity-scoped session cache.
//!
//! Consecutive calls under the same identity reuse one open session; a call
//! for a different identity first releases the previous one (ending its
//! transaction) and opens fresh. At most one session is held at a time,
//! which is what makes the two-phase alias protocol safe: the sharee's
//! session is gone before the sharer's exists.

use calvault_store::{CalendarSvc, Identity, SvcFactory, SvcResult};
use std::sync::Arc;
use tracing::{debug, error};

/// Caches one open service session keyed by identity.
pub struct SessionCache {
    factory: Arc<dyn SvcFactory>,
    current: Option<(Identity, Arc<dyn CalendarSvc>)>,
}

impl SessionCache {
    pub fn new(factory: Arc<dyn SvcFactory>) -> Self {
        Self {
            factory,
            current: None,
        }
    }

    /// Returns a session for `identity`, reusing the open one when the
    /// identity matches and otherwise releasing it first.
    pub async fn session(&mut self, identity: &Identity) -> SvcResult<Arc<dyn CalendarSvc>> {
        if let Some((current, svc)) = &self.current {
            if current == identity {
                return Ok(svc.clone());
            }
        }
        self.release().await;

        debug!("opening session as {identity}");
        let svc = self.factory.open_session(identity.clone()).await?;
        svc.begin_transaction().await?;
        self.current = Some((identity.clone(), svc.clone()));
        Ok(svc)
    }

    /// Ends the open transaction and drops the session. Errors are logged
    /// rather than propagated so release can run on every exit path.
    pub async fn release(&mut self) {
        if let Some((identity, svc)) = self.current.take() {
            if let Err(err) = svc.end_transaction().await {
                error!("ending transaction for {identity}: {err}");
            }
        }
    }

    /// The identity of the currently open session, if any.
    #[must_use]
    pub fn current_identity(&self) -> Option<&Identity> {
        self.current.as_ref().map(|(identity, _)| identity)
    }
}
