//! Events and recurrence overrides.

use calvault_types::{CollectionPath, OwnerId};
use serde::{Deserialize, Serialize};

/// A calendar event.
///
/// An override of a recurring event is itself an `Event` whose
/// `recurrence_id` is set; it is attached to its master's `overrides` list
/// when both sides of the reference have been seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub uid: String,
    pub owner: OwnerId,
    pub summary: String,
    /// Start/end in the dump's date-time text form (UTC basic format).
    pub start: String,
    pub end: String,
    /// Set on overrides: the recurrence instance this event replaces.
    pub recurrence_id: Option<String>,
    /// External location key, consumed by the data-repair job.
    pub location_key: Option<String>,
    /// Uid of the canonical location, once linked.
    pub location_uid: Option<String>,
    /// Category keywords attached to this event.
    pub categories: Vec<String>,
    /// Overrides of this master, empty for overrides themselves.
    pub overrides: Vec<Event>,
}

impl Event {
    /// True when this event is a recurrence override.
    #[must_use]
    pub fn is_override(&self) -> bool {
        self.recurrence_id.is_some()
    }

    /// The href of this event within `collection`.
    #[must_use]
    pub fn href_in(&self, collection: &CollectionPath) -> String {
        format!("{}/{}", collection, self.uid)
    }
}
