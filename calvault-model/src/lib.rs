//! Calendar entity model for CalVault.
//!
//! Plain-data types for everything the dump format carries: collections
//! (folders, calendars, aliases, external subscriptions), events with
//! recurrence overrides, and the auxiliary entity kinds (categories,
//! locations, contacts).
//!
//! The restore rules build these incrementally from the markup stream, so
//! most types are `Default`-constructible and validated at end-tag time.

mod collection;
mod event;

pub use collection::{Collection, CollectionKind};
pub use event::Event;

use calvault_types::OwnerId;
use serde::{Deserialize, Serialize};

/// A keyword category attachable to events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub uid: String,
    pub owner: OwnerId,
    /// The keyword itself.
    pub word: String,
}

/// A physical location referenced by events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uid: String,
    pub owner: OwnerId,
    pub address: String,
    /// External location key(s), `;`-separated when a location carries
    /// several. Used by the data-repair job to re-link events.
    pub key: Option<String>,
}

impl Location {
    /// Splits the external key field into individual trimmed keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.key
            .as_deref()
            .unwrap_or("")
            .split(';')
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// A contact referenced by events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub uid: String,
    pub owner: OwnerId,
    pub name: String,
    pub email: Option<String>,
}

/// Generates a fresh entity uid.
#[must_use]
pub fn new_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_keys_split_and_trim() {
        let loc = Location {
            key: Some("A1; B2 ;;C3".to_string()),
            ..Default::default()
        };
        let keys: Vec<&str> = loc.keys().collect();
        assert_eq!(keys, vec!["A1", "B2", "C3"]);
    }

    #[test]
    fn location_without_key_yields_nothing() {
        let loc = Location::default();
        assert_eq!(loc.keys().count(), 0);
    }

    #[test]
    fn new_uids_are_distinct() {
        assert_ne!(new_uid(), new_uid());
    }
}
