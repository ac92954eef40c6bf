//! Collections: folders, calendars, aliases, external subscriptions.

use calvault_types::{CollectionPath, OwnerId};
use serde::{Deserialize, Serialize};

/// What a collection is, and (for aliases) what it points at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
    /// Plain folder grouping child collections.
    Folder,
    /// A calendar holding events.
    #[default]
    Calendar,
    /// A reference to another collection, possibly owned by someone else.
    Alias { target: CollectionPath },
    /// A subscription whose target lives outside this system's authority.
    ExternalSub { target: String },
}

/// One collection node in an owner's calendar tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub path: CollectionPath,
    pub name: String,
    pub owner: OwnerId,
    /// True for collections in the public tree.
    pub public: bool,
    pub kind: CollectionKind,
}

impl Collection {
    /// Creates a calendar collection.
    pub fn calendar(path: CollectionPath, owner: OwnerId) -> Self {
        let name = path.name().to_string();
        Self {
            path,
            name,
            owner,
            public: false,
            kind: CollectionKind::Calendar,
        }
    }

    /// Creates an alias collection pointing at `target`.
    pub fn alias(path: CollectionPath, owner: OwnerId, target: CollectionPath) -> Self {
        let name = path.name().to_string();
        Self {
            path,
            name,
            owner,
            public: false,
            kind: CollectionKind::Alias { target },
        }
    }

    /// True when this collection is an alias (internal or external).
    #[must_use]
    pub fn is_alias(&self) -> bool {
        matches!(
            self.kind,
            CollectionKind::Alias { .. } | CollectionKind::ExternalSub { .. }
        )
    }

    /// The alias target path, when this is an internal alias.
    #[must_use]
    pub fn alias_target(&self) -> Option<&CollectionPath> {
        match &self.kind {
            CollectionKind::Alias { target } => Some(target),
            _ => None,
        }
    }
}
