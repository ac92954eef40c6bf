//! Identifier types used throughout the CalVault core.
//!
//! Owners are account names, collection paths are `/`-separated hierarchical
//! paths rooted at `/user/<account>` or `/public`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account name of a principal that owns calendar data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Creates an owner id from an account name.
    pub fn new(account: impl Into<String>) -> Self {
        Self(account.into())
    }

    /// Returns the account name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a lowercased copy of this owner id.
    ///
    /// Used when a dump was taken from a system with case-insensitive
    /// accounts and the target system folds account names to lowercase.
    #[must_use]
    pub fn to_lowercase(&self) -> Self {
        Self(self.0.to_lowercase())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OwnerId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Hierarchical path of a collection, e.g. `/user/fred/calendar`.
///
/// Paths are normalized to start with `/` and never end with one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Creates a collection path, normalizing slashes.
    pub fn new(path: impl Into<String>) -> Self {
        let raw: String = path.into();
        let trimmed = raw.trim_end_matches('/');
        if trimmed.starts_with('/') {
            Self(trimmed.to_string())
        } else {
            Self(format!("/{trimmed}"))
        }
    }

    /// The home path of an owner's calendar tree.
    pub fn user_home(owner: &OwnerId) -> Self {
        Self(format!("/user/{owner}"))
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when this path is empty (unset).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty() || self.0 == "/"
    }

    /// Returns the parent path, or `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<CollectionPath> {
        let idx = self.0.rfind('/')?;
        if idx == 0 {
            return None;
        }
        Some(Self(self.0[..idx].to_string()))
    }

    /// Returns the last path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Appends a child segment.
    #[must_use]
    pub fn join(&self, child: &str) -> CollectionPath {
        Self(format!("{}/{}", self.0, child.trim_matches('/')))
    }

    /// Returns true when this path lives under the public tree.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.0 == "/public" || self.0.starts_with("/public/")
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CollectionPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_normalizes_missing_leading_slash() {
        assert_eq!(CollectionPath::new("user/fred").as_str(), "/user/fred");
    }

    #[test]
    fn path_strips_trailing_slash() {
        assert_eq!(CollectionPath::new("/user/fred/").as_str(), "/user/fred");
    }

    #[test]
    fn parent_and_name() {
        let p = CollectionPath::new("/user/fred/calendar");
        assert_eq!(p.name(), "calendar");
        assert_eq!(p.parent().unwrap().as_str(), "/user/fred");
        assert_eq!(CollectionPath::new("/user").parent(), None);
    }

    #[test]
    fn join_trims_separators() {
        let p = CollectionPath::new("/user/fred");
        assert_eq!(p.join("/inbox/").as_str(), "/user/fred/inbox");
    }

    #[test]
    fn public_detection() {
        assert!(CollectionPath::new("/public/events").is_public());
        assert!(!CollectionPath::new("/user/fred/public").is_public());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn normalization_is_idempotent(raw in "[a-z/]{0,24}") {
                let once = CollectionPath::new(raw.as_str());
                let twice = CollectionPath::new(once.as_str());
                prop_assert_eq!(&once, &twice);
            }

            #[test]
            fn normalized_paths_lead_with_slash(raw in "[a-z][a-z/]{0,24}") {
                prop_assert!(CollectionPath::new(raw.as_str()).as_str().starts_with('/'));
            }
        }
    }
}
