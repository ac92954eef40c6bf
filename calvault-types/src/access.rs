//! Access descriptors exchanged with the service API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single privilege checked against a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Privilege {
    Read,
    Write,
}

/// The access a sharee should end up with on a shared collection.
///
/// Derived during phase one of alias repair from two independent privilege
/// checks. Write-without-read cannot be expressed in the sharing model and
/// never produces a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesiredAccess {
    ReadOnly,
    ReadWrite,
}

impl DesiredAccess {
    /// Derives the descriptor from the outcome of the two privilege checks.
    /// Returns `None` for the two undecidable combinations: no access at
    /// all, and write-without-read.
    #[must_use]
    pub fn from_checks(read: bool, write: bool) -> Option<Self> {
        match (read, write) {
            (true, true) => Some(Self::ReadWrite),
            (true, false) => Some(Self::ReadOnly),
            (false, _) => None,
        }
    }
}

impl fmt::Display for DesiredAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::ReadWrite => write!(f, "read-write"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_from_checks() {
        assert_eq!(DesiredAccess::from_checks(true, true), Some(DesiredAccess::ReadWrite));
        assert_eq!(DesiredAccess::from_checks(true, false), Some(DesiredAccess::ReadOnly));
        assert_eq!(DesiredAccess::from_checks(false, false), None);
        // write-without-read is not expressible
        assert_eq!(DesiredAccess::from_checks(false, true), None);
    }
}
