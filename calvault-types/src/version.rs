//! Dump-format version stamp.
//!
//! Every dump stream starts with a root tag carrying the format version and
//! the time the dump was taken. Readers reject a major version they do not
//! understand; minor versions gate individual tags in the rule table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Major version of the dump format this build writes and reads.
pub const FORMAT_MAJOR: u32 = 1;

/// Minor version of the dump format this build writes.
/// Minor 1 added the alias/external-subscription sections.
pub const FORMAT_MINOR: u32 = 1;

/// Version stamp read from (or written to) the stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStamp {
    pub major: u32,
    pub minor: u32,
    pub dumped_at: DateTime<Utc>,
}

impl VersionStamp {
    /// The stamp written by the current build.
    #[must_use]
    pub fn current() -> Self {
        Self {
            major: FORMAT_MAJOR,
            minor: FORMAT_MINOR,
            dumped_at: Utc::now(),
        }
    }

    /// Creates a stamp with an explicit version, for compatibility testing.
    #[must_use]
    pub fn at(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            dumped_at: Utc::now(),
        }
    }

    /// Whether this build can interpret the stream at all.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.major == FORMAT_MAJOR
    }

    /// Whether the stream carries at least the given minor version.
    #[must_use]
    pub fn at_least_minor(&self, minor: u32) -> bool {
        self.minor >= minor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_supported() {
        assert!(VersionStamp::current().is_supported());
    }

    #[test]
    fn other_major_is_rejected() {
        assert!(!VersionStamp::at(2, 0).is_supported());
    }

    #[test]
    fn minor_gating() {
        assert!(VersionStamp::at(1, 1).at_least_minor(1));
        assert!(!VersionStamp::at(1, 0).at_least_minor(1));
        assert!(VersionStamp::at(1, 9).at_least_minor(1));
    }
}
