//! Core type definitions for rowcache.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary-key identifier of a record in the record store.
///
/// Identifiers are assigned by the store and never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RecordId(pub i64);

impl RecordId {
    /// Creates a new record identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Version stamp for an entity type's cache entries.
///
/// Versions are monotonically increasing; an entry stamped with an
/// older version than the type's current counter is stale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version(pub u64);

impl Version {
    /// Creates a new version.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_ordering() {
        let a = RecordId::new(1);
        let b = RecordId::new(2);
        assert!(a < b);
    }

    #[test]
    fn record_id_display() {
        assert_eq!(format!("{}", RecordId::new(42)), "42");
    }

    #[test]
    fn version_display() {
        assert_eq!(format!("{}", Version::new(7)), "v:7");
    }
}
