//! Owner identification and versioning for event logs.
//!
//! Every event log belongs to exactly one logical owner (an aggregate instance)
//! identified by an [`StreamId`]. Events within a log are ordered by a 1-based
//! [`Version`]; version 0 means no event has ever been applied.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `StreamId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid stream ID: {0}")]
pub struct ParseStreamIdError(String);

/// Identifier of the logical owner of an event log.
///
/// Owner ids are usually scoped by aggregate type so two aggregate types can
/// reuse the same instance key without sharing storage:
///
/// ```
/// use eventide_core::stream::StreamId;
///
/// let owner = StreamId::for_aggregate("account", "acc-42");
/// assert_eq!(owner.as_str(), "account/acc-42");
/// assert_eq!(owner.aggregate_type(), Some("account"));
/// assert_eq!(owner.key(), "acc-42");
/// ```
///
/// # Validation
///
/// - `FromStr::from_str()` rejects empty and whitespace-only input
/// - `new()` and `From` perform no validation (trusted, application-built ids)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    /// Separator between the aggregate type and the instance key.
    pub const SEPARATOR: char = '/';

    /// Create a stream id from a raw string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a stream id scoped to an aggregate type: `"{aggregate_type}/{key}"`.
    #[must_use]
    pub fn for_aggregate(aggregate_type: &str, key: impl fmt::Display) -> Self {
        Self(format!("{aggregate_type}{}{key}", Self::SEPARATOR))
    }

    /// The aggregate type prefix, if this id was built with [`StreamId::for_aggregate`].
    #[must_use]
    pub fn aggregate_type(&self) -> Option<&str> {
        self.0.split_once(Self::SEPARATOR).map(|(kind, _)| kind)
    }

    /// The instance key (everything after the first separator, or the whole id).
    #[must_use]
    pub fn key(&self) -> &str {
        self.0
            .split_once(Self::SEPARATOR)
            .map_or(self.0.as_str(), |(_, key)| key)
    }

    /// Get the stream id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert into the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ParseStreamIdError("Stream ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Position of an event in an owner's log.
///
/// Versions are 1-based: the first applied event has version 1 and
/// [`Version::INITIAL`] (0) denotes an aggregate that has never applied an event.
///
/// ```
/// use eventide_core::stream::Version;
///
/// let v = Version::INITIAL.next().next();
/// assert_eq!(v, Version::new(2));
/// assert!(Version::INITIAL.is_initial());
/// ```
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version(u64);

impl Version {
    /// The version of an empty log.
    pub const INITIAL: Self = Self(0);

    /// The highest representable version. Used as an open upper bound.
    pub const MAX: Self = Self(u64::MAX);

    /// Create a version from its numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Numeric value of this version.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// True for [`Version::INITIAL`].
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }

    /// Number of versions between `earlier` and `self` (zero if `earlier` is newer).
    #[must_use]
    pub const fn distance_from(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod stream_id_tests {
        use super::*;

        #[test]
        fn for_aggregate_scopes_key() {
            let id = StreamId::for_aggregate("account", 7);
            assert_eq!(id.as_str(), "account/7");
            assert_eq!(id.aggregate_type(), Some("account"));
            assert_eq!(id.key(), "7");
        }

        #[test]
        fn unscoped_id_has_no_type() {
            let id = StreamId::new("plain");
            assert_eq!(id.aggregate_type(), None);
            assert_eq!(id.key(), "plain");
        }

        #[test]
        fn key_keeps_nested_separators() {
            let id = StreamId::for_aggregate("account", "eu/acc-1");
            assert_eq!(id.aggregate_type(), Some("account"));
            assert_eq!(id.key(), "eu/acc-1");
        }

        #[test]
        fn parse_rejects_blank() {
            assert!("".parse::<StreamId>().is_err());
            assert!("   ".parse::<StreamId>().is_err());
            assert!("account/1".parse::<StreamId>().is_ok());
        }

        #[test]
        fn display_matches_inner() {
            let id = StreamId::from("account/1".to_string());
            assert_eq!(id.to_string(), "account/1");
            assert_eq!(id.into_inner(), "account/1");
        }
    }

    mod version_tests {
        use super::*;

        #[test]
        fn initial_is_zero() {
            assert_eq!(Version::INITIAL, Version::new(0));
            assert_eq!(Version::default(), Version::INITIAL);
            assert!(!Version::new(1).is_initial());
        }

        #[test]
        fn next_increments() {
            assert_eq!(Version::INITIAL.next(), Version::new(1));
            assert_eq!(Version::MAX.next(), Version::MAX);
        }

        #[test]
        fn distance_saturates() {
            assert_eq!(Version::new(5).distance_from(Version::new(2)), 3);
            assert_eq!(Version::new(2).distance_from(Version::new(5)), 0);
        }

        #[test]
        fn ordering_and_conversion() {
            assert!(Version::new(1) < Version::new(2));
            let raw: u64 = Version::from(9_u64).into();
            assert_eq!(raw, 9);
            assert_eq!(format!("{}", Version::new(42)), "42");
        }

        proptest::proptest! {
            #[test]
            fn next_then_distance_is_one(raw in 0_u64..u64::MAX) {
                let v = Version::new(raw);
                proptest::prop_assert_eq!(v.next().distance_from(v), 1);
                proptest::prop_assert!(v.next() > v);
            }
        }
    }
}
