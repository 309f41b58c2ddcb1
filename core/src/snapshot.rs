//! Snapshot policy.
//!
//! After every confirmation flush the controller asks its [`SnapshotStrategy`]
//! whether to record a snapshot of the confirmed state, and whether the journal
//! may then be truncated up to that version. Strategies are pure: they inspect
//! the state and never mutate it.

use crate::stream::Version;
use serde::{Deserialize, Serialize};

/// Point-in-time copy of confirmed state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<A> {
    /// The confirmed state at `version`.
    pub state: A,
    /// The confirmed version the state reflects.
    pub version: Version,
}

impl<A> Snapshot<A> {
    /// Create a snapshot.
    #[must_use]
    pub const fn new(state: A, version: Version) -> Self {
        Self { state, version }
    }
}

/// Answer of a [`SnapshotStrategy`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotDecision {
    /// Record a snapshot at the confirmed version.
    pub should_snapshot: bool,
    /// After a durable snapshot exists, delete journal entries up to it.
    pub should_truncate: bool,
}

impl SnapshotDecision {
    /// Do nothing.
    pub const SKIP: Self = Self {
        should_snapshot: false,
        should_truncate: false,
    };

    /// Snapshot, optionally truncating.
    #[must_use]
    pub const fn snapshot(truncate: bool) -> Self {
        Self {
            should_snapshot: true,
            should_truncate: truncate,
        }
    }
}

/// Decides when to snapshot confirmed state.
///
/// Never called concurrently for the same owner.
pub trait SnapshotStrategy<A>: Send + Sync + 'static {
    /// Inspect the confirmed state and version.
    fn should_snapshot(&self, confirmed: &A, version: Version) -> SnapshotDecision;
}

/// Never snapshots. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverSnapshot;

impl<A> SnapshotStrategy<A> for NeverSnapshot {
    fn should_snapshot(&self, _confirmed: &A, _version: Version) -> SnapshotDecision {
        SnapshotDecision::SKIP
    }
}

/// Snapshots after every flush that confirmed at least one event.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysSnapshot {
    /// Truncate the journal after each snapshot.
    pub truncate: bool,
}

impl<A> SnapshotStrategy<A> for AlwaysSnapshot {
    fn should_snapshot(&self, _confirmed: &A, version: Version) -> SnapshotDecision {
        if version.is_initial() {
            return SnapshotDecision::SKIP;
        }
        SnapshotDecision::snapshot(self.truncate)
    }
}

/// Snapshots whenever the confirmed version is a multiple of `interval`.
///
/// Because a flush can confirm several events at once, a multiple may be
/// stepped over; the strategy then fires at the next flush that lands on one.
#[derive(Clone, Copy, Debug)]
pub struct EveryNVersions {
    interval: u64,
    truncate: bool,
}

impl EveryNVersions {
    /// Snapshot every `interval` versions. An interval of zero is treated as one.
    #[must_use]
    pub const fn new(interval: u64) -> Self {
        Self {
            interval: if interval == 0 { 1 } else { interval },
            truncate: false,
        }
    }

    /// Also truncate the journal after each snapshot.
    #[must_use]
    pub const fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Configured interval.
    #[must_use]
    pub const fn interval(&self) -> u64 {
        self.interval
    }
}

impl<A> SnapshotStrategy<A> for EveryNVersions {
    fn should_snapshot(&self, _confirmed: &A, version: Version) -> SnapshotDecision {
        if version.is_initial() || version.value() % self.interval != 0 {
            return SnapshotDecision::SKIP;
        }
        SnapshotDecision::snapshot(self.truncate)
    }
}

/// Strategy backed by a closure.
///
/// ```
/// use eventide_core::snapshot::{PredicatedSnapshotStrategy, SnapshotDecision, SnapshotStrategy};
/// use eventide_core::stream::Version;
///
/// // Snapshot large balances only.
/// let strategy = PredicatedSnapshotStrategy::new(|balance: &i64, _v: Version| {
///     if *balance > 1_000 { SnapshotDecision::snapshot(false) } else { SnapshotDecision::SKIP }
/// });
///
/// assert!(strategy.should_snapshot(&5_000, Version::new(3)).should_snapshot);
/// assert!(!strategy.should_snapshot(&10, Version::new(4)).should_snapshot);
/// ```
pub struct PredicatedSnapshotStrategy<F> {
    predicate: F,
}

impl<F> PredicatedSnapshotStrategy<F> {
    /// Wrap a decision closure.
    #[must_use]
    pub const fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<A, F> SnapshotStrategy<A> for PredicatedSnapshotStrategy<F>
where
    F: Fn(&A, Version) -> SnapshotDecision + Send + Sync + 'static,
{
    fn should_snapshot(&self, confirmed: &A, version: Version) -> SnapshotDecision {
        (self.predicate)(confirmed, version)
    }
}

impl<F> std::fmt::Debug for PredicatedSnapshotStrategy<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicatedSnapshotStrategy").finish_non_exhaustive()
    }
}
