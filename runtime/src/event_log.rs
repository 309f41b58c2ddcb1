//! Dual-view event log of one aggregate instance.
//!
//! The log keeps two copies of the aggregate:
//!
//! - the **tentative** view, updated by [`EventLog::submit`] as soon as an event
//!   is raised
//! - the **confirmed** view, advanced only by [`EventLog::wait_for_confirmation`]
//!   once the pending events are durable in the [`EventJournal`]
//!
//! ```text
//!            submit                wait_for_confirmation
//! event ──► tentative (v=n) ──────► journal.append(tail) ──► confirmed (v=n)
//!                                                               │
//!                                               snapshot(truncate)
//!                                                               ▼
//!                                     SnapshotStore ──► journal.truncate(<= n)
//! ```
//!
//! # Invariants
//!
//! - `confirmed_version() <= tentative_version()` at all times
//! - the tentative version grows by exactly one per submitted event
//! - the confirmed view only changes inside `wait_for_confirmation`, and is a
//!   structurally independent copy of the tentative view
//! - the journal is only truncated once a durable snapshot exists at the
//!   confirmed version

use crate::metrics::EventLogMetrics;
use eventide_core::aggregate::{Aggregate, ApplyError};
use eventide_core::environment::{Clock, SystemClock};
use eventide_core::event::{Event, EventEnvelope, EventError, StoredEvent};
use eventide_core::serializer::{BincodeSerializer, SerializationError, StateSerializer};
use eventide_core::storage::{EventJournal, SnapshotStore, SnapshotWrite, StorageError};
use eventide_core::stream::{StreamId, Version};
use std::sync::Arc;
use thiserror::Error;

/// Errors from event log operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventLogError {
    /// The journal or snapshot store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// State could not be copied or (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// An event could not be encoded for the journal.
    #[error("Event encoding error: {0}")]
    Event(#[from] EventError),

    /// The aggregate refused a newly submitted event. Nothing was applied.
    #[error("Event {event_type} rejected: {source}")]
    Rejected {
        /// Type of the refused event.
        event_type: &'static str,
        /// Why the aggregate refused it.
        source: ApplyError,
    },

    /// Stored history cannot be replayed. Not recoverable locally.
    #[error("Corrupt log for {owner} at version {version}: {reason}")]
    Corrupt {
        /// The log's owner.
        owner: StreamId,
        /// Version at which replay failed.
        version: Version,
        /// What went wrong.
        reason: String,
    },

    /// The log has not been hydrated yet.
    #[error("Event log for {0} is not hydrated")]
    NotHydrated(StreamId),
}

/// What [`EventLog::snapshot`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// A new snapshot was stored.
    Written,
    /// A snapshot at this version already existed and was kept.
    AlreadyExists,
    /// Nothing has been confirmed yet; there is nothing to snapshot.
    Skipped,
}

/// Result of [`EventLog::snapshot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotReport {
    /// Whether a snapshot was written.
    pub outcome: SnapshotOutcome,
    /// The confirmed version the snapshot covers.
    pub version: Version,
    /// Journal entries removed by truncation.
    pub truncated: u64,
}

/// Dual-view event log for one aggregate instance.
///
/// Single writer: the owner serializes access (the controller keeps the log
/// behind a mutex).
pub struct EventLog<A: Aggregate, S: StateSerializer = BincodeSerializer> {
    owner: StreamId,
    journal: Arc<dyn EventJournal>,
    snapshots: Arc<dyn SnapshotStore>,
    serializer: S,
    clock: Arc<dyn Clock>,
    tentative: A,
    tentative_version: Version,
    confirmed: A,
    confirmed_version: Version,
    unconfirmed: Vec<EventEnvelope<A::Event>>,
    hydrated: bool,
}

impl<A: Aggregate> EventLog<A, BincodeSerializer> {
    /// Create an empty, unhydrated log using bincode and the system clock.
    #[must_use]
    pub fn new(
        owner: StreamId,
        journal: Arc<dyn EventJournal>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            owner,
            journal,
            snapshots,
            serializer: BincodeSerializer,
            clock: Arc::new(SystemClock),
            tentative: A::default(),
            tentative_version: Version::INITIAL,
            confirmed: A::default(),
            confirmed_version: Version::INITIAL,
            unconfirmed: Vec::new(),
            hydrated: false,
        }
    }
}

impl<A: Aggregate, S: StateSerializer> EventLog<A, S> {
    /// Use another serializer for snapshots and confirmation copies.
    #[must_use]
    pub fn with_serializer<S2: StateSerializer>(self, serializer: S2) -> EventLog<A, S2> {
        EventLog {
            owner: self.owner,
            journal: self.journal,
            snapshots: self.snapshots,
            serializer,
            clock: self.clock,
            tentative: self.tentative,
            tentative_version: self.tentative_version,
            confirmed: self.confirmed,
            confirmed_version: self.confirmed_version,
            unconfirmed: self.unconfirmed,
            hydrated: self.hydrated,
        }
    }

    /// Use another clock for envelope timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Load the latest snapshot and replay the journal tail on top of it.
    ///
    /// Calling it again on a hydrated log is a no-op.
    ///
    /// # Errors
    ///
    /// - `Storage` if the journal or snapshot store fails
    /// - `Serialization` if the snapshot cannot be decoded
    /// - `Corrupt` if the tail has gaps or holds an event the aggregate cannot
    ///   apply
    pub async fn hydrate(&mut self) -> Result<(), EventLogError> {
        if self.hydrated {
            tracing::debug!(owner = %self.owner, "Event log already hydrated");
            return Ok(());
        }

        let head = self.journal.head_version(&self.owner).await?;
        let (mut state, mut version) = match self
            .snapshots
            .read_latest_at_or_before(&self.owner, head)
            .await?
        {
            Some((version, bytes)) => (self.serializer.deserialize::<A>(&bytes)?, version),
            None => (A::default(), Version::INITIAL),
        };
        let from_snapshot = version;

        let tail = self.journal.read_tail(&self.owner, version).await?;
        for stored in &tail {
            let expected = version.next();
            if stored.version != expected {
                return Err(self.corrupt(
                    expected,
                    format!("expected version {expected}, found {}", stored.version),
                ));
            }
            let envelope = stored
                .decode::<A::Event>()
                .map_err(|e| self.corrupt(expected, e.to_string()))?;
            state
                .apply(&envelope.event)
                .map_err(|e| self.corrupt(expected, e.to_string()))?;
            version = expected;
        }

        if version != head {
            return Err(self.corrupt(
                version.next(),
                format!("journal head is {head} but replay stopped at {version}"),
            ));
        }

        self.tentative = state.clone();
        self.confirmed = state;
        self.tentative_version = version;
        self.confirmed_version = version;
        self.unconfirmed.clear();
        self.hydrated = true;

        tracing::info!(
            owner = %self.owner,
            snapshot_version = from_snapshot.value(),
            replayed = tail.len(),
            version = version.value(),
            "Event log hydrated"
        );
        Ok(())
    }

    /// Forget all in-memory state. The next [`EventLog::hydrate`] reloads from
    /// storage. Unconfirmed events are discarded.
    pub fn reset(&mut self) {
        if !self.unconfirmed.is_empty() {
            tracing::warn!(
                owner = %self.owner,
                discarded = self.unconfirmed.len(),
                "Resetting event log with unconfirmed events"
            );
        }
        self.tentative = A::default();
        self.confirmed = A::default();
        self.tentative_version = Version::INITIAL;
        self.confirmed_version = Version::INITIAL;
        self.unconfirmed.clear();
        self.hydrated = false;
    }

    /// Apply one event to the tentative view.
    ///
    /// Returns the event's version. Does not touch storage.
    ///
    /// # Errors
    ///
    /// - `NotHydrated` before [`EventLog::hydrate`]
    /// - `Rejected` if the aggregate refuses the event (nothing changes)
    pub fn submit(&mut self, event: A::Event) -> Result<Version, EventLogError> {
        self.ensure_hydrated()?;
        self.tentative
            .apply(&event)
            .map_err(|source| EventLogError::Rejected {
                event_type: event.event_type(),
                source,
            })?;
        let version = self.push_unconfirmed(event);
        EventLogMetrics::record_raised(1);
        Ok(version)
    }

    /// Apply several events to the tentative view, all or nothing.
    ///
    /// Returns the version of the last event (the current version if `events`
    /// is empty).
    ///
    /// # Errors
    ///
    /// As [`EventLog::submit`]. If any event is rejected, none are applied.
    pub fn submit_all(&mut self, events: Vec<A::Event>) -> Result<Version, EventLogError> {
        self.ensure_hydrated()?;
        let mut next = self.tentative.clone();
        for event in &events {
            next.apply(event).map_err(|source| EventLogError::Rejected {
                event_type: event.event_type(),
                source,
            })?;
        }
        self.tentative = next;
        let count = events.len();
        for event in events {
            self.push_unconfirmed(event);
        }
        EventLogMetrics::record_raised(count);
        Ok(self.tentative_version)
    }

    /// Make pending events durable and advance the confirmed view.
    ///
    /// Appends the unconfirmed tail to the journal, then replaces the confirmed
    /// view with a deep copy of the tentative one. With nothing pending only the
    /// copy happens. Returns the number of events confirmed.
    ///
    /// # Errors
    ///
    /// `NotHydrated`, `Serialization`, `Event` or `Storage`. On error the
    /// confirmed view is unchanged and the tail stays pending.
    pub async fn wait_for_confirmation(&mut self) -> Result<u64, EventLogError> {
        self.ensure_hydrated()?;

        let copy = self.serializer.deep_copy(&self.tentative)?;
        let pending = self.unconfirmed.len() as u64;

        if pending > 0 {
            let stored = self
                .unconfirmed
                .iter()
                .map(StoredEvent::from_envelope)
                .collect::<Result<Vec<_>, _>>()?;
            self.journal.append(&self.owner, stored).await?;
        }

        self.confirmed = copy;
        self.confirmed_version = self.tentative_version;
        self.unconfirmed.clear();

        if pending > 0 {
            EventLogMetrics::record_confirmed(pending);
            tracing::debug!(
                owner = %self.owner,
                confirmed = pending,
                version = self.confirmed_version.value(),
                "Events confirmed"
            );
        }
        Ok(pending)
    }

    /// Record a snapshot at the confirmed version, then optionally truncate.
    ///
    /// The write is insert-if-absent. Truncation removes journal entries up to
    /// the confirmed version and only happens once a snapshot at that version
    /// is known to be stored (written now or already present).
    ///
    /// # Errors
    ///
    /// `NotHydrated`, `Serialization` or `Storage`. If the snapshot write fails
    /// the journal is left untouched.
    pub async fn snapshot(&mut self, truncate: bool) -> Result<SnapshotReport, EventLogError> {
        self.ensure_hydrated()?;
        let version = self.confirmed_version;

        if version.is_initial() {
            return Ok(SnapshotReport {
                outcome: SnapshotOutcome::Skipped,
                version,
                truncated: 0,
            });
        }

        let bytes = self.serializer.serialize(&self.confirmed)?;
        let outcome = match self.snapshots.write(&self.owner, version, bytes).await? {
            SnapshotWrite::Written => {
                EventLogMetrics::record_snapshot();
                tracing::info!(owner = %self.owner, version = version.value(), "Snapshot written");
                SnapshotOutcome::Written
            }
            SnapshotWrite::AlreadyExists => {
                tracing::debug!(
                    owner = %self.owner,
                    version = version.value(),
                    "Snapshot already exists"
                );
                SnapshotOutcome::AlreadyExists
            }
        };

        let truncated = if truncate {
            let removed = self.journal.truncate(&self.owner, version).await?;
            if removed > 0 {
                EventLogMetrics::record_truncated(removed);
                tracing::info!(
                    owner = %self.owner,
                    up_to = version.value(),
                    removed,
                    "Journal truncated"
                );
            }
            removed
        } else {
            0
        };

        Ok(SnapshotReport {
            outcome,
            version,
            truncated,
        })
    }

    /// Read back every event still held by the journal, oldest first.
    ///
    /// Truncated events are not included.
    ///
    /// # Errors
    ///
    /// `Storage` if the journal fails, `Event` if an entry cannot be decoded.
    pub async fn read_confirmed_log(&self) -> Result<Vec<EventEnvelope<A::Event>>, EventLogError> {
        self.read_confirmed_after(Version::INITIAL).await
    }

    /// Read back journal events newer than `after`, oldest first.
    ///
    /// # Errors
    ///
    /// As [`EventLog::read_confirmed_log`].
    pub async fn read_confirmed_after(
        &self,
        after: Version,
    ) -> Result<Vec<EventEnvelope<A::Event>>, EventLogError> {
        let stored = self.journal.read_tail(&self.owner, after).await?;
        stored
            .iter()
            .map(|s| s.decode::<A::Event>().map_err(EventLogError::from))
            .collect()
    }

    /// Owner of this log.
    #[must_use]
    pub const fn owner(&self) -> &StreamId {
        &self.owner
    }

    /// Tentative view.
    #[must_use]
    pub const fn tentative_view(&self) -> &A {
        &self.tentative
    }

    /// Confirmed view.
    #[must_use]
    pub const fn confirmed_view(&self) -> &A {
        &self.confirmed
    }

    /// Version of the tentative view.
    #[must_use]
    pub const fn tentative_version(&self) -> Version {
        self.tentative_version
    }

    /// Version of the confirmed view.
    #[must_use]
    pub const fn confirmed_version(&self) -> Version {
        self.confirmed_version
    }

    /// Events submitted but not yet confirmed, oldest first.
    #[must_use]
    pub fn unconfirmed(&self) -> &[EventEnvelope<A::Event>] {
        &self.unconfirmed
    }

    /// True once [`EventLog::hydrate`] succeeded.
    #[must_use]
    pub const fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    /// Serializer used by this log.
    #[must_use]
    pub const fn serializer(&self) -> &S {
        &self.serializer
    }

    fn push_unconfirmed(&mut self, event: A::Event) -> Version {
        self.tentative_version = self.tentative_version.next();
        self.unconfirmed.push(EventEnvelope::new(
            event,
            self.tentative_version,
            self.clock.now(),
        ));
        self.tentative_version
    }

    fn ensure_hydrated(&self) -> Result<(), EventLogError> {
        if self.hydrated {
            Ok(())
        } else {
            Err(EventLogError::NotHydrated(self.owner.clone()))
        }
    }

    fn corrupt(&self, version: Version, reason: String) -> EventLogError {
        tracing::error!(owner = %self.owner, version = version.value(), reason = %reason, "Corrupt event log");
        EventLogError::Corrupt {
            owner: self.owner.clone(),
            version,
            reason,
        }
    }
}

impl<A: Aggregate, S: StateSerializer> std::fmt::Debug for EventLog<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("owner", &self.owner)
            .field("tentative_version", &self.tentative_version)
            .field("confirmed_version", &self.confirmed_version)
            .field("unconfirmed", &self.unconfirmed.len())
            .field("hydrated", &self.hydrated)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use eventide_core::serializer::JsonSerializer;
    use eventide_testing::bank::{BankAccount, closed, deposited, withdrawn};
    use eventide_testing::{InMemoryStore, test_clock};

    fn log_for(store: &Arc<InMemoryStore>, key: &str) -> EventLog<BankAccount> {
        EventLog::new(
            StreamId::for_aggregate("account", key),
            store.clone(),
            store.clone(),
        )
        .with_clock(Arc::new(test_clock()))
    }

    async fn hydrated(store: &Arc<InMemoryStore>, key: &str) -> EventLog<BankAccount> {
        let mut log = log_for(store, key);
        log.hydrate().await.expect("hydrate");
        log
    }

    #[tokio::test]
    async fn fresh_log_starts_empty() {
        let store = Arc::new(InMemoryStore::new());
        let log = hydrated(&store, "a").await;

        assert_eq!(log.tentative_version(), Version::INITIAL);
        assert_eq!(log.confirmed_version(), Version::INITIAL);
        assert_eq!(log.tentative_view().balance, 0);
    }

    #[tokio::test]
    async fn submit_before_hydrate_fails() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = log_for(&store, "a");

        let err = log.submit(deposited(10)).unwrap_err();
        assert!(matches!(err, EventLogError::NotHydrated(_)));
    }

    #[tokio::test]
    async fn submit_touches_only_tentative_view() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;

        assert_eq!(log.submit(deposited(100)).unwrap(), Version::new(1));
        assert_eq!(log.submit(withdrawn(40)).unwrap(), Version::new(2));

        assert_eq!(log.tentative_view().balance, 60);
        assert_eq!(log.confirmed_view().balance, 0);
        assert_eq!(log.confirmed_version(), Version::INITIAL);
        assert_eq!(log.unconfirmed().len(), 2);
        assert_eq!(store.event_count(log.owner()), 0);
    }

    #[tokio::test]
    async fn envelopes_carry_clock_time() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;
        log.submit(deposited(1)).unwrap();

        assert_eq!(log.unconfirmed()[0].timestamp, test_clock().now());
    }

    #[tokio::test]
    async fn confirmation_persists_and_copies() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;
        log.submit(deposited(100)).unwrap();
        log.submit(withdrawn(40)).unwrap();

        assert_eq!(log.wait_for_confirmation().await.unwrap(), 2);
        assert_eq!(log.confirmed_version(), Version::new(2));
        assert_eq!(log.confirmed_view().balance, 60);
        assert!(log.unconfirmed().is_empty());

        let events = log.read_confirmed_log().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].version, Version::new(2));

        let newer = log.read_confirmed_after(Version::new(1)).await.unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].event, withdrawn(40));
    }

    #[tokio::test]
    async fn confirmed_view_is_independent_copy() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;
        log.submit(deposited(100)).unwrap();
        log.wait_for_confirmation().await.unwrap();

        log.submit(deposited(5)).unwrap();
        assert_eq!(log.tentative_view().balance, 105);
        assert_eq!(log.confirmed_view().balance, 100);
        assert_eq!(log.tentative_view().history.len(), 2);
        assert_eq!(log.confirmed_view().history.len(), 1);
    }

    #[tokio::test]
    async fn empty_confirmation_is_noop() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;
        assert_eq!(log.wait_for_confirmation().await.unwrap(), 0);
        assert_eq!(log.confirmed_version(), Version::INITIAL);
    }

    #[tokio::test]
    async fn failed_append_keeps_tail_pending() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;
        log.submit(deposited(10)).unwrap();

        store.fail_appends(true);
        assert!(matches!(
            log.wait_for_confirmation().await,
            Err(EventLogError::Storage(_))
        ));
        assert_eq!(log.confirmed_version(), Version::INITIAL);
        assert_eq!(log.unconfirmed().len(), 1);

        store.fail_appends(false);
        assert_eq!(log.wait_for_confirmation().await.unwrap(), 1);
        assert_eq!(log.confirmed_view().balance, 10);
    }

    #[tokio::test]
    async fn rejected_batch_applies_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;

        let err = log
            .submit_all(vec![deposited(10), closed(), deposited(1)])
            .unwrap_err();
        assert!(matches!(err, EventLogError::Rejected { .. }));
        assert_eq!(log.tentative_version(), Version::INITIAL);
        assert_eq!(log.tentative_view().balance, 0);
    }

    #[tokio::test]
    async fn hydrate_replays_journal() {
        let store = Arc::new(InMemoryStore::new());
        {
            let mut log = hydrated(&store, "a").await;
            log.submit_all(vec![deposited(100), withdrawn(40)]).unwrap();
            log.wait_for_confirmation().await.unwrap();
        }

        let log = hydrated(&store, "a").await;
        assert_eq!(log.tentative_version(), Version::new(2));
        assert_eq!(log.confirmed_version(), Version::new(2));
        assert_eq!(log.confirmed_view().balance, 60);
    }

    #[tokio::test]
    async fn second_hydrate_is_noop() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;
        log.submit(deposited(7)).unwrap();

        log.hydrate().await.unwrap();
        assert_eq!(log.tentative_view().balance, 7);
        assert_eq!(log.unconfirmed().len(), 1);
    }

    #[tokio::test]
    async fn reset_then_hydrate_reloads_confirmed_state() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;
        log.submit(deposited(10)).unwrap();
        log.wait_for_confirmation().await.unwrap();
        log.submit(deposited(99)).unwrap();

        log.reset();
        assert!(!log.is_hydrated());
        log.hydrate().await.unwrap();
        assert_eq!(log.tentative_view().balance, 10);
        assert_eq!(log.tentative_version(), Version::new(1));
    }

    #[tokio::test]
    async fn snapshot_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;
        log.submit(deposited(100)).unwrap();
        log.wait_for_confirmation().await.unwrap();

        let first = log.snapshot(false).await.unwrap();
        let second = log.snapshot(false).await.unwrap();

        assert_eq!(first.outcome, SnapshotOutcome::Written);
        assert_eq!(second.outcome, SnapshotOutcome::AlreadyExists);
        assert_eq!(store.snapshot_versions(log.owner()), vec![Version::new(1)]);
    }

    #[tokio::test]
    async fn snapshot_of_empty_log_is_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;
        let report = log.snapshot(true).await.unwrap();
        assert_eq!(report.outcome, SnapshotOutcome::Skipped);
        assert!(store.snapshot_versions(log.owner()).is_empty());
    }

    #[tokio::test]
    async fn truncation_follows_durable_snapshot() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;
        log.submit_all(vec![deposited(100), withdrawn(40), deposited(5)]).unwrap();
        log.wait_for_confirmation().await.unwrap();

        let report = log.snapshot(true).await.unwrap();
        assert_eq!(report.truncated, 3);
        assert_eq!(store.event_count(log.owner()), 0);

        log.submit(deposited(1)).unwrap();
        log.wait_for_confirmation().await.unwrap();

        let fresh = hydrated(&store, "a").await;
        assert_eq!(fresh.confirmed_version(), Version::new(4));
        assert_eq!(fresh.confirmed_view().balance, 66);
    }

    #[tokio::test]
    async fn failed_snapshot_does_not_truncate() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = hydrated(&store, "a").await;
        log.submit(deposited(100)).unwrap();
        log.wait_for_confirmation().await.unwrap();

        store.fail_snapshot_writes(true);
        assert!(log.snapshot(true).await.is_err());
        assert_eq!(store.event_count(log.owner()), 1);
    }

    #[tokio::test]
    async fn hydrate_rejects_unappliable_event() {
        let store = Arc::new(InMemoryStore::new());
        let owner = StreamId::for_aggregate("account", "a");
        let stored = [closed(), deposited(5)]
            .into_iter()
            .zip(1..)
            .map(|(event, v)| {
                StoredEvent::from_envelope(&EventEnvelope::new(
                    event,
                    Version::new(v),
                    test_clock().now(),
                ))
                .unwrap()
            })
            .collect();
        store.append(&owner, stored).await.unwrap();

        let mut log = log_for(&store, "a");
        let err = log.hydrate().await.unwrap_err();
        assert!(matches!(err, EventLogError::Corrupt { version, .. } if version == Version::new(2)));
        assert!(!log.is_hydrated());
    }

    #[tokio::test]
    async fn hydrate_rejects_truncated_history_without_snapshot() {
        let store = Arc::new(InMemoryStore::new());
        {
            let mut log = hydrated(&store, "a").await;
            log.submit_all(vec![deposited(1), deposited(2)]).unwrap();
            log.wait_for_confirmation().await.unwrap();
        }
        store
            .truncate(&StreamId::for_aggregate("account", "a"), Version::new(1))
            .await
            .unwrap();

        let mut log = log_for(&store, "a");
        assert!(matches!(
            log.hydrate().await,
            Err(EventLogError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn json_serializer_round_trips_snapshots() {
        let store = Arc::new(InMemoryStore::new());
        let mut log = log_for(&store, "j").with_serializer(JsonSerializer);
        log.hydrate().await.unwrap();
        log.submit(deposited(42)).unwrap();
        log.wait_for_confirmation().await.unwrap();
        log.snapshot(true).await.unwrap();

        let mut fresh = log_for(&store, "j").with_serializer(JsonSerializer);
        fresh.hydrate().await.unwrap();
        assert_eq!(fresh.confirmed_view().balance, 42);
        assert_eq!(fresh.serializer().name(), "json");
    }

    #[tokio::test]
    async fn owners_do_not_share_history() {
        let store = Arc::new(InMemoryStore::new());
        let mut a = hydrated(&store, "a").await;
        let mut b = hydrated(&store, "b").await;
        a.submit(deposited(100)).unwrap();
        b.submit(deposited(200)).unwrap();
        a.wait_for_confirmation().await.unwrap();
        b.wait_for_confirmation().await.unwrap();

        assert_eq!(hydrated(&store, "a").await.confirmed_view().balance, 100);
        assert_eq!(hydrated(&store, "b").await.confirmed_view().balance, 200);
    }
}
