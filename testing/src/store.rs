//! In-memory storage backend.
//!
//! [`InMemoryStore`] implements the journal, snapshot and outbox contracts in
//! one object. Each test builds its own instance (or calls
//! [`InMemoryStore::clear`]) so nothing leaks between tests. Failure switches
//! let tests exercise storage errors.

use eventide_core::event::StoredEvent;
use eventide_core::storage::{
    EventJournal, OutboxStore, SnapshotData, SnapshotStore, SnapshotWrite, StorageError,
    StorageFuture,
};
use eventide_core::stream::{StreamId, Version};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct Journal {
    events: Vec<StoredEvent>,
    head: Version,
}

#[derive(Debug, Default)]
struct Inner {
    journals: HashMap<StreamId, Journal>,
    snapshots: HashMap<StreamId, BTreeMap<Version, Vec<u8>>>,
    outboxes: HashMap<StreamId, Vec<u8>>,
}

/// Journal + snapshot store + outbox store backed by `HashMap`s.
///
/// # Example
///
/// ```
/// use eventide_core::storage::EventJournal;
/// use eventide_core::stream::{StreamId, Version};
/// use eventide_testing::InMemoryStore;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryStore::new();
/// let owner = StreamId::for_aggregate("account", "1");
/// assert_eq!(store.head_version(&owner).await, Ok(Version::INITIAL));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    fail_appends: AtomicBool,
    fail_snapshot_writes: AtomicBool,
    fail_outbox_saves: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove everything (failure switches are kept).
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *inner = Inner::default();
    }

    /// Make every `append` fail with a backend error.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Make every snapshot `write` fail with a backend error.
    pub fn fail_snapshot_writes(&self, fail: bool) {
        self.fail_snapshot_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every `save_outbox` fail with a backend error.
    pub fn fail_outbox_saves(&self, fail: bool) {
        self.fail_outbox_saves.store(fail, Ordering::SeqCst);
    }

    /// Events currently held for `owner` (truncated ones excluded).
    #[must_use]
    pub fn event_count(&self, owner: &StreamId) -> usize {
        self.read_inner(|inner| inner.journals.get(owner).map_or(0, |j| j.events.len()))
    }

    /// Versions of all snapshots stored for `owner`, ascending.
    #[must_use]
    pub fn snapshot_versions(&self, owner: &StreamId) -> Vec<Version> {
        self.read_inner(|inner| {
            inner
                .snapshots
                .get(owner)
                .map(|s| s.keys().copied().collect())
                .unwrap_or_default()
        })
    }

    /// True if an outbox blob was saved for `owner`.
    #[must_use]
    pub fn has_outbox(&self, owner: &StreamId) -> bool {
        self.read_inner(|inner| inner.outboxes.contains_key(owner))
    }

    /// Owners with at least one appended event.
    #[must_use]
    pub fn owners(&self) -> Vec<StreamId> {
        let mut owners: Vec<_> = self.read_inner(|inner| inner.journals.keys().cloned().collect());
        owners.sort();
        owners
    }

    fn read_inner<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        f(&mut self.inner.write().unwrap_or_else(PoisonError::into_inner))
    }

    fn backend_failure(flag: &AtomicBool, what: &str) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::Backend(format!("injected {what} failure")))
        } else {
            Ok(())
        }
    }
}

impl EventJournal for InMemoryStore {
    fn append(&self, owner: &StreamId, events: Vec<StoredEvent>) -> StorageFuture<'_, Version> {
        let owner = owner.clone();
        Box::pin(async move {
            Self::backend_failure(&self.fail_appends, "append")?;
            self.write_inner(|inner| {
                let journal = inner.journals.entry(owner.clone()).or_default();
                let mut expected = journal.head.next();
                if let Some(first) = events.first() {
                    if first.version != expected {
                        return Err(StorageError::VersionConflict {
                            stream_id: owner,
                            expected,
                            actual: first.version,
                        });
                    }
                }
                for event in &events {
                    if event.version != expected {
                        return Err(StorageError::Corrupt(format!(
                            "batch for {owner} skips from {expected} to {}",
                            event.version
                        )));
                    }
                    expected = expected.next();
                }
                if let Some(last) = events.last() {
                    journal.head = last.version;
                }
                journal.events.extend(events);
                Ok(journal.head)
            })
        })
    }

    fn read_tail(
        &self,
        owner: &StreamId,
        from_exclusive: Version,
    ) -> StorageFuture<'_, Vec<StoredEvent>> {
        let owner = owner.clone();
        Box::pin(async move {
            Ok(self.read_inner(|inner| {
                inner
                    .journals
                    .get(&owner)
                    .map(|j| {
                        j.events
                            .iter()
                            .filter(|e| e.version > from_exclusive)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default()
            }))
        })
    }

    fn truncate(&self, owner: &StreamId, up_to_inclusive: Version) -> StorageFuture<'_, u64> {
        let owner = owner.clone();
        Box::pin(async move {
            Ok(self.write_inner(|inner| {
                inner.journals.get_mut(&owner).map_or(0, |j| {
                    let before = j.events.len();
                    j.events.retain(|e| e.version > up_to_inclusive);
                    (before - j.events.len()) as u64
                })
            }))
        })
    }

    fn head_version(&self, owner: &StreamId) -> StorageFuture<'_, Version> {
        let owner = owner.clone();
        Box::pin(async move {
            Ok(self.read_inner(|inner| inner.journals.get(&owner).map_or(Version::INITIAL, |j| j.head)))
        })
    }
}

impl SnapshotStore for InMemoryStore {
    fn write(
        &self,
        owner: &StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> StorageFuture<'_, SnapshotWrite> {
        let owner = owner.clone();
        Box::pin(async move {
            Self::backend_failure(&self.fail_snapshot_writes, "snapshot write")?;
            Ok(self.write_inner(|inner| {
                let snapshots = inner.snapshots.entry(owner).or_default();
                if snapshots.contains_key(&version) {
                    SnapshotWrite::AlreadyExists
                } else {
                    snapshots.insert(version, state);
                    SnapshotWrite::Written
                }
            }))
        })
    }

    fn read_latest_at_or_before(
        &self,
        owner: &StreamId,
        at_or_before: Version,
    ) -> StorageFuture<'_, Option<SnapshotData>> {
        let owner = owner.clone();
        Box::pin(async move {
            Ok(self.read_inner(|inner| {
                inner.snapshots.get(&owner).and_then(|s| {
                    s.range(..=at_or_before)
                        .next_back()
                        .map(|(v, bytes)| (*v, bytes.clone()))
                })
            }))
        })
    }
}

impl OutboxStore for InMemoryStore {
    fn load_outbox(&self, owner: &StreamId) -> StorageFuture<'_, Option<Vec<u8>>> {
        let owner = owner.clone();
        Box::pin(async move { Ok(self.read_inner(|inner| inner.outboxes.get(&owner).cloned())) })
    }

    fn save_outbox(&self, owner: &StreamId, outbox: Vec<u8>) -> StorageFuture<'_, ()> {
        let owner = owner.clone();
        Box::pin(async move {
            Self::backend_failure(&self.fail_outbox_saves, "outbox save")?;
            self.write_inner(|inner| {
                inner.outboxes.insert(owner, outbox);
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::Utc;
    use tokio_test::{assert_err, assert_ok};

    fn stored(version: u64) -> StoredEvent {
        StoredEvent {
            version: Version::new(version),
            timestamp: Utc::now(),
            event_type: "Test.v1".to_string(),
            data: vec![1],
        }
    }

    fn owner() -> StreamId {
        StreamId::for_aggregate("test", "1")
    }

    #[tokio::test]
    async fn append_enforces_contiguous_versions() {
        let store = InMemoryStore::new();
        assert_eq!(
            store.append(&owner(), vec![stored(1), stored(2)]).await,
            Ok(Version::new(2))
        );
        assert!(matches!(
            store.append(&owner(), vec![stored(4)]).await,
            Err(StorageError::VersionConflict { .. })
        ));
        assert!(matches!(
            store.append(&owner(), vec![stored(3), stored(5)]).await,
            Err(StorageError::Corrupt(_))
        ));
        assert_eq!(store.event_count(&owner()), 2);
    }

    #[tokio::test]
    async fn truncate_keeps_head() {
        let store = InMemoryStore::new();
        assert_ok!(store.append(&owner(), vec![stored(1), stored(2), stored(3)]).await);

        assert_eq!(store.truncate(&owner(), Version::new(2)).await, Ok(2));
        assert_eq!(store.head_version(&owner()).await, Ok(Version::new(3)));

        let tail = store.read_tail(&owner(), Version::INITIAL).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].version, Version::new(3));
    }

    #[tokio::test]
    async fn snapshots_are_insert_if_absent() {
        let store = InMemoryStore::new();
        assert_eq!(
            store.write(&owner(), Version::new(2), vec![1]).await,
            Ok(SnapshotWrite::Written)
        );
        assert_eq!(
            store.write(&owner(), Version::new(2), vec![9]).await,
            Ok(SnapshotWrite::AlreadyExists)
        );
        assert_ok!(store.write(&owner(), Version::new(5), vec![5]).await);

        let latest = store
            .read_latest_at_or_before(&owner(), Version::new(4))
            .await
            .unwrap();
        assert_eq!(latest, Some((Version::new(2), vec![1])));
        assert_eq!(
            store.snapshot_versions(&owner()),
            vec![Version::new(2), Version::new(5)]
        );
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = InMemoryStore::new();
        store.fail_appends(true);
        store.fail_outbox_saves(true);
        assert_err!(store.append(&owner(), vec![stored(1)]).await);
        assert_err!(store.save_outbox(&owner(), vec![]).await);
        assert!(!store.has_outbox(&owner()));
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let store = InMemoryStore::new();
        assert_ok!(store.append(&owner(), vec![stored(1)]).await);
        assert_ok!(store.save_outbox(&owner(), vec![1]).await);
        assert_eq!(store.owners(), vec![owner()]);

        store.clear();
        assert_eq!(store.event_count(&owner()), 0);
        assert!(!store.has_outbox(&owner()));
        assert_eq!(store.head_version(&owner()).await, Ok(Version::INITIAL));
    }
}
