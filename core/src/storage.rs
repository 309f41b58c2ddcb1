//! Durable storage contracts consumed by the runtime.
//!
//! Three independent abstractions back an event-sourced aggregate:
//!
//! - [`EventJournal`]: the append-only, per-owner event log
//! - [`SnapshotStore`]: insert-if-absent state snapshots keyed by `(owner, version)`
//! - [`OutboxStore`]: the persisted outbox queue, stored alongside the aggregate
//!
//! All three deal in bytes and [`StoredEvent`]s so they stay dyn-compatible and
//! independent of any aggregate type. A single backend may implement all three.
//!
//! # Dyn Compatibility
//!
//! Methods return explicit `Pin<Box<dyn Future>>` instead of using `async fn`
//! so the runtime can hold `Arc<dyn EventJournal>` and friends.
//!
//! # Example
//!
//! ```no_run
//! use eventide_core::storage::{EventJournal, StorageError};
//! use eventide_core::stream::{StreamId, Version};
//!
//! async fn replay_len(journal: &dyn EventJournal) -> Result<usize, StorageError> {
//!     let owner = StreamId::for_aggregate("account", "acc-1");
//!     let tail = journal.read_tail(&owner, Version::INITIAL).await?;
//!     Ok(tail.len())
//! }
//! ```

use crate::event::StoredEvent;
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by every storage operation.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Snapshot bytes together with the version they were taken at.
pub type SnapshotData = (Version, Vec<u8>);

/// Errors that can occur during storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend failed (connection lost, I/O error, ...).
    #[error("Storage error: {0}")]
    Backend(String),

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored data violates a log invariant (gap, out-of-order version).
    #[error("Corrupt storage: {0}")]
    Corrupt(String),

    /// An append did not continue the journal at its current head.
    #[error("Version conflict on {stream_id}: expected next version {expected}, found {actual}")]
    VersionConflict {
        /// The stream where the conflict occurred.
        stream_id: StreamId,
        /// The version the journal expected next.
        expected: Version,
        /// The version that was offered.
        actual: Version,
    },
}

/// Outcome of an insert-if-absent snapshot write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotWrite {
    /// The snapshot was stored.
    Written,
    /// A snapshot at this `(owner, version)` already existed; nothing changed.
    AlreadyExists,
}

/// Append-only event journal, one log per owner.
///
/// # Ordering
///
/// Events of a single owner are stored and returned in ascending version order
/// without gaps. `append` must reject a batch whose first version is not
/// `head_version + 1`.
pub trait EventJournal: Send + Sync {
    /// Append events to an owner's log.
    ///
    /// Returns the head version after the append.
    ///
    /// # Errors
    ///
    /// - `VersionConflict`: the batch does not continue the current head
    /// - `Corrupt`: the batch itself has gaps or is unordered
    /// - `Backend`: the storage backend failed
    fn append(&self, owner: &StreamId, events: Vec<StoredEvent>) -> StorageFuture<'_, Version>;

    /// Read every stored event with `version > from_exclusive`, oldest first.
    ///
    /// An unknown owner yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the storage backend failed.
    fn read_tail(
        &self,
        owner: &StreamId,
        from_exclusive: Version,
    ) -> StorageFuture<'_, Vec<StoredEvent>>;

    /// Delete every stored event with `version <= up_to_inclusive`.
    ///
    /// Returns the number of removed events. The head version is unaffected.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the storage backend failed.
    fn truncate(&self, owner: &StreamId, up_to_inclusive: Version) -> StorageFuture<'_, u64>;

    /// Version of the newest event ever appended (including truncated ones).
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the storage backend failed.
    fn head_version(&self, owner: &StreamId) -> StorageFuture<'_, Version>;
}

/// Snapshot store with insert-if-absent semantics.
///
/// A snapshot is immutable once stored. Writing the same `(owner, version)`
/// twice is not an error; the second write reports
/// [`SnapshotWrite::AlreadyExists`] and leaves the first one in place.
pub trait SnapshotStore: Send + Sync {
    /// Store serialized state at `version` unless a snapshot already exists there.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the storage backend failed.
    fn write(
        &self,
        owner: &StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> StorageFuture<'_, SnapshotWrite>;

    /// Load the highest-versioned snapshot with `version <= at_or_before`.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the storage backend failed.
    fn read_latest_at_or_before(
        &self,
        owner: &StreamId,
        at_or_before: Version,
    ) -> StorageFuture<'_, Option<SnapshotData>>;
}

/// Persisted outbox queue of one owner.
///
/// The runtime owns the queue layout; the store only keeps the latest blob.
pub trait OutboxStore: Send + Sync {
    /// Load the most recently saved outbox, if any.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the storage backend failed.
    fn load_outbox(&self, owner: &StreamId) -> StorageFuture<'_, Option<Vec<u8>>>;

    /// Replace the saved outbox.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the storage backend failed.
    fn save_outbox(&self, owner: &StreamId, outbox: Vec<u8>) -> StorageFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_error_display() {
        let error = StorageError::VersionConflict {
            stream_id: StreamId::new("account/1"),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = format!("{error}");
        assert!(display.contains("account/1"));
        assert!(display.contains("expected next version 5"));
        assert!(display.contains("found 7"));
    }

    #[test]
    fn backend_error_display() {
        let error = StorageError::Backend("disk full".to_string());
        assert_eq!(error.to_string(), "Storage error: disk full");
    }
}
