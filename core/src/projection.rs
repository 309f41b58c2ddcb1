//! Projection contract: read models driven by raised events.
//!
//! # Overview
//!
//! A [`Projection`] declares the event types it understands and updates a read
//! model as those events arrive. Projections run outside the aggregate's
//! persistence cycle: the controller hands each raised event to a
//! [`ProjectionSink`] and returns without waiting.
//!
//! ```text
//!  raise(event) ──► ProjectionSink::dispatch ──► bounded queue ──► workers
//!                                                                   │
//!                                              Projection::apply_event
//!                                                                   │
//!                                                          ProjectionStore
//! ```
//!
//! The dispatcher that implements [`ProjectionSink`] lives in
//! `eventide-projections`.

use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Error type for projection operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// The projection cannot be registered (no name, no event types, ...).
    #[error("Invalid projection: {0}")]
    InvalidProjection(String),

    /// The projection failed to process an event.
    #[error("Event processing error: {0}")]
    Processing(String),

    /// Processing exceeded the configured timeout.
    #[error("Projection {projection} timed out after {limit:?}")]
    TimedOut {
        /// Name of the projection.
        projection: String,
        /// The configured processing timeout.
        limit: Duration,
    },

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Boxed future returned by projection operations.
pub type ProjectionFuture<'a, T = ()> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A read-model updater.
///
/// # Idempotency
///
/// Dispatch retries on failure and timeout, so `apply_event` may see the same
/// `(owner, version)` more than once.
///
/// # Dyn Compatibility
///
/// Registries hold projections as `Arc<dyn Projection<E>>`.
pub trait Projection<E>: Send + Sync + 'static {
    /// Unique name of this projection.
    fn name(&self) -> &str;

    /// Event type names (see [`Event::event_type`](crate::event::Event::event_type)) this
    /// projection wants to receive. Must not be empty.
    fn event_types(&self) -> Vec<&'static str>;

    /// Apply one event to the read model.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if processing or storage fails; the
    /// dispatcher retries according to its options.
    fn apply_event<'a>(
        &'a self,
        owner: &'a StreamId,
        version: Version,
        event: &'a E,
    ) -> ProjectionFuture<'a>;
}

/// Result of handing one event to a [`ProjectionSink`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Work items queued (one per interested projection).
    pub queued: usize,
    /// Work items dropped because the queue was full or closed.
    pub dropped: usize,
}

/// Fan-out seam between an aggregate controller and its projections.
///
/// `dispatch` never blocks and never fails: back-pressure is lossy.
pub trait ProjectionSink<E>: Send + Sync {
    /// Queue `event` for every projection interested in its type.
    fn dispatch(&self, owner: &StreamId, version: Version, event: &E) -> DispatchReceipt;
}

/// Storage backend for projection read models.
///
/// Projections usually keep their data apart from the event journal, in a
/// store optimized for their query patterns.
pub trait ProjectionStore: Send + Sync {
    /// Insert or replace the data stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the save fails.
    fn save(&self, key: &str, data: Vec<u8>) -> ProjectionFuture<'_>;

    /// Get the data stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if retrieval fails.
    fn get(&self, key: &str) -> ProjectionFuture<'_, Option<Vec<u8>>>;

    /// Delete the data stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if deletion fails.
    fn delete(&self, key: &str) -> ProjectionFuture<'_>;
}
