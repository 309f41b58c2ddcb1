//! In-memory projection testing utilities
//!
//! Provides fast, deterministic testing infrastructure for projections:
//! - [`InMemoryProjectionStore`]: HashMap-based projection storage
//! - [`RecordingProjection`]: a projection that records what it was given and
//!   can be told to fail or stall

use eventide_core::event::Event;
use eventide_core::projection::{Projection, ProjectionError, ProjectionFuture, ProjectionStore};
use eventide_core::stream::{StreamId, Version};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// In-memory projection store for fast, deterministic testing.
///
/// # Example
///
/// ```
/// use eventide_testing::InMemoryProjectionStore;
/// use eventide_core::projection::ProjectionStore;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryProjectionStore::new();
///
/// store.save("customer:123", b"customer data".to_vec()).await.unwrap();
/// assert!(store.get("customer:123").await.unwrap().is_some());
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryProjectionStore {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryProjectionStore {
    /// Create a new empty in-memory projection store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all projection data (for test isolation)
    pub fn clear(&self) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Get the number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a key exists in the store
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Get all keys in the store, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl ProjectionStore for InMemoryProjectionStore {
    fn save(&self, key: &str, data: Vec<u8>) -> ProjectionFuture<'_> {
        let key = key.to_string();
        Box::pin(async move {
            self.data
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, data);
            Ok(())
        })
    }

    fn get(&self, key: &str) -> ProjectionFuture<'_, Option<Vec<u8>>> {
        let key = key.to_string();
        Box::pin(async move {
            Ok(self
                .data
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&key)
                .cloned())
        })
    }

    fn delete(&self, key: &str) -> ProjectionFuture<'_> {
        let key = key.to_string();
        Box::pin(async move {
            self.data
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            Ok(())
        })
    }
}

/// Projection that records every event it applies.
///
/// When built with [`RecordingProjection::with_store`] it also writes the
/// applied version under `"{name}:{owner}"`, the way a real read model would.
#[derive(Debug)]
pub struct RecordingProjection<E> {
    name: String,
    event_types: Vec<&'static str>,
    applied: Mutex<Vec<(StreamId, Version, E)>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Option<Duration>,
    store: Option<InMemoryProjectionStore>,
}

impl<E: Event + Clone> RecordingProjection<E> {
    /// A projection interested in `event_types`.
    #[must_use]
    pub fn new(name: impl Into<String>, event_types: Vec<&'static str>) -> Self {
        Self {
            name: name.into(),
            event_types,
            applied: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: None,
            store: None,
        }
    }

    /// Fail the first `failures` applications.
    #[must_use]
    pub fn failing_first(mut self, failures: usize) -> Self {
        self.failures_left = AtomicUsize::new(failures);
        self
    }

    /// Sleep this long inside every application.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Write the last applied version of each owner to `store`.
    #[must_use]
    pub fn with_store(mut self, store: InMemoryProjectionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Successfully applied events, in completion order.
    #[must_use]
    pub fn applied(&self) -> Vec<(StreamId, Version, E)> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applications started, failed and timed-out ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<E: Event + Clone> Projection<E> for RecordingProjection<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn event_types(&self) -> Vec<&'static str> {
        self.event_types.clone()
    }

    fn apply_event<'a>(
        &'a self,
        owner: &'a StreamId,
        version: Version,
        event: &'a E,
    ) -> ProjectionFuture<'a> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ProjectionError::Processing(format!(
                    "{} failed on {} at {version}",
                    self.name,
                    event.event_type()
                )));
            }
            if let Some(store) = &self.store {
                store
                    .save(
                        &format!("{}:{owner}", self.name),
                        version.value().to_be_bytes().to_vec(),
                    )
                    .await?;
            }
            self.applied
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((owner.clone(), version, event.clone()));
            Ok(())
        })
    }
}
