//! Outbox recipients for tests.

use eventide_core::outbox::{DeliveryError, DeliveryFuture, OutboxRecipient, RecipientKey};
use eventide_core::stream::{StreamId, Version};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Records every delivery it accepts.
#[derive(Debug)]
pub struct RecordingRecipient<E> {
    key: RecipientKey,
    deliveries: Mutex<Vec<(StreamId, Version, E)>>,
}

impl<E: Clone> RecordingRecipient<E> {
    /// Create a recipient listening on `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: RecipientKey::new(key),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    /// Every accepted delivery, in arrival order.
    #[must_use]
    pub fn deliveries(&self) -> Vec<(StreamId, Version, E)> {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Versions of accepted deliveries, in arrival order.
    #[must_use]
    pub fn versions(&self) -> Vec<Version> {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, version, _)| *version)
            .collect()
    }
}

impl<E: Clone + Send + Sync> OutboxRecipient<E> for RecordingRecipient<E> {
    fn key(&self) -> RecipientKey {
        self.key.clone()
    }

    fn handle<'a>(
        &'a self,
        owner: &'a StreamId,
        version: Version,
        event: &'a E,
    ) -> DeliveryFuture<'a> {
        Box::pin(async move {
            self.deliveries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((owner.clone(), version, event.clone()));
            Ok(())
        })
    }
}

/// Fails a fixed number of deliveries before accepting.
///
/// In rejecting mode every failure is [`DeliveryError::Rejected`] instead of
/// [`DeliveryError::Failed`].
#[derive(Debug)]
pub struct FlakyRecipient<E> {
    inner: RecordingRecipient<E>,
    failures_left: AtomicUsize,
    rejecting: bool,
    attempts: AtomicUsize,
}

impl<E: Clone> FlakyRecipient<E> {
    /// Fail the first `failures` deliveries with a transient error.
    #[must_use]
    pub fn new(key: impl Into<String>, failures: usize) -> Self {
        Self {
            inner: RecordingRecipient::new(key),
            failures_left: AtomicUsize::new(failures),
            rejecting: false,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Reject the first `failures` deliveries permanently.
    #[must_use]
    pub fn rejecting(key: impl Into<String>, failures: usize) -> Self {
        Self {
            rejecting: true,
            ..Self::new(key, failures)
        }
    }

    /// Fail every delivery until [`FlakyRecipient::recover`] is called.
    #[must_use]
    pub fn always_failing(key: impl Into<String>) -> Self {
        Self::new(key, usize::MAX)
    }

    /// Accept all further deliveries.
    pub fn recover(&self) {
        self.failures_left.store(0, Ordering::SeqCst);
    }

    /// Deliveries attempted so far, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Accepted deliveries.
    #[must_use]
    pub fn deliveries(&self) -> Vec<(StreamId, Version, E)> {
        self.inner.deliveries()
    }

    /// Versions of accepted deliveries.
    #[must_use]
    pub fn versions(&self) -> Vec<Version> {
        self.inner.versions()
    }
}

impl<E: Clone + Send + Sync> OutboxRecipient<E> for FlakyRecipient<E> {
    fn key(&self) -> RecipientKey {
        self.inner.key.clone()
    }

    fn handle<'a>(
        &'a self,
        owner: &'a StreamId,
        version: Version,
        event: &'a E,
    ) -> DeliveryFuture<'a> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            let reason = format!("{} refused version {version}", self.inner.key);
            let error = if self.rejecting {
                DeliveryError::Rejected(reason)
            } else {
                DeliveryError::Failed(reason)
            };
            return Box::pin(async move { Err(error) });
        }
        self.inner.handle(owner, version, event)
    }
}
