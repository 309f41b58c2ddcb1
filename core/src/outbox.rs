//! Outbox entries and the recipient contract.
//!
//! When an event is raised the runtime creates one [`OutboxEnvelope`] per
//! registered recipient. Envelopes are delivered at least once; recipients
//! deduplicate by `(owner, version)`.

use crate::stream::{StreamId, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Typed handle identifying a registered recipient.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipientKey(String);

impl RecipientKey {
    /// Create a key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecipientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecipientKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Delivery state of an outbox entry.
///
/// `Failed` is informational: a failed entry is requeued as `Pending` for the
/// next drain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxState {
    /// Waiting for delivery.
    #[default]
    Pending,
    /// The last delivery attempt failed.
    Failed,
}

/// One event addressed to one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEnvelope<E> {
    /// The event to deliver.
    pub event: E,
    /// Version of the event in its owner's log.
    pub version: Version,
    /// Recipient this entry is addressed to.
    pub destination: RecipientKey,
    /// Current delivery state.
    pub state: OutboxState,
    /// Failed delivery attempts so far.
    pub attempts: u32,
}

impl<E> OutboxEnvelope<E> {
    /// Create a pending entry.
    #[must_use]
    pub const fn new(event: E, version: Version, destination: RecipientKey) -> Self {
        Self {
            event,
            version,
            destination,
            state: OutboxState::Pending,
            attempts: 0,
        }
    }

    /// Record a failed attempt.
    pub const fn mark_failed(&mut self) {
        self.state = OutboxState::Failed;
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Put a failed entry back in line.
    pub const fn requeue(&mut self) {
        self.state = OutboxState::Pending;
    }
}

/// Why a recipient did not accept a delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Transient failure; the entry is retried on the next drain.
    #[error("Delivery failed: {0}")]
    Failed(String),

    /// The recipient will never accept this entry; it is dead-lettered.
    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

/// Boxed future returned by [`OutboxRecipient::handle`].
pub type DeliveryFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + 'a>>;

/// External consumer of outbox-delivered events.
///
/// # Idempotence
///
/// Delivery is at-least-once. A recipient may see the same `(owner, version)`
/// more than once and must treat repeats as no-ops. Deliveries to one
/// recipient arrive in ascending version order per owner.
pub trait OutboxRecipient<E>: Send + Sync {
    /// Key entries for this recipient are addressed to. Must be stable.
    fn key(&self) -> RecipientKey;

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Failed`] to have the entry retried, or
    /// [`DeliveryError::Rejected`] to dead-letter it.
    fn handle<'a>(&'a self, owner: &'a StreamId, version: Version, event: &'a E)
    -> DeliveryFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_entries_count_attempts_and_requeue() {
        let mut entry = OutboxEnvelope::new("e", Version::new(1), RecipientKey::from("r"));
        assert_eq!(entry.state, OutboxState::Pending);

        entry.mark_failed();
        entry.mark_failed();
        assert_eq!(entry.state, OutboxState::Failed);
        assert_eq!(entry.attempts, 2);

        entry.requeue();
        assert_eq!(entry.state, OutboxState::Pending);
        assert_eq!(entry.attempts, 2);
    }

    #[test]
    fn recipient_key_display() {
        assert_eq!(RecipientKey::new("balance-view").to_string(), "balance-view");
    }
}
