//! Bounded dead letter queue for permanently failed work.
//!
//! Outbox entries that exhaust `max_delivery_attempts` (or are rejected by their
//! recipient) and projection work items that exhaust their retries end up here
//! for inspection and manual replay.

use chrono::{DateTime, Utc};
use eventide_core::environment::{Clock, SystemClock};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Dead letter queue entry
///
/// A failed payload together with why and when it failed.
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    /// The failed payload
    pub payload: T,

    /// Component that gave up on the payload (`"outbox"`, a projection name, ...)
    pub origin: String,

    /// Number of delivery attempts made
    pub attempts: u32,

    /// The error message from the last failure
    pub error_message: String,

    /// When the payload was dead-lettered
    pub failed_at: DateTime<Utc>,
}

/// Dead Letter Queue for storing failed operations
///
/// # Features
///
/// - Bounded queue with configurable max size
/// - FIFO ordering (oldest entries dropped when full)
/// - Thread-safe, cheap to clone (clones share the same queue)
/// - `dlq.*` metrics for queue size and operations
///
/// # Example
///
/// ```
/// use eventide_runtime::dead_letter::DeadLetterQueue;
///
/// let dlq = DeadLetterQueue::new(2);
/// dlq.push("a", "outbox", "Connection refused", 3);
/// dlq.push("b", "outbox", "Connection refused", 3);
/// dlq.push("c", "outbox", "Connection refused", 3);
///
/// let drained: Vec<_> = dlq.drain().into_iter().map(|d| d.payload).collect();
/// assert_eq!(drained, vec!["b", "c"]);
/// ```
pub struct DeadLetterQueue<T> {
    queue: Arc<Mutex<VecDeque<DeadLetter<T>>>>,
    max_size: usize,
    clock: Arc<dyn Clock>,
}

impl<T> DeadLetterQueue<T> {
    /// Create a new dead letter queue holding at most `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp `failed_at` from `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Push a failed payload onto the queue
    ///
    /// If the queue is full, the oldest entry is dropped.
    pub fn push(
        &self,
        payload: T,
        origin: impl Into<String>,
        error_message: impl Into<String>,
        attempts: u32,
    ) {
        let origin = origin.into();
        let error_message = error_message.into();
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);

        if self.max_size == 0 {
            metrics::counter!("dlq.dropped").increment(1);
            tracing::warn!(origin = %origin, "DLQ has zero capacity, dropping entry");
            return;
        }

        if queue.len() >= self.max_size {
            queue.pop_front();
            metrics::counter!("dlq.dropped").increment(1);
            tracing::warn!(
                max_size = self.max_size,
                "DLQ at capacity, dropping oldest entry"
            );
        }

        tracing::warn!(
            origin = %origin,
            attempts,
            error = %error_message,
            queue_size = queue.len() + 1,
            "Payload added to dead letter queue"
        );

        queue.push_back(DeadLetter {
            payload,
            origin,
            attempts,
            error_message,
            failed_at: self.clock.now(),
        });

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("dlq.size").set(queue.len() as f64);
        metrics::counter!("dlq.pushed").increment(1);
    }

    /// Get the current queue size
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();

        metrics::gauge!("dlq.size").set(0.0);
        metrics::counter!("dlq.drained").increment(entries.len() as u64);

        tracing::info!(count = entries.len(), "Drained dead letter queue");

        entries
    }

    /// Peek at the oldest entry without removing it
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Get the maximum queue size
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<T> std::fmt::Debug for DeadLetterQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterQueue")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl<T> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}
