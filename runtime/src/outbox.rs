//! At-least-once outbox delivery for one aggregate instance.
//!
//! Every raised event becomes one [`OutboxEnvelope`] per registered recipient.
//! A drain hands pending entries to their recipients and keeps whatever failed
//! for the next drain.
//!
//! # Drain cycle
//!
//! ```text
//! trigger() ──► timer (due = 0) ──► drain()
//!                                     │ disable timer
//!                                     │ take all pending entries
//!                                     │ deliver in version order per destination
//!                                     │   ok        → persist shrunk outbox
//!                                     │   failed    → requeue, defer the rest of that destination
//!                                     │   rejected  → dead letter
//!                                     │   no recipient → dropped (configuration error)
//!                                     └ requeue failed + deferred ahead of new entries, persist
//! ```
//!
//! Drains are single-flight: a second caller waits for the running drain to
//! finish and then drains whatever is left.
//!
//! # Confirmed events only
//!
//! Entries are created from events that are already in the journal. The
//! persisted outbox records the highest version it has queued, so after a
//! restart the owner can requeue confirmed events whose entries never made it
//! to storage (see [`OutboxProcessor::enqueued_through`]).
//!
//! # Ordering
//!
//! Entries for one destination are delivered in ascending version order. Once
//! an entry fails, later entries for the same destination are not attempted in
//! that drain.

use crate::config::OutboxConfig;
use crate::dead_letter::DeadLetterQueue;
use crate::metrics::OutboxMetrics;
use eventide_core::environment::Clock;
use eventide_core::event::{Event, EventEnvelope};
use eventide_core::outbox::{DeliveryError, OutboxEnvelope, OutboxRecipient, RecipientKey};
use eventide_core::storage::{OutboxStore, StorageError};
use eventide_core::stream::{StreamId, Version};
use eventide_core::timer::{TimerHandle, TimerScheduler, timer_callback};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Origin recorded on outbox dead letters.
pub const DEAD_LETTER_ORIGIN: &str = "outbox";

/// Errors from outbox operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutboxError {
    /// The outbox store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The outbox could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An entry is addressed to a recipient that is not registered.
    #[error("No recipient registered for {0}")]
    MissingRecipient(RecipientKey),

    /// A recipient with this key is already registered.
    #[error("Recipient {0} is already registered")]
    DuplicateRecipient(RecipientKey),
}

/// What one [`OutboxProcessor::drain`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries accepted by their recipient.
    pub delivered: usize,
    /// Entries whose delivery failed and were requeued.
    pub failed: usize,
    /// Entries not attempted because an earlier entry for the same destination
    /// failed.
    pub deferred: usize,
    /// Entries moved to the dead letter queue.
    pub dead_lettered: usize,
    /// Entries dropped because their destination has no recipient.
    pub misrouted: usize,
}

impl DrainReport {
    /// Entries handled by this drain.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.delivered + self.failed + self.deferred + self.dead_lettered + self.misrouted
    }

    /// True if nothing is left for a later drain.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0 && self.deferred == 0
    }
}

type RecipientHandle<E> = Arc<dyn OutboxRecipient<E>>;

#[derive(Serialize)]
struct OutboxRecord<'a, E> {
    enqueued_through: Version,
    entries: Vec<&'a OutboxEnvelope<E>>,
}

#[derive(Deserialize)]
struct StoredOutbox<E> {
    enqueued_through: Version,
    entries: Vec<OutboxEnvelope<E>>,
}

/// Outbox of one aggregate instance.
///
/// Create it behind an `Arc` and call [`OutboxProcessor::attach_timer`] to get
/// automatic drains after [`OutboxProcessor::trigger`].
pub struct OutboxProcessor<E> {
    owner: StreamId,
    store: Arc<dyn OutboxStore>,
    config: OutboxConfig,
    recipients: RwLock<BTreeMap<RecipientKey, RecipientHandle<E>>>,
    queue: Mutex<VecDeque<OutboxEnvelope<E>>>,
    enqueued_through: AtomicU64,
    durable_through: AtomicU64,
    drain_guard: tokio::sync::Mutex<()>,
    timer: Mutex<Option<TimerHandle>>,
    dead_letters: DeadLetterQueue<OutboxEnvelope<E>>,
}

impl<E> OutboxProcessor<E>
where
    E: Event + Clone + Serialize + DeserializeOwned,
{
    /// Create an empty outbox for `owner`.
    #[must_use]
    pub fn new(owner: StreamId, store: Arc<dyn OutboxStore>, config: OutboxConfig) -> Self {
        Self {
            owner,
            store,
            dead_letters: DeadLetterQueue::new(config.dead_letter_capacity),
            config,
            recipients: RwLock::new(BTreeMap::new()),
            queue: Mutex::new(VecDeque::new()),
            enqueued_through: AtomicU64::new(0),
            durable_through: AtomicU64::new(0),
            drain_guard: tokio::sync::Mutex::new(()),
            timer: Mutex::new(None),
        }
    }

    /// Stamp dead letters from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.dead_letters = self.dead_letters.with_clock(clock);
        self
    }

    /// Register a recipient; future raises produce one entry for it.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::DuplicateRecipient`] if the key is taken.
    pub fn register_recipient(
        &self,
        recipient: RecipientHandle<E>,
    ) -> Result<RecipientKey, OutboxError> {
        let key = recipient.key();
        let mut recipients = self
            .recipients
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if recipients.contains_key(&key) {
            return Err(OutboxError::DuplicateRecipient(key));
        }
        recipients.insert(key.clone(), recipient);
        tracing::debug!(owner = %self.owner, recipient = %key, "Outbox recipient registered");
        Ok(key)
    }

    /// Keys of all registered recipients, sorted.
    #[must_use]
    pub fn recipient_keys(&self) -> Vec<RecipientKey> {
        self.recipients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Replace the in-memory queue with the persisted outbox, if any.
    ///
    /// Entries that were `Failed` when saved come back as `Pending`. Returns the
    /// number of entries loaded.
    ///
    /// # Errors
    ///
    /// `Storage` if the store fails, `Serialization` if the blob is unreadable.
    pub async fn load(&self) -> Result<usize, OutboxError> {
        let stored = match self.store.load_outbox(&self.owner).await? {
            Some(bytes) => bincode::deserialize::<StoredOutbox<E>>(&bytes)
                .map_err(|e| OutboxError::Serialization(e.to_string()))?,
            None => StoredOutbox {
                enqueued_through: Version::INITIAL,
                entries: Vec::new(),
            },
        };
        let StoredOutbox {
            enqueued_through,
            mut entries,
        } = stored;
        for entry in &mut entries {
            entry.requeue();
        }
        let count = entries.len();
        {
            let mut queue = self.lock_queue();
            *queue = entries.into();
            self.enqueued_through
                .store(enqueued_through.value(), Ordering::SeqCst);
            self.durable_through
                .store(enqueued_through.value(), Ordering::SeqCst);
        }
        OutboxMetrics::record_pending(count);
        if count > 0 {
            tracing::info!(owner = %self.owner, pending = count, "Outbox restored");
        }
        Ok(count)
    }

    /// Queue one entry per registered recipient for each confirmed event, then
    /// persist.
    ///
    /// Events at or below [`OutboxProcessor::enqueued_through`] already have
    /// their entries and are skipped. Returns the number of entries created.
    ///
    /// # Errors
    ///
    /// `Storage` or `Serialization` if the outbox cannot be persisted. The
    /// entries stay queued in memory and go out with the next successful
    /// persist.
    pub async fn enqueue(&self, events: &[EventEnvelope<E>]) -> Result<usize, OutboxError> {
        let keys = self.recipient_keys();
        let created = {
            let mut queue = self.lock_queue();
            let through = self.enqueued_through();
            let mut created = 0;
            for envelope in events.iter().filter(|e| e.version > through) {
                for key in &keys {
                    queue.push_back(OutboxEnvelope::new(
                        envelope.event.clone(),
                        envelope.version,
                        key.clone(),
                    ));
                    created += 1;
                }
                self.enqueued_through
                    .fetch_max(envelope.version.value(), Ordering::SeqCst);
            }
            OutboxMetrics::record_pending(queue.len());
            created
        };
        if self.enqueued_through() == self.durable_through() {
            return Ok(created);
        }
        tracing::debug!(owner = %self.owner, created, "Outbox entries queued");
        self.persist_queue().await?;
        Ok(created)
    }

    /// Persist the outbox if it holds entries that are not stored yet.
    ///
    /// # Errors
    ///
    /// `Storage` or `Serialization` if the outbox cannot be persisted.
    pub async fn ensure_durable(&self) -> Result<(), OutboxError> {
        if self.enqueued_through() > self.durable_through() {
            self.persist_queue().await?;
        }
        Ok(())
    }

    /// Highest event version the outbox has queued entries for.
    #[must_use]
    pub fn enqueued_through(&self) -> Version {
        Version::new(self.enqueued_through.load(Ordering::SeqCst))
    }

    /// Highest event version whose entries are known to be stored.
    #[must_use]
    pub fn durable_through(&self) -> Version {
        Version::new(self.durable_through.load(Ordering::SeqCst))
    }

    /// Arm the drain timer on `scheduler`, initially disabled.
    ///
    /// The timer holds a weak reference; dropping the processor stops drains.
    pub fn attach_timer(self: &Arc<Self>, scheduler: &dyn TimerScheduler) {
        let weak = Arc::downgrade(self);
        let callback = timer_callback(move || {
            let weak = weak.clone();
            async move {
                if let Some(outbox) = weak.upgrade() {
                    if let Err(error) = outbox.drain().await {
                        tracing::error!(owner = %outbox.owner, error = %error, "Outbox drain failed");
                    }
                }
            }
        });
        let handle = scheduler.schedule(&format!("outbox:{}", self.owner), callback, None, None);
        if let Some(previous) = self.lock_timer().replace(handle) {
            previous.cancel();
        }
    }

    /// Request a drain as soon as possible.
    ///
    /// Without an attached timer this does nothing; call [`OutboxProcessor::drain`].
    pub fn trigger(&self) {
        if let Some(timer) = self.lock_timer().as_ref() {
            timer.reschedule(Some(Duration::ZERO), None);
        }
    }

    /// Cancel the drain timer permanently.
    pub fn cancel_timer(&self) {
        if let Some(timer) = self.lock_timer().take() {
            timer.cancel();
        }
    }

    /// Deliver every pending entry once.
    ///
    /// # Errors
    ///
    /// `Storage` or `Serialization` if the final persist fails. Delivery
    /// failures are not errors; they show up in the report.
    pub async fn drain(&self) -> Result<DrainReport, OutboxError> {
        let _single_flight = self.drain_guard.lock().await;
        if let Some(timer) = self.lock_timer().as_ref() {
            timer.reschedule(None, None);
        }

        let mut pending: VecDeque<OutboxEnvelope<E>> = std::mem::take(&mut *self.lock_queue());
        let mut report = DrainReport::default();
        if pending.is_empty() {
            return Ok(report);
        }
        tracing::debug!(owner = %self.owner, pending = pending.len(), "Draining outbox");

        let mut retained: Vec<OutboxEnvelope<E>> = Vec::new();
        let mut blocked: HashSet<RecipientKey> = HashSet::new();

        while let Some(mut entry) = pending.pop_front() {
            if blocked.contains(&entry.destination) {
                report.deferred += 1;
                retained.push(entry);
                continue;
            }

            let Some(recipient) = self.recipient(&entry.destination) else {
                report.misrouted += 1;
                tracing::error!(
                    owner = %self.owner,
                    destination = %entry.destination,
                    version = entry.version.value(),
                    "{}",
                    OutboxError::MissingRecipient(entry.destination.clone())
                );
                continue;
            };

            match recipient.handle(&self.owner, entry.version, &entry.event).await {
                Ok(()) => {
                    report.delivered += 1;
                    OutboxMetrics::record_delivered();
                    if let Err(error) = self.persist_snapshot(&retained, &pending).await {
                        tracing::warn!(owner = %self.owner, error = %error, "Failed to persist outbox after delivery");
                    }
                }
                Err(DeliveryError::Rejected(reason)) => {
                    entry.mark_failed();
                    report.dead_lettered += 1;
                    self.dead_letter(entry, reason);
                }
                Err(DeliveryError::Failed(reason)) => {
                    entry.mark_failed();
                    OutboxMetrics::record_failed();
                    if self
                        .config
                        .max_delivery_attempts
                        .is_some_and(|max| entry.attempts >= max)
                    {
                        report.dead_lettered += 1;
                        self.dead_letter(entry, reason);
                    } else {
                        tracing::warn!(
                            owner = %self.owner,
                            destination = %entry.destination,
                            version = entry.version.value(),
                            attempts = entry.attempts,
                            reason = %reason,
                            "Outbox delivery failed, will retry"
                        );
                        report.failed += 1;
                        blocked.insert(entry.destination.clone());
                        retained.push(entry);
                    }
                }
            }
        }

        {
            let mut queue = self.lock_queue();
            for mut entry in retained.into_iter().rev() {
                entry.requeue();
                queue.push_front(entry);
            }
            OutboxMetrics::record_pending(queue.len());
        }
        self.persist_queue().await?;

        tracing::debug!(
            owner = %self.owner,
            delivered = report.delivered,
            failed = report.failed,
            deferred = report.deferred,
            dead_lettered = report.dead_lettered,
            misrouted = report.misrouted,
            "Outbox drained"
        );
        Ok(report)
    }

    /// Entries waiting for delivery.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock_queue().len()
    }

    /// Copy of the pending entries, in delivery order.
    #[must_use]
    pub fn pending(&self) -> Vec<OutboxEnvelope<E>> {
        self.lock_queue().iter().cloned().collect()
    }

    /// Highest version still waiting for delivery to `destination`.
    #[must_use]
    pub fn pending_version_for(&self, destination: &RecipientKey) -> Option<Version> {
        self.lock_queue()
            .iter()
            .filter(|e| &e.destination == destination)
            .map(|e| e.version)
            .max()
    }

    /// Entries given up on.
    #[must_use]
    pub const fn dead_letters(&self) -> &DeadLetterQueue<OutboxEnvelope<E>> {
        &self.dead_letters
    }

    /// Owner of this outbox.
    #[must_use]
    pub const fn owner(&self) -> &StreamId {
        &self.owner
    }

    fn recipient(&self, key: &RecipientKey) -> Option<RecipientHandle<E>> {
        self.recipients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn dead_letter(&self, entry: OutboxEnvelope<E>, reason: String) {
        OutboxMetrics::record_dead_lettered();
        tracing::error!(
            owner = %self.owner,
            destination = %entry.destination,
            version = entry.version.value(),
            attempts = entry.attempts,
            reason = %reason,
            "Outbox entry dead-lettered"
        );
        let attempts = entry.attempts;
        self.dead_letters
            .push(entry, DEAD_LETTER_ORIGIN, reason, attempts);
    }

    async fn persist_queue(&self) -> Result<(), OutboxError> {
        let (bytes, through) = {
            let queue = self.lock_queue();
            self.encode(queue.iter().collect())?
        };
        self.save(bytes, through).await
    }

    /// Persist what a crash right now would have to redeliver: entries kept
    /// back so far, entries not yet attempted, and anything queued meanwhile.
    async fn persist_snapshot(
        &self,
        retained: &[OutboxEnvelope<E>],
        remaining: &VecDeque<OutboxEnvelope<E>>,
    ) -> Result<(), OutboxError> {
        let (bytes, through) = {
            let queue = self.lock_queue();
            let outstanding: Vec<&OutboxEnvelope<E>> = retained
                .iter()
                .chain(remaining.iter())
                .chain(queue.iter())
                .collect();
            self.encode(outstanding)?
        };
        self.save(bytes, through).await
    }

    /// Encode `entries` with the current high-water mark. Call with the queue
    /// locked so both describe the same moment.
    fn encode(&self, entries: Vec<&OutboxEnvelope<E>>) -> Result<(Vec<u8>, Version), OutboxError> {
        let record = OutboxRecord {
            enqueued_through: self.enqueued_through(),
            entries,
        };
        let bytes =
            bincode::serialize(&record).map_err(|e| OutboxError::Serialization(e.to_string()))?;
        Ok((bytes, record.enqueued_through))
    }

    async fn save(&self, bytes: Vec<u8>, through: Version) -> Result<(), OutboxError> {
        self.store.save_outbox(&self.owner, bytes).await?;
        self.durable_through
            .fetch_max(through.value(), Ordering::SeqCst);
        Ok(())
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<OutboxEnvelope<E>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, Option<TimerHandle>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> std::fmt::Debug for OutboxProcessor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxProcessor")
            .field("owner", &self.owner)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use eventide_testing::bank::{AccountEvent, deposited, withdrawn};
    use eventide_testing::{
        FlakyRecipient, InMemoryStore, ManualScheduler, RecordingRecipient, test_clock,
    };

    fn owner() -> StreamId {
        StreamId::for_aggregate("account", "1")
    }

    fn envelopes(events: Vec<AccountEvent>) -> Vec<EventEnvelope<AccountEvent>> {
        events
            .into_iter()
            .zip(1..)
            .map(|(event, v)| EventEnvelope::new(event, Version::new(v), test_clock().now()))
            .collect()
    }

    fn processor(store: &Arc<InMemoryStore>, config: OutboxConfig) -> OutboxProcessor<AccountEvent> {
        OutboxProcessor::new(owner(), store.clone(), config)
    }

    #[tokio::test]
    async fn one_entry_per_recipient_per_event() {
        let store = Arc::new(InMemoryStore::new());
        let outbox = processor(&store, OutboxConfig::default());
        let a = Arc::new(RecordingRecipient::<AccountEvent>::new("a"));
        let b = Arc::new(RecordingRecipient::<AccountEvent>::new("b"));
        outbox.register_recipient(a.clone()).unwrap();
        outbox.register_recipient(b.clone()).unwrap();

        let created = outbox
            .enqueue(&envelopes(vec![deposited(1), withdrawn(1)]))
            .await
            .unwrap();
        assert_eq!(created, 4);
        assert!(store.has_outbox(&owner()));

        let report = outbox.drain().await.unwrap();
        assert_eq!(report.delivered, 4);
        assert!(report.is_clean());
        assert_eq!(a.versions(), vec![Version::new(1), Version::new(2)]);
        assert_eq!(b.versions(), vec![Version::new(1), Version::new(2)]);
        assert_eq!(outbox.pending_len(), 0);
    }

    #[tokio::test]
    async fn duplicate_recipient_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let outbox = processor(&store, OutboxConfig::default());
        outbox
            .register_recipient(Arc::new(RecordingRecipient::<AccountEvent>::new("a")))
            .unwrap();
        let err = outbox
            .register_recipient(Arc::new(RecordingRecipient::<AccountEvent>::new("a")))
            .unwrap_err();
        assert_eq!(err, OutboxError::DuplicateRecipient(RecipientKey::new("a")));
    }

    #[tokio::test]
    async fn failed_entry_is_retried_on_next_drain() {
        let store = Arc::new(InMemoryStore::new());
        let outbox = processor(&store, OutboxConfig::default());
        let flaky = Arc::new(FlakyRecipient::<AccountEvent>::new("flaky", 1));
        outbox.register_recipient(flaky.clone()).unwrap();
        outbox.enqueue(&envelopes(vec![deposited(5)])).await.unwrap();

        let first = outbox.drain().await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(outbox.pending_len(), 1);
        assert_eq!(outbox.pending()[0].attempts, 1);
        assert_eq!(outbox.pending()[0].state, eventide_core::outbox::OutboxState::Pending);

        let second = outbox.drain().await.unwrap();
        assert_eq!(second.delivered, 1);
        assert_eq!(outbox.pending_len(), 0);
        assert_eq!(flaky.deliveries().len(), 1);
        assert_eq!(flaky.attempts(), 2);
    }

    #[tokio::test]
    async fn failure_defers_later_entries_for_same_destination() {
        let store = Arc::new(InMemoryStore::new());
        let outbox = processor(&store, OutboxConfig::default());
        let flaky = Arc::new(FlakyRecipient::<AccountEvent>::new("flaky", 1));
        let steady = Arc::new(RecordingRecipient::<AccountEvent>::new("steady"));
        outbox.register_recipient(flaky.clone()).unwrap();
        outbox.register_recipient(steady.clone()).unwrap();
        outbox
            .enqueue(&envelopes(vec![deposited(1), deposited(2), deposited(3)]))
            .await
            .unwrap();

        let report = outbox.drain().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 2);
        assert_eq!(report.delivered, 3);
        assert_eq!(flaky.attempts(), 1);

        outbox.drain().await.unwrap();
        assert_eq!(
            flaky.versions(),
            vec![Version::new(1), Version::new(2), Version::new(3)]
        );
    }

    #[tokio::test]
    async fn poison_entry_is_dead_lettered() {
        let store = Arc::new(InMemoryStore::new());
        let outbox = processor(
            &store,
            OutboxConfig::default().with_max_delivery_attempts(Some(2)),
        );
        let broken = Arc::new(FlakyRecipient::<AccountEvent>::always_failing("broken"));
        outbox.register_recipient(broken.clone()).unwrap();
        outbox.enqueue(&envelopes(vec![deposited(1)])).await.unwrap();

        assert_eq!(outbox.drain().await.unwrap().failed, 1);
        assert_eq!(outbox.drain().await.unwrap().dead_lettered, 1);
        assert_eq!(outbox.pending_len(), 0);

        let letters = outbox.dead_letters().drain();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 2);
        assert_eq!(letters[0].origin, DEAD_LETTER_ORIGIN);
    }

    #[tokio::test]
    async fn rejected_entry_is_dead_lettered_immediately() {
        let store = Arc::new(InMemoryStore::new());
        let outbox = processor(&store, OutboxConfig::default());
        let rejecting = Arc::new(FlakyRecipient::<AccountEvent>::rejecting("r", 1));
        outbox.register_recipient(rejecting.clone()).unwrap();
        outbox
            .enqueue(&envelopes(vec![deposited(1), deposited(2)]))
            .await
            .unwrap();

        let report = outbox.drain().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(rejecting.versions(), vec![Version::new(2)]);
        assert_eq!(outbox.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn entries_without_recipient_are_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let writer = processor(&store, OutboxConfig::default());
        writer
            .register_recipient(Arc::new(RecordingRecipient::<AccountEvent>::new("gone")))
            .unwrap();
        writer.enqueue(&envelopes(vec![deposited(1)])).await.unwrap();

        let reader = processor(&store, OutboxConfig::default());
        assert_eq!(reader.load().await.unwrap(), 1);
        let report = reader.drain().await.unwrap();
        assert_eq!(report.misrouted, 1);
        assert_eq!(reader.pending_len(), 0);
    }

    #[tokio::test]
    async fn outbox_survives_reload() {
        let store = Arc::new(InMemoryStore::new());
        let first = processor(&store, OutboxConfig::default());
        let broken = Arc::new(FlakyRecipient::<AccountEvent>::always_failing("r"));
        first.register_recipient(broken).unwrap();
        first
            .enqueue(&envelopes(vec![deposited(1), deposited(2)]))
            .await
            .unwrap();
        first.drain().await.unwrap();

        let second = processor(&store, OutboxConfig::default());
        let recording = Arc::new(RecordingRecipient::<AccountEvent>::new("r"));
        second.register_recipient(recording.clone()).unwrap();
        assert_eq!(second.load().await.unwrap(), 2);
        assert_eq!(second.pending()[0].attempts, 1);

        second.drain().await.unwrap();
        assert_eq!(recording.versions(), vec![Version::new(1), Version::new(2)]);
    }

    #[tokio::test]
    async fn trigger_arms_timer_and_drain_disarms_it() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = ManualScheduler::new();
        let outbox = Arc::new(processor(&store, OutboxConfig::default()));
        let recipient = Arc::new(RecordingRecipient::<AccountEvent>::new("r"));
        outbox.register_recipient(recipient.clone()).unwrap();
        outbox.attach_timer(&scheduler);

        let name = format!("outbox:{}", owner());
        assert!(!scheduler.is_armed(&name));

        outbox.enqueue(&envelopes(vec![deposited(1)])).await.unwrap();
        outbox.trigger();
        assert!(scheduler.is_armed(&name));

        assert!(scheduler.fire(&name).await);
        assert!(!scheduler.is_armed(&name));
        assert_eq!(recipient.versions(), vec![Version::new(1)]);
    }

    #[tokio::test]
    async fn failed_persist_keeps_entries_in_memory() {
        let store = Arc::new(InMemoryStore::new());
        let outbox = processor(&store, OutboxConfig::default());
        outbox
            .register_recipient(Arc::new(RecordingRecipient::<AccountEvent>::new("r")))
            .unwrap();

        store.fail_outbox_saves(true);
        assert!(matches!(
            outbox.enqueue(&envelopes(vec![deposited(1)])).await,
            Err(OutboxError::Storage(_))
        ));
        assert_eq!(outbox.pending_len(), 1);
        assert_eq!(
            outbox.pending_version_for(&RecipientKey::new("r")),
            Some(Version::new(1))
        );
    }

    #[tokio::test]
    async fn versions_already_queued_are_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let outbox = processor(&store, OutboxConfig::default());
        let recipient = Arc::new(RecordingRecipient::<AccountEvent>::new("r"));
        outbox.register_recipient(recipient.clone()).unwrap();

        outbox
            .enqueue(&envelopes(vec![deposited(1), deposited(2)]))
            .await
            .unwrap();
        let created = outbox
            .enqueue(&envelopes(vec![deposited(1), deposited(2), deposited(3)]))
            .await
            .unwrap();
        assert_eq!(created, 1);
        assert_eq!(outbox.enqueued_through(), Version::new(3));

        outbox.drain().await.unwrap();
        assert_eq!(
            recipient.versions(),
            vec![Version::new(1), Version::new(2), Version::new(3)]
        );
    }

    #[tokio::test]
    async fn high_water_mark_is_persisted_without_recipients() {
        let store = Arc::new(InMemoryStore::new());
        let first = processor(&store, OutboxConfig::default());
        assert_eq!(first.enqueue(&envelopes(vec![deposited(1)])).await.unwrap(), 0);
        assert!(store.has_outbox(&owner()));

        let second = processor(&store, OutboxConfig::default());
        assert_eq!(second.load().await.unwrap(), 0);
        assert_eq!(second.enqueued_through(), Version::new(1));
        assert_eq!(second.durable_through(), Version::new(1));
    }

    #[tokio::test]
    async fn ensure_durable_retries_a_failed_persist() {
        let store = Arc::new(InMemoryStore::new());
        let outbox = processor(&store, OutboxConfig::default());
        outbox
            .register_recipient(Arc::new(RecordingRecipient::<AccountEvent>::new("r")))
            .unwrap();

        store.fail_outbox_saves(true);
        assert!(outbox.enqueue(&envelopes(vec![deposited(1)])).await.is_err());
        assert_eq!(outbox.enqueued_through(), Version::new(1));
        assert_eq!(outbox.durable_through(), Version::INITIAL);
        assert!(outbox.ensure_durable().await.is_err());

        store.fail_outbox_saves(false);
        outbox.ensure_durable().await.unwrap();
        assert_eq!(outbox.durable_through(), Version::new(1));

        let reloaded = processor(&store, OutboxConfig::default());
        assert_eq!(reloaded.load().await.unwrap(), 1);
    }
}
