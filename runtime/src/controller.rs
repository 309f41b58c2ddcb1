//! Aggregate controller: one activated aggregate instance.
//!
//! The controller ties the pieces together for a single owner:
//!
//! ```text
//! raise(event)
//!   │ 1. event handlers (typed, then untyped)
//!   │ 2. EventLog::submit            (tentative view)
//!   │ 3. ProjectionSink::dispatch    (fire and forget)
//!   └ 4. SaveOnRaise: flush
//!
//! flush
//!   │ 1. EventLog::wait_for_confirmation (journal append)
//!   │ 2. OutboxProcessor::enqueue        (one entry per recipient per
//!   │                                     confirmed event)
//!   │ 3. snapshot strategy
//!   └ 4. OutboxProcessor::trigger        (zero-delay drain)
//! ```
//!
//! With [`PersistPolicy::Periodic`] the flush is done by a timer instead and
//! `raise` returns as soon as the event is tentatively applied.
//!
//! Recipients only ever see confirmed events. On activation, confirmed events
//! newer than the outbox's stored high-water mark are requeued from the
//! journal, so an outbox write lost to a crash is made up for.
//!
//! # Single writer
//!
//! The host guarantees one caller per aggregate at a time. The event log sits
//! behind an async mutex so timer-driven flushes and callers do not interleave
//! inside a confirmation.
//!
//! # Example
//!
//! ```
//! use eventide_runtime::controller::AggregateController;
//! use eventide_testing::InMemoryStore;
//! use eventide_testing::bank::{BankAccount, deposited, withdrawn};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let account = AggregateController::<BankAccount>::builder("acc-1")
//!     .store(Arc::new(InMemoryStore::new()))
//!     .activate()
//!     .await
//!     .unwrap();
//!
//! account.raise(deposited(100)).await.unwrap();
//! account.raise(withdrawn(40)).await.unwrap();
//!
//! assert_eq!(account.confirmed(|a| a.balance).await, 60);
//! # });
//! ```

use crate::config::{EventHandlerOptions, OutboxConfig, PersistPolicy};
use crate::dead_letter::DeadLetterQueue;
use crate::event_log::{EventLog, EventLogError, SnapshotReport};
use crate::handlers::EventHandlerRegistry;
use crate::outbox::{DrainReport, OutboxError, OutboxProcessor};
use eventide_core::aggregate::Aggregate;
use eventide_core::environment::Clock;
use eventide_core::event::{EventEnvelope, EventVariant};
use eventide_core::handler::{HandlerError, HandlerResult};
use eventide_core::outbox::{OutboxEnvelope, OutboxRecipient, RecipientKey};
use eventide_core::projection::ProjectionSink;
use eventide_core::serializer::{BincodeSerializer, StateSerializer};
use eventide_core::snapshot::{NeverSnapshot, SnapshotStrategy};
use eventide_core::storage::{EventJournal, OutboxStore, SnapshotStore};
use eventide_core::stream::{StreamId, Version};
use eventide_core::timer::{TimerHandle, TimerScheduler, timer_callback};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Errors from controller operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// An event handler failed under the fail-fast policy. Nothing was raised.
    #[error("Event handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// The event log failed.
    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    /// The outbox failed.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// The controller has been deactivated.
    #[error("Aggregate {0} is not activated")]
    NotActivated(StreamId),

    /// The controller is already active.
    #[error("Aggregate {0} is already activated")]
    AlreadyActivated(StreamId),

    /// Two recipients share a key.
    #[error("Recipient {0} is registered twice")]
    DuplicateRecipient(RecipientKey),

    /// The builder is missing something it needs.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result of [`AggregateController::flush`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Events confirmed by this flush.
    pub confirmed: u64,
    /// Snapshot taken on the strategy's advice, if any.
    pub snapshot: Option<SnapshotReport>,
}

/// Result of [`AggregateController::deactivate`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeactivationReport {
    /// The final outbox drain.
    pub drain: DrainReport,
    /// The final flush.
    pub flush: FlushReport,
}

/// Builder for [`AggregateController`].
pub struct AggregateControllerBuilder<A: Aggregate, S: StateSerializer = BincodeSerializer> {
    id: StreamId,
    journal: Option<Arc<dyn EventJournal>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    outbox_store: Option<Arc<dyn OutboxStore>>,
    scheduler: Option<Arc<dyn TimerScheduler>>,
    clock: Option<Arc<dyn Clock>>,
    serializer: S,
    persist_policy: PersistPolicy,
    handler_options: EventHandlerOptions,
    snapshot_strategy: Arc<dyn SnapshotStrategy<A>>,
    recipients: Vec<Arc<dyn OutboxRecipient<A::Event>>>,
    projections: Option<Arc<dyn ProjectionSink<A::Event>>>,
    outbox_config: OutboxConfig,
}

impl<A: Aggregate, S: StateSerializer> AggregateControllerBuilder<A, S> {
    /// Event journal.
    #[must_use]
    pub fn journal(mut self, journal: Arc<dyn EventJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Snapshot store.
    #[must_use]
    pub fn snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Outbox store.
    #[must_use]
    pub fn outbox_store(mut self, store: Arc<dyn OutboxStore>) -> Self {
        self.outbox_store = Some(store);
        self
    }

    /// Use one object as journal, snapshot store and outbox store.
    #[must_use]
    pub fn store<T>(mut self, store: Arc<T>) -> Self
    where
        T: EventJournal + SnapshotStore + OutboxStore + 'static,
    {
        self.journal = Some(store.clone());
        self.snapshots = Some(store.clone());
        self.outbox_store = Some(store);
        self
    }

    /// Timer scheduler for outbox wake-ups and periodic confirmation.
    ///
    /// Without one the outbox is drained only by [`AggregateController::drain_outbox`]
    /// and [`AggregateController::deactivate`].
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn TimerScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Clock for envelope and dead letter timestamps.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// State serializer for snapshots and confirmation copies.
    #[must_use]
    pub fn serializer<S2: StateSerializer>(self, serializer: S2) -> AggregateControllerBuilder<A, S2> {
        AggregateControllerBuilder {
            id: self.id,
            journal: self.journal,
            snapshots: self.snapshots,
            outbox_store: self.outbox_store,
            scheduler: self.scheduler,
            clock: self.clock,
            serializer,
            persist_policy: self.persist_policy,
            handler_options: self.handler_options,
            snapshot_strategy: self.snapshot_strategy,
            recipients: self.recipients,
            projections: self.projections,
            outbox_config: self.outbox_config,
        }
    }

    /// When raised events get confirmed.
    #[must_use]
    pub const fn persist_policy(mut self, policy: PersistPolicy) -> Self {
        self.persist_policy = policy.normalized();
        self
    }

    /// Handler failure and timeout policy.
    #[must_use]
    pub const fn handler_options(mut self, options: EventHandlerOptions) -> Self {
        self.handler_options = options;
        self
    }

    /// Snapshot policy consulted after every flush.
    #[must_use]
    pub fn snapshot_strategy(mut self, strategy: impl SnapshotStrategy<A>) -> Self {
        self.snapshot_strategy = Arc::new(strategy);
        self
    }

    /// Add an outbox recipient.
    #[must_use]
    pub fn recipient(mut self, recipient: Arc<dyn OutboxRecipient<A::Event>>) -> Self {
        self.recipients.push(recipient);
        self
    }

    /// Projection fan-out.
    #[must_use]
    pub fn projections(mut self, sink: Arc<dyn ProjectionSink<A::Event>>) -> Self {
        self.projections = Some(sink);
        self
    }

    /// Outbox retry and dead-letter settings.
    #[must_use]
    pub const fn outbox_config(mut self, config: OutboxConfig) -> Self {
        self.outbox_config = config;
        self
    }

    /// Hydrate the aggregate, restore its outbox and arm its timers.
    ///
    /// # Errors
    ///
    /// - `Configuration` if a store is missing, or `Periodic` persistence has
    ///   no scheduler
    /// - `DuplicateRecipient` if two recipients share a key
    /// - `EventLog` / `Outbox` if loading from storage fails
    pub async fn activate(self) -> Result<Arc<AggregateController<A, S>>, ControllerError> {
        let journal = self
            .journal
            .ok_or_else(|| ControllerError::Configuration("no event journal configured".into()))?;
        let snapshots = self
            .snapshots
            .ok_or_else(|| ControllerError::Configuration("no snapshot store configured".into()))?;
        let outbox_store = self
            .outbox_store
            .ok_or_else(|| ControllerError::Configuration("no outbox store configured".into()))?;
        if matches!(self.persist_policy, PersistPolicy::Periodic(_)) && self.scheduler.is_none() {
            return Err(ControllerError::Configuration(
                "periodic persistence needs a timer scheduler".into(),
            ));
        }

        let mut log = EventLog::<A>::new(self.id.clone(), journal, snapshots)
            .with_serializer(self.serializer);
        let mut outbox = OutboxProcessor::new(self.id.clone(), outbox_store, self.outbox_config);
        if let Some(clock) = self.clock {
            log = log.with_clock(Arc::clone(&clock));
            outbox = outbox.with_clock(clock);
        }
        let outbox = Arc::new(outbox);
        for recipient in self.recipients {
            outbox.register_recipient(recipient).map_err(|e| match e {
                OutboxError::DuplicateRecipient(key) => ControllerError::DuplicateRecipient(key),
                other => ControllerError::Outbox(other),
            })?;
        }

        let controller = Arc::new(AggregateController {
            id: self.id,
            log: tokio::sync::Mutex::new(log),
            handlers: EventHandlerRegistry::new(),
            handler_options: self.handler_options,
            outbox,
            projections: self.projections,
            snapshot_strategy: self.snapshot_strategy,
            persist_policy: self.persist_policy,
            scheduler: self.scheduler,
            save_timer: Mutex::new(None),
            active: AtomicBool::new(false),
        });
        controller.start().await?;
        Ok(controller)
    }
}

/// An activated aggregate instance.
pub struct AggregateController<A: Aggregate, S: StateSerializer = BincodeSerializer> {
    id: StreamId,
    log: tokio::sync::Mutex<EventLog<A, S>>,
    handlers: EventHandlerRegistry<A::Event>,
    handler_options: EventHandlerOptions,
    outbox: Arc<OutboxProcessor<A::Event>>,
    projections: Option<Arc<dyn ProjectionSink<A::Event>>>,
    snapshot_strategy: Arc<dyn SnapshotStrategy<A>>,
    persist_policy: PersistPolicy,
    scheduler: Option<Arc<dyn TimerScheduler>>,
    save_timer: Mutex<Option<TimerHandle>>,
    active: AtomicBool,
}

impl<A: Aggregate> AggregateController<A, BincodeSerializer> {
    /// Start building a controller for the aggregate with key `key`.
    ///
    /// The owner id is `"{A::AGGREGATE_TYPE}/{key}"`.
    #[must_use]
    pub fn builder(key: impl Display) -> AggregateControllerBuilder<A, BincodeSerializer> {
        AggregateControllerBuilder {
            id: StreamId::for_aggregate(A::AGGREGATE_TYPE, key),
            journal: None,
            snapshots: None,
            outbox_store: None,
            scheduler: None,
            clock: None,
            serializer: BincodeSerializer,
            persist_policy: PersistPolicy::default(),
            handler_options: EventHandlerOptions::default(),
            snapshot_strategy: Arc::new(NeverSnapshot),
            recipients: Vec::new(),
            projections: None,
            outbox_config: OutboxConfig::default(),
        }
    }
}

impl<A: Aggregate, S: StateSerializer> AggregateController<A, S> {
    /// Raise one event.
    ///
    /// Returns the event's version. Under `SaveOnRaise` the event is durable
    /// when this returns.
    ///
    /// # Errors
    ///
    /// - `NotActivated` after [`AggregateController::deactivate`]
    /// - `Handler` if a handler fails under the fail-fast policy (nothing is
    ///   raised)
    /// - `EventLog` if the aggregate rejects the event, or confirmation fails
    ///   (the event stays tentative and nothing is queued for recipients)
    /// - `Outbox` if the event was confirmed but its outbox entries could not
    ///   be stored; they are delivered from memory, persisted by the next
    ///   flush, or requeued from the journal on the next activation
    pub async fn raise(&self, event: A::Event) -> Result<Version, ControllerError> {
        self.raise_all(vec![event]).await
    }

    /// Raise several events, all or nothing.
    ///
    /// Handlers run for every event before any of them is applied. Returns the
    /// version of the last event.
    ///
    /// # Errors
    ///
    /// As [`AggregateController::raise`].
    pub async fn raise_all(&self, events: Vec<A::Event>) -> Result<Version, ControllerError> {
        self.ensure_active()?;
        for event in &events {
            self.handlers.process(event, &self.handler_options).await?;
        }

        let mut log = self.log.lock().await;
        let before = log.unconfirmed().len();
        let version = log.submit_all(events)?;
        let raised = log.unconfirmed().len() - before;
        if raised == 0 {
            return Ok(version);
        }

        if let Some(sink) = &self.projections {
            for envelope in &log.unconfirmed()[before..] {
                sink.dispatch(&self.id, envelope.version, &envelope.event);
            }
        }

        if self.persist_policy.saves_on_raise() {
            let flushed = self.flush_locked(&mut log).await;
            drop(log);
            self.wake_outbox();
            flushed?;
        }

        tracing::debug!(
            owner = %self.id,
            raised,
            version = version.value(),
            "Events raised"
        );
        Ok(version)
    }

    /// Confirm pending events without consulting the snapshot strategy.
    ///
    /// Newly confirmed events are queued for recipients.
    ///
    /// # Errors
    ///
    /// `NotActivated`, `EventLog`, or `Outbox` if the confirmed events' outbox
    /// entries could not be stored.
    pub async fn wait_for_confirmation(&self) -> Result<u64, ControllerError> {
        self.ensure_active()?;
        let confirmed = {
            let mut log = self.log.lock().await;
            self.confirm_locked(&mut log).await
        };
        self.wake_outbox();
        confirmed
    }

    /// Confirm pending events, queue them for recipients, then snapshot if the
    /// strategy says so.
    ///
    /// # Errors
    ///
    /// `NotActivated`, `EventLog` or `Outbox`. No snapshot is taken unless the
    /// outbox entries were stored.
    pub async fn flush(&self) -> Result<FlushReport, ControllerError> {
        self.ensure_active()?;
        let flushed = {
            let mut log = self.log.lock().await;
            self.flush_locked(&mut log).await
        };
        self.wake_outbox();
        flushed
    }

    /// Snapshot the confirmed state now.
    ///
    /// Truncation waits until every queued outbox entry is stored, so the
    /// journal never loses an event the outbox could still need.
    ///
    /// # Errors
    ///
    /// `NotActivated`, `EventLog`, or `Outbox` when truncating with outbox
    /// entries that cannot be stored.
    pub async fn snapshot(&self, truncate: bool) -> Result<SnapshotReport, ControllerError> {
        self.ensure_active()?;
        let mut log = self.log.lock().await;
        if truncate {
            self.outbox.ensure_durable().await?;
        }
        Ok(log.snapshot(truncate).await?)
    }

    /// Drain the outbox now.
    ///
    /// # Errors
    ///
    /// `Outbox` if the outbox cannot be persisted.
    pub async fn drain_outbox(&self) -> Result<DrainReport, ControllerError> {
        Ok(self.outbox.drain().await?)
    }

    /// Read the tentative view.
    pub async fn tentative<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(self.log.lock().await.tentative_view())
    }

    /// Read the confirmed view.
    pub async fn confirmed<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(self.log.lock().await.confirmed_view())
    }

    /// Version of the tentative view.
    pub async fn tentative_version(&self) -> Version {
        self.log.lock().await.tentative_version()
    }

    /// Version of the confirmed view.
    pub async fn confirmed_version(&self) -> Version {
        self.log.lock().await.confirmed_version()
    }

    /// Every event still in the journal, oldest first.
    ///
    /// # Errors
    ///
    /// `EventLog` if the journal cannot be read.
    pub async fn events(&self) -> Result<Vec<EventEnvelope<A::Event>>, ControllerError> {
        Ok(self.log.lock().await.read_confirmed_log().await?)
    }

    /// Register a handler for one event variant.
    pub fn register_typed_handler<T, F, Fut>(&self, handler: F)
    where
        T: EventVariant<A::Event>,
        F: Fn(&T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.register_typed(handler);
    }

    /// Register a handler for every event.
    pub fn register_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(&A::Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.register(handler);
    }

    /// Registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.handler_count()
    }

    /// Outbox entries waiting for delivery.
    #[must_use]
    pub fn pending_outbox(&self) -> usize {
        self.outbox.pending_len()
    }

    /// Outbox entries given up on.
    #[must_use]
    pub fn outbox_dead_letters(&self) -> &DeadLetterQueue<OutboxEnvelope<A::Event>> {
        self.outbox.dead_letters()
    }

    /// Owner id.
    #[must_use]
    pub const fn id(&self) -> &StreamId {
        &self.id
    }

    /// Configured persistence policy.
    #[must_use]
    pub const fn persist_policy(&self) -> PersistPolicy {
        self.persist_policy
    }

    /// True between activation and deactivation.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Tear down: final flush, final outbox drain, cancel timers, clear
    /// handlers.
    ///
    /// New raises are refused from the start of teardown.
    ///
    /// Teardown completes even if the drain or flush fails; the first failure
    /// is then returned.
    ///
    /// # Errors
    ///
    /// `NotActivated` if already deactivated, otherwise `EventLog` or `Outbox`.
    pub async fn deactivate(&self) -> Result<DeactivationReport, ControllerError> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Err(ControllerError::NotActivated(self.id.clone()));
        }

        let flush = {
            let mut log = self.log.lock().await;
            self.flush_locked(&mut log).await
        };
        let drain = self.outbox.drain().await;

        if let Some(timer) = self.lock_save_timer().take() {
            timer.cancel();
        }
        self.outbox.cancel_timer();
        self.handlers.clear();

        let report = DeactivationReport {
            drain: drain?,
            flush: flush?,
        };
        tracing::info!(
            owner = %self.id,
            delivered = report.drain.delivered,
            confirmed = report.flush.confirmed,
            pending_outbox = self.outbox.pending_len(),
            "Aggregate deactivated"
        );
        Ok(report)
    }

    /// Activate again after [`AggregateController::deactivate`], reloading
    /// state from storage.
    ///
    /// # Errors
    ///
    /// `AlreadyActivated` if active, otherwise as activation.
    pub async fn reactivate(self: &Arc<Self>) -> Result<(), ControllerError> {
        if self.is_active() {
            return Err(ControllerError::AlreadyActivated(self.id.clone()));
        }
        self.log.lock().await.reset();
        self.start().await
    }

    async fn start(self: &Arc<Self>) -> Result<(), ControllerError> {
        let version = {
            let mut log = self.log.lock().await;
            log.hydrate().await?;
            log.confirmed_version()
        };
        let restored = self.outbox.load().await? + self.recover_outbox(version).await?;

        if let Some(scheduler) = &self.scheduler {
            self.outbox.attach_timer(scheduler.as_ref());
            if let PersistPolicy::Periodic(interval) = self.persist_policy {
                let weak = Arc::downgrade(self);
                let callback = timer_callback(move || {
                    let weak = weak.clone();
                    async move {
                        let Some(controller) = weak.upgrade() else {
                            return;
                        };
                        if !controller.is_active() {
                            return;
                        }
                        if let Err(error) = controller.flush().await {
                            tracing::error!(owner = %controller.id, error = %error, "Periodic flush failed");
                        }
                    }
                });
                let handle = scheduler.schedule(
                    &format!("save:{}", self.id),
                    callback,
                    Some(interval),
                    Some(interval),
                );
                if let Some(previous) = self.lock_save_timer().replace(handle) {
                    previous.cancel();
                }
            }
        }

        self.active.store(true, Ordering::SeqCst);
        if restored > 0 {
            self.outbox.trigger();
        }
        tracing::info!(
            owner = %self.id,
            version = version.value(),
            restored_outbox = restored,
            policy = ?self.persist_policy,
            "Aggregate activated"
        );
        Ok(())
    }

    /// Queue outbox entries for confirmed events the stored outbox never
    /// recorded.
    async fn recover_outbox(&self, confirmed: Version) -> Result<usize, ControllerError> {
        let through = self.outbox.enqueued_through();
        if confirmed <= through {
            return Ok(0);
        }
        let missed = self.log.lock().await.read_confirmed_after(through).await?;
        let created = self.outbox.enqueue(&missed).await?;
        tracing::warn!(
            owner = %self.id,
            from = through.value(),
            to = confirmed.value(),
            created,
            "Requeued outbox entries from the journal"
        );
        Ok(created)
    }

    async fn confirm_locked(&self, log: &mut EventLog<A, S>) -> Result<u64, ControllerError> {
        let tail: Vec<EventEnvelope<A::Event>> = log.unconfirmed().to_vec();
        let confirmed = log.wait_for_confirmation().await?;
        self.outbox.enqueue(&tail).await?;
        Ok(confirmed)
    }

    async fn flush_locked(&self, log: &mut EventLog<A, S>) -> Result<FlushReport, ControllerError> {
        let confirmed = self.confirm_locked(log).await?;
        let mut report = FlushReport {
            confirmed,
            snapshot: None,
        };
        if confirmed == 0 {
            return Ok(report);
        }
        let decision = self
            .snapshot_strategy
            .should_snapshot(log.confirmed_view(), log.confirmed_version());
        if decision.should_snapshot {
            report.snapshot = Some(log.snapshot(decision.should_truncate).await?);
        }
        Ok(report)
    }

    fn wake_outbox(&self) {
        if self.outbox.pending_len() > 0 {
            self.outbox.trigger();
        }
    }

    fn ensure_active(&self) -> Result<(), ControllerError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ControllerError::NotActivated(self.id.clone()))
        }
    }

    fn lock_save_timer(&self) -> std::sync::MutexGuard<'_, Option<TimerHandle>> {
        self.save_timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: Aggregate, S: StateSerializer> std::fmt::Debug for AggregateController<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateController")
            .field("id", &self.id)
            .field("persist_policy", &self.persist_policy)
            .field("active", &self.is_active())
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}
