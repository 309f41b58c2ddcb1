//! Bounded, retrying projection dispatcher.
//!
//! # Flow
//!
//! 1. `dispatch` looks up the projections interested in the event type and
//!    queues one [`WorkItem`] per projection with `try_send`. A full queue
//!    drops the item with a warning: back-pressure is lossy.
//! 2. A single worker task pulls up to `batch_size` items at a time and
//!    applies them concurrently, each behind a permit from a shared
//!    `Semaphore` sized by `max_concurrency`.
//! 3. Every application is time-boxed by `processing_timeout` and retried
//!    per the options. Items that exhaust their retries go to the dead letter
//!    queue, or are discarded when it is disabled.
//! 4. Every item's fate is published as a [`DispatchOutcome`] on a broadcast
//!    channel.
//!
//! # Shutdown
//!
//! [`ProjectionDispatcher::shutdown`] stops intake, lets the worker finish
//! every item already queued and waits for it.

use crate::options::{OptionsError, ProjectionOptions};
use crate::registry::ProjectionRegistry;
use chrono::{DateTime, Utc};
use eventide_core::environment::{Clock, SystemClock};
use eventide_core::event::Event;
use eventide_core::projection::{DispatchReceipt, ProjectionError, ProjectionSink};
use eventide_core::stream::{StreamId, Version};
use eventide_runtime::dead_letter::DeadLetterQueue;
use eventide_runtime::metrics::ProjectionMetrics;
use eventide_runtime::retry::{RetryPolicy, retry_counted};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Dead letters kept before the oldest is dropped.
const DEAD_LETTER_CAPACITY: usize = 1000;

/// Outcomes buffered per subscriber.
const OUTCOME_CAPACITY: usize = 1024;

/// One event on its way to one projection.
#[derive(Debug, Clone)]
pub struct WorkItem<E> {
    /// Target projection name.
    pub projection: String,
    /// Aggregate that raised the event.
    pub owner: StreamId,
    /// Version of the event in its owner's log.
    pub version: Version,
    /// The event.
    pub event: E,
    /// When the item was queued.
    pub queued_at: DateTime<Utc>,
}

/// What happened to a work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The projection applied the event.
    Applied {
        /// Projection name.
        projection: String,
        /// Event owner.
        owner: StreamId,
        /// Event version.
        version: Version,
        /// Attempts it took, including the first.
        attempts: u32,
    },
    /// Retries were exhausted; the item is in the dead letter queue.
    DeadLettered {
        /// Projection name.
        projection: String,
        /// Event owner.
        owner: StreamId,
        /// Event version.
        version: Version,
        /// The last error.
        error: String,
    },
    /// Retries were exhausted with the dead letter queue disabled, or the
    /// projection was unregistered before the item ran.
    Discarded {
        /// Projection name.
        projection: String,
        /// Event owner.
        owner: StreamId,
        /// Event version.
        version: Version,
        /// Why the item was discarded.
        reason: String,
    },
    /// The queue was full or closed; the item never ran.
    Dropped {
        /// Projection name.
        projection: String,
        /// Event owner.
        owner: StreamId,
        /// Event version.
        version: Version,
    },
}

impl DispatchOutcome {
    /// Projection the item was meant for.
    #[must_use]
    pub fn projection(&self) -> &str {
        match self {
            Self::Applied { projection, .. }
            | Self::DeadLettered { projection, .. }
            | Self::Discarded { projection, .. }
            | Self::Dropped { projection, .. } => projection,
        }
    }

    /// True for [`DispatchOutcome::Applied`].
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Fans raised events out to registered projections.
///
/// Created with [`ProjectionDispatcher::start`], which spawns the worker on
/// the current tokio runtime.
pub struct ProjectionDispatcher<E> {
    registry: Arc<ProjectionRegistry<E>>,
    options: ProjectionOptions,
    sender: mpsc::Sender<WorkItem<E>>,
    outcomes: broadcast::Sender<DispatchOutcome>,
    dead_letters: DeadLetterQueue<WorkItem<E>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    clock: Arc<dyn Clock>,
}

impl<E> ProjectionDispatcher<E>
where
    E: Event + Clone,
{
    /// Validate `options` and spawn the worker.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] if an option is out of range.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(
        registry: Arc<ProjectionRegistry<E>>,
        options: ProjectionOptions,
    ) -> Result<Arc<Self>, OptionsError> {
        Self::start_with_clock(registry, options, Arc::new(SystemClock))
    }

    /// As [`ProjectionDispatcher::start`], stamping `queued_at` and dead
    /// letters from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] if an option is out of range.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start_with_clock(
        registry: Arc<ProjectionRegistry<E>>,
        options: ProjectionOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, OptionsError> {
        options.validate()?;

        let (sender, receiver) = mpsc::channel(options.max_queue_size);
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let dead_letters =
            DeadLetterQueue::new(DEAD_LETTER_CAPACITY).with_clock(Arc::clone(&clock));

        let worker = Worker {
            registry: Arc::clone(&registry),
            receiver,
            semaphore: Arc::new(Semaphore::new(options.max_concurrency)),
            retry: options.retry_policy(),
            options: options.clone(),
            outcomes: outcomes.clone(),
            dead_letters: dead_letters.clone(),
        };
        let handle = tokio::spawn(worker.run(shutdown_rx));

        tracing::info!(
            max_concurrency = options.max_concurrency,
            max_queue_size = options.max_queue_size,
            batch_size = options.batch_size,
            "Projection dispatcher started"
        );

        Ok(Arc::new(Self {
            registry,
            options,
            sender,
            outcomes,
            dead_letters,
            shutdown,
            worker: Mutex::new(Some(handle)),
            clock,
        }))
    }

    /// Observe the outcome of every work item from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.outcomes.subscribe()
    }

    /// Items queued and not yet picked up by the worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Items that exhausted their retries.
    #[must_use]
    pub const fn dead_letters(&self) -> &DeadLetterQueue<WorkItem<E>> {
        &self.dead_letters
    }

    /// The registry this dispatcher routes with.
    #[must_use]
    pub fn registry(&self) -> &Arc<ProjectionRegistry<E>> {
        &self.registry
    }

    /// The validated options.
    #[must_use]
    pub const fn options(&self) -> &ProjectionOptions {
        &self.options
    }

    /// Stop accepting work, finish everything queued and wait for the worker.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::error!(error = %error, "Projection worker panicked");
            }
            tracing::info!("Projection dispatcher stopped");
        }
    }

    fn publish(&self, outcome: DispatchOutcome) {
        let _ = self.outcomes.send(outcome);
    }
}

impl<E> ProjectionSink<E> for ProjectionDispatcher<E>
where
    E: Event + Clone,
{
    fn dispatch(&self, owner: &StreamId, version: Version, event: &E) -> DispatchReceipt {
        let mut receipt = DispatchReceipt::default();
        for projection in self.registry.projections_for_event_type(event.event_type()) {
            let item = WorkItem {
                projection,
                owner: owner.clone(),
                version,
                event: event.clone(),
                queued_at: self.clock.now(),
            };
            match self.sender.try_send(item) {
                Ok(()) => receipt.queued += 1,
                Err(TrySendError::Full(item) | TrySendError::Closed(item)) => {
                    receipt.dropped += 1;
                    ProjectionMetrics::record_dropped(&item.projection);
                    tracing::warn!(
                        projection = %item.projection,
                        owner = %item.owner,
                        version = item.version.value(),
                        event_type = event.event_type(),
                        "Projection queue is full, dropping event"
                    );
                    self.publish(DispatchOutcome::Dropped {
                        projection: item.projection,
                        owner: item.owner,
                        version: item.version,
                    });
                }
            }
        }
        if receipt.queued > 0 {
            tracing::debug!(
                owner = %owner,
                version = version.value(),
                queued = receipt.queued,
                "Queued projection work"
            );
        }
        receipt
    }
}

impl<E: 'static> std::fmt::Debug for ProjectionDispatcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionDispatcher")
            .field("options", &self.options)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

struct Worker<E> {
    registry: Arc<ProjectionRegistry<E>>,
    receiver: mpsc::Receiver<WorkItem<E>>,
    semaphore: Arc<Semaphore>,
    retry: RetryPolicy,
    options: ProjectionOptions,
    outcomes: broadcast::Sender<DispatchOutcome>,
    dead_letters: DeadLetterQueue<WorkItem<E>>,
}

impl<E> Worker<E>
where
    E: Event + Clone,
{
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut stopping = false;
        loop {
            let first = if stopping {
                self.receiver.recv().await
            } else {
                tokio::select! {
                    item = self.receiver.recv() => item,
                    _ = shutdown.wait_for(|stop| *stop) => {
                        // no new items; the queued ones are still processed
                        self.receiver.close();
                        stopping = true;
                        continue;
                    }
                }
            };
            let Some(first) = first else {
                break;
            };

            let mut batch = Vec::with_capacity(self.options.batch_size);
            batch.push(first);
            while batch.len() < self.options.batch_size {
                match self.receiver.try_recv() {
                    Ok(item) => batch.push(item),
                    Err(_) => break,
                }
            }

            tracing::trace!(size = batch.len(), "Processing projection batch");
            futures::future::join_all(batch.into_iter().map(|item| self.process(item))).await;
        }
        tracing::debug!("Projection worker stopped");
    }

    async fn process(&self, item: WorkItem<E>) {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return;
        };

        let Some(projection) = self.registry.projection(&item.projection) else {
            tracing::warn!(
                projection = %item.projection,
                "Projection is no longer registered, discarding work item"
            );
            self.publish(DispatchOutcome::Discarded {
                reason: format!("projection {} is not registered", item.projection),
                projection: item.projection,
                owner: item.owner,
                version: item.version,
            });
            return;
        };

        let started = Instant::now();
        let limit = self.options.processing_timeout;
        let result = retry_counted(
            &self.retry,
            || async {
                tokio::time::timeout(
                    limit,
                    projection.apply_event(&item.owner, item.version, &item.event),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(ProjectionError::TimedOut {
                        projection: item.projection.clone(),
                        limit,
                    })
                })
            },
            |_| true,
        )
        .await;
        ProjectionMetrics::record_duration(&item.projection, started.elapsed());

        match result {
            Ok(done) => {
                ProjectionMetrics::record_dispatched(&item.projection);
                tracing::debug!(
                    projection = %item.projection,
                    owner = %item.owner,
                    version = item.version.value(),
                    attempts = done.attempts,
                    "Projection applied event"
                );
                self.publish(DispatchOutcome::Applied {
                    projection: item.projection,
                    owner: item.owner,
                    version: item.version,
                    attempts: done.attempts,
                });
            }
            Err(failed) => {
                ProjectionMetrics::record_failed(&item.projection);
                let error = failed.value.to_string();
                tracing::error!(
                    projection = %item.projection,
                    owner = %item.owner,
                    version = item.version.value(),
                    attempts = failed.attempts,
                    error = %error,
                    "Projection failed after retries"
                );
                if self.options.enable_dead_letter_queue {
                    let outcome = DispatchOutcome::DeadLettered {
                        projection: item.projection.clone(),
                        owner: item.owner.clone(),
                        version: item.version,
                        error: error.clone(),
                    };
                    let origin = format!("projection:{}", item.projection);
                    self.dead_letters.push(item, origin, error, failed.attempts);
                    self.publish(outcome);
                } else {
                    self.publish(DispatchOutcome::Discarded {
                        projection: item.projection,
                        owner: item.owner,
                        version: item.version,
                        reason: error,
                    });
                }
            }
        }
    }

    fn publish(&self, outcome: DispatchOutcome) {
        let _ = self.outcomes.send(outcome);
    }
}
