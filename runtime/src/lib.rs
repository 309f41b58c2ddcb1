//! # Eventide Runtime
//!
//! Runtime implementation of the Eventide event-sourcing contracts.
//!
//! This crate turns the traits in `eventide-core` into a working aggregate
//! host: a dual-view event log, an ordered handler registry, an at-least-once
//! outbox and a tokio timer scheduler, tied together by
//! [`AggregateController`].
//!
//! ## Core Components
//!
//! - **Event log**: tentative and confirmed views, hydration, snapshots
//! - **Handler registry**: typed and untyped callbacks run before an event is applied
//! - **Outbox**: per-recipient FIFO delivery with retry and dead letters
//! - **Timers**: [`TokioScheduler`] for production, a manual scheduler in
//!   `eventide-testing` for tests
//! - **Controller**: one activated aggregate instance
//!
//! ## Example
//!
//! ```
//! use eventide_runtime::{AggregateController, TokioScheduler};
//! use eventide_testing::InMemoryStore;
//! use eventide_testing::bank::{BankAccount, deposited};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let account = AggregateController::<BankAccount>::builder("acc-7")
//!     .store(Arc::new(InMemoryStore::new()))
//!     .scheduler(Arc::new(TokioScheduler::try_current().unwrap()))
//!     .activate()
//!     .await
//!     .unwrap();
//!
//! let version = account.raise(deposited(25)).await.unwrap();
//! assert_eq!(version.value(), 1);
//!
//! account.deactivate().await.unwrap();
//! # }
//! ```

/// Runtime configuration
pub mod config;

/// Aggregate controller
pub mod controller;

/// Bounded dead letter queue
pub mod dead_letter;

/// Dual-view event log
pub mod event_log;

/// Ordered event handler registry
pub mod handlers;

/// Prometheus metrics for observability
pub mod metrics;

/// At-least-once outbox delivery
pub mod outbox;

/// Retry logic with exponential backoff
pub mod retry;

/// Tokio timer scheduler
pub mod timer;

pub use config::{EventHandlerOptions, OutboxConfig, PersistPolicy};
pub use controller::{
    AggregateController, AggregateControllerBuilder, ControllerError, DeactivationReport,
    FlushReport,
};
pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use event_log::{EventLog, EventLogError, SnapshotOutcome, SnapshotReport};
pub use handlers::{EventHandlerRegistry, HandlerReport};
pub use metrics::{MetricsError, MetricsServer};
pub use outbox::{DrainReport, OutboxError, OutboxProcessor};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use timer::{TokioScheduler, TokioTimer};
