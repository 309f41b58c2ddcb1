//! # Eventide Core
//!
//! Core traits and types for the Eventide event-sourcing runtime.
//!
//! An *aggregate* keeps two views of its state: a **tentative** view updated as
//! soon as an event is raised, and a **confirmed** view that only advances once
//! the events are durable. Confirmed events flow to external recipients through
//! an at-least-once **outbox** and to read models through **projections**.
//!
//! This crate defines the contracts; `eventide-runtime` implements them.
//!
//! ## Core Concepts
//!
//! - **Aggregate**: domain state mutated only by applying events
//! - **Event**: an immutable fact with a stable runtime type name
//! - **Version**: 1-based position of an event in its owner's log (0 = empty)
//! - **Storage**: event journal, snapshot store and outbox store
//! - **Snapshot strategy**: pure policy deciding when to snapshot and truncate
//! - **Outbox recipient**: idempotent consumer of delivered events
//! - **Projection**: read-model updater fed by raised events
//! - **Timer scheduler**: the host's way of running callbacks later
//!
//! ## Example
//!
//! ```ignore
//! use eventide_core::aggregate::Aggregate;
//!
//! impl Aggregate for BankAccount {
//!     const AGGREGATE_TYPE: &'static str = "account";
//!     type Event = AccountEvent;
//!
//!     fn apply(&mut self, event: &AccountEvent) -> Result<(), ApplyError> {
//!         match event {
//!             AccountEvent::Deposited(d) => self.balance += d.amount,
//!             AccountEvent::Withdrawn(w) => self.balance -= w.amount,
//!         }
//!         Ok(())
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod event;
pub mod handler;
pub mod outbox;
pub mod projection;
pub mod serializer;
pub mod snapshot;
pub mod storage;
pub mod stream;
pub mod timer;

/// Environment module - host-supplied dependencies
///
/// Everything time-dependent reads the clock through [`environment::Clock`]
/// so envelopes get deterministic timestamps under test.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use eventide_core::environment::{Clock, SystemClock};
    ///
    /// let before = chrono::Utc::now();
    /// assert!(SystemClock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
