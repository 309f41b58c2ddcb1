//! The aggregate contract.
//!
//! An aggregate is the domain state of one event-sourced entity. It changes
//! only by applying events; callers never mutate it directly.
//!
//! # Example
//!
//! ```
//! use eventide_core::aggregate::{Aggregate, ApplyError};
//! use eventide_core::event::Event;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum CounterEvent {
//!     Incremented,
//! }
//!
//! impl Event for CounterEvent {
//!     fn event_type(&self) -> &'static str {
//!         "Incremented.v1"
//!     }
//! }
//!
//! #[derive(Clone, Debug, Default, Serialize, Deserialize)]
//! struct Counter {
//!     value: u64,
//! }
//!
//! impl Aggregate for Counter {
//!     const AGGREGATE_TYPE: &'static str = "counter";
//!     type Event = CounterEvent;
//!
//!     fn apply(&mut self, event: &CounterEvent) -> Result<(), ApplyError> {
//!         match event {
//!             CounterEvent::Incremented => self.value += 1,
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let mut counter = Counter::default();
//! counter.apply(&CounterEvent::Incremented).unwrap();
//! assert_eq!(counter.value, 1);
//! ```

use crate::event::Event;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use thiserror::Error;

/// Why an aggregate could not apply an event.
///
/// During hydration this is fatal: a journal holding an event the aggregate
/// cannot apply is corrupt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The aggregate has no mutation for this event type.
    #[error("Unsupported event type: {0}")]
    UnsupportedEvent(String),

    /// The event is well-formed but contradicts the current state.
    #[error("Event rejected: {0}")]
    Rejected(String),
}

/// Domain state of an event-sourced entity.
///
/// Dispatch is closed-world: `apply` matches on the aggregate's event enum, so
/// adding a variant without handling it is a compile error rather than a
/// runtime lookup failure.
///
/// `Clone` produces the structurally independent copy used for the
/// confirmed view; `Serialize`/`DeserializeOwned` are used for snapshots.
pub trait Aggregate:
    Default + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable name of the aggregate type, used to scope stream ids.
    const AGGREGATE_TYPE: &'static str;

    /// The closed set of events this aggregate understands.
    type Event: Event + Clone + Debug + Serialize + DeserializeOwned;

    /// Apply one event to this state.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the event cannot be applied. Implementations
    /// must leave `self` unchanged when they return an error.
    fn apply(&mut self, event: &Self::Event) -> Result<(), ApplyError>;
}
