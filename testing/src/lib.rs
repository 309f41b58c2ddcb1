//! # Eventide Testing
//!
//! Testing utilities for the Eventide runtime.
//!
//! This crate provides:
//! - [`InMemoryStore`]: journal, snapshot and outbox storage in one object
//! - [`ManualScheduler`]: timers that fire only when a test says so
//! - Outbox recipients and projections that record or fail on demand
//! - The [`bank`] fixture aggregate with proptest strategies
//! - A fixed clock for deterministic envelope timestamps
//!
//! ## Example
//!
//! ```
//! use eventide_core::environment::Clock;
//! use eventide_testing::{InMemoryStore, test_clock};
//!
//! let store = InMemoryStore::new();
//! assert!(store.owners().is_empty());
//! assert_eq!(test_clock().now(), test_clock().now());
//! ```

use chrono::{DateTime, Utc};
use eventide_core::environment::Clock;

pub mod bank;
pub mod projection_mocks;
pub mod recipients;
pub mod scheduler;
pub mod store;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use eventide_testing::mocks::FixedClock;
    /// use eventide_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a `tracing` subscriber that writes to the test harness.
///
/// Respects `RUST_LOG`. Safe to call from every test; only the first call
/// installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
pub use projection_mocks::{InMemoryProjectionStore, RecordingProjection};
pub use recipients::{FlakyRecipient, RecordingRecipient};
pub use scheduler::{ManualScheduler, ManualTimer};
pub use store::InMemoryStore;
