//! Runtime configuration.
//!
//! Plain structs with `Default` values and `with_*` builders; nothing here
//! reads files or environment variables.
//!
//! # Example
//!
//! ```
//! use eventide_runtime::config::{EventHandlerOptions, OutboxConfig, PersistPolicy};
//! use std::time::Duration;
//!
//! let handlers = EventHandlerOptions::default()
//!     .with_fail_fast(true)
//!     .with_max_execution_time(Some(Duration::from_millis(250)));
//!
//! let outbox = OutboxConfig::default().with_max_delivery_attempts(Some(5));
//!
//! assert_eq!(PersistPolicy::periodic(Duration::ZERO), PersistPolicy::SaveOnRaise);
//! assert!(handlers.fail_fast_on_handler_error);
//! assert_eq!(outbox.max_delivery_attempts, Some(5));
//! ```

use std::time::Duration;

/// How event handlers run during `raise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandlerOptions {
    /// Abort the raise on the first handler failure instead of logging and
    /// continuing.
    pub fail_fast_on_handler_error: bool,
    /// Cancel a handler that runs longer than this and treat it as failed.
    pub max_handler_execution_time: Option<Duration>,
    /// Emit a debug line per handler invocation.
    pub log_handler_execution: bool,
    /// Emit a warning per handler failure.
    pub log_handler_errors: bool,
}

impl Default for EventHandlerOptions {
    fn default() -> Self {
        Self {
            fail_fast_on_handler_error: false,
            max_handler_execution_time: None,
            log_handler_execution: true,
            log_handler_errors: true,
        }
    }
}

impl EventHandlerOptions {
    /// Set the failure policy.
    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast_on_handler_error = fail_fast;
        self
    }

    /// Set the per-handler execution budget.
    #[must_use]
    pub const fn with_max_execution_time(mut self, limit: Option<Duration>) -> Self {
        self.max_handler_execution_time = limit;
        self
    }

    /// Toggle per-invocation logging.
    #[must_use]
    pub const fn with_execution_logging(mut self, enabled: bool) -> Self {
        self.log_handler_execution = enabled;
        self
    }

    /// Toggle failure logging.
    #[must_use]
    pub const fn with_error_logging(mut self, enabled: bool) -> Self {
        self.log_handler_errors = enabled;
        self
    }
}

/// When tentative events become confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistPolicy {
    /// `raise` waits for confirmation before returning.
    #[default]
    SaveOnRaise,
    /// A timer confirms pending events at this interval; `raise` returns
    /// immediately.
    Periodic(Duration),
}

impl PersistPolicy {
    /// Periodic confirmation. A zero interval means [`PersistPolicy::SaveOnRaise`].
    #[must_use]
    pub const fn periodic(interval: Duration) -> Self {
        if interval.is_zero() {
            Self::SaveOnRaise
        } else {
            Self::Periodic(interval)
        }
    }

    /// Normalize a zero interval to [`PersistPolicy::SaveOnRaise`].
    #[must_use]
    pub const fn normalized(self) -> Self {
        match self {
            Self::Periodic(interval) => Self::periodic(interval),
            Self::SaveOnRaise => Self::SaveOnRaise,
        }
    }

    /// True if `raise` blocks on confirmation.
    #[must_use]
    pub const fn saves_on_raise(&self) -> bool {
        matches!(self.normalized(), Self::SaveOnRaise)
    }
}

/// Outbox delivery settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Dead-letter an entry after this many failed attempts. `None` retries
    /// forever.
    pub max_delivery_attempts: Option<u32>,
    /// Capacity of the outbox dead letter queue.
    pub dead_letter_capacity: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: None,
            dead_letter_capacity: 1000,
        }
    }
}

impl OutboxConfig {
    /// Set the poison-entry threshold.
    #[must_use]
    pub const fn with_max_delivery_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    /// Set the dead letter queue capacity.
    #[must_use]
    pub const fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_defaults_swallow_and_log() {
        let options = EventHandlerOptions::default();
        assert!(!options.fail_fast_on_handler_error);
        assert!(options.max_handler_execution_time.is_none());
        assert!(options.log_handler_execution);
        assert!(options.log_handler_errors);
    }

    #[test]
    fn zero_period_saves_on_raise() {
        assert!(PersistPolicy::Periodic(Duration::ZERO).saves_on_raise());
        assert_eq!(
            PersistPolicy::Periodic(Duration::ZERO).normalized(),
            PersistPolicy::SaveOnRaise
        );
        assert!(!PersistPolicy::periodic(Duration::from_secs(5)).saves_on_raise());
        assert!(PersistPolicy::default().saves_on_raise());
    }

    #[test]
    fn outbox_retries_forever_by_default() {
        let config = OutboxConfig::default();
        assert_eq!(config.max_delivery_attempts, None);
        assert_eq!(config.dead_letter_capacity, 1000);
    }
}
