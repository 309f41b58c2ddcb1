//! Dispatcher configuration.

use eventide_runtime::retry::RetryPolicy;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;

/// An option outside its allowed range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid projection option {field}: {value} is outside {allowed}")]
pub struct OptionsError {
    /// Name of the offending field.
    pub field: &'static str,
    /// The rejected value.
    pub value: String,
    /// The allowed range.
    pub allowed: String,
}

/// Settings for [`ProjectionDispatcher`](crate::ProjectionDispatcher).
///
/// # Default Configuration
///
/// - `max_concurrency`: 10 (1..=1000)
/// - `processing_timeout`: 30 s (1 s..=300 s)
/// - `max_retry_attempts`: 3 (0..=10)
/// - `retry_delay`: 1 s (100 ms..=60 s)
/// - `backoff_multiplier`: 1.0, a fixed delay (1.0..=10.0)
/// - `enable_dead_letter_queue`: true
/// - `max_queue_size`: 10 000 (100..=100 000)
/// - `batch_size`: 10 (1..=100)
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionOptions {
    /// Work items applied in parallel across all projections.
    pub max_concurrency: usize,
    /// Limit on a single `apply_event` call.
    pub processing_timeout: Duration,
    /// Retries after the first failed attempt.
    pub max_retry_attempts: u32,
    /// Delay before the first retry.
    pub retry_delay: Duration,
    /// Growth factor between retry delays.
    pub backoff_multiplier: f64,
    /// Keep permanently failed items for inspection instead of discarding them.
    pub enable_dead_letter_queue: bool,
    /// Capacity of the work queue. Items beyond it are dropped.
    pub max_queue_size: usize,
    /// Items pulled from the queue per worker iteration.
    pub batch_size: usize,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            processing_timeout: Duration::from_secs(30),
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            backoff_multiplier: 1.0,
            enable_dead_letter_queue: true,
            max_queue_size: 10_000,
            batch_size: 10,
        }
    }
}

impl ProjectionOptions {
    /// Set the parallelism limit.
    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the per-item timeout.
    #[must_use]
    pub const fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Set the retry count.
    #[must_use]
    pub const fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Set the first retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable the dead letter queue.
    #[must_use]
    pub const fn with_dead_letter_queue(mut self, enabled: bool) -> Self {
        self.enable_dead_letter_queue = enabled;
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub const fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Check every field against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first field found out of range.
    pub fn validate(&self) -> Result<(), OptionsError> {
        check("max_concurrency", self.max_concurrency, 1..=1000)?;
        check_duration(
            "processing_timeout",
            self.processing_timeout,
            Duration::from_secs(1)..=Duration::from_secs(300),
        )?;
        check("max_retry_attempts", self.max_retry_attempts, 0..=10)?;
        check_duration(
            "retry_delay",
            self.retry_delay,
            Duration::from_millis(100)..=Duration::from_secs(60),
        )?;
        if !(1.0..=10.0).contains(&self.backoff_multiplier) {
            return Err(OptionsError {
                field: "backoff_multiplier",
                value: self.backoff_multiplier.to_string(),
                allowed: "1..=10".to_string(),
            });
        }
        check("max_queue_size", self.max_queue_size, 100..=100_000)?;
        check("batch_size", self.batch_size, 1..=100)?;
        Ok(())
    }

    /// Retry policy equivalent to these options.
    ///
    /// Delays are capped at one minute.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.max_retry_attempts)
            .initial_delay(self.retry_delay)
            .max_delay(Duration::from_secs(60))
            .multiplier(self.backoff_multiplier)
            .build()
    }
}

fn check<T: PartialOrd + Display>(
    field: &'static str,
    value: T,
    allowed: RangeInclusive<T>,
) -> Result<(), OptionsError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(OptionsError {
            field,
            value: value.to_string(),
            allowed: format!("{}..={}", allowed.start(), allowed.end()),
        })
    }
}

fn check_duration(
    field: &'static str,
    value: Duration,
    allowed: RangeInclusive<Duration>,
) -> Result<(), OptionsError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(OptionsError {
            field,
            value: format!("{value:?}"),
            allowed: format!("{:?}..={:?}", allowed.start(), allowed.end()),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = ProjectionOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.max_concurrency, 10);
        assert_eq!(options.processing_timeout, Duration::from_secs(30));
        assert_eq!(options.max_retry_attempts, 3);
        assert_eq!(options.retry_delay, Duration::from_secs(1));
        assert!(options.enable_dead_letter_queue);
        assert_eq!(options.max_queue_size, 10_000);
        assert_eq!(options.batch_size, 10);
    }

    #[test]
    fn builders_override_fields() {
        let options = ProjectionOptions::default()
            .with_max_concurrency(20)
            .with_processing_timeout(Duration::from_secs(60))
            .with_max_retry_attempts(5)
            .with_retry_delay(Duration::from_secs(2))
            .with_dead_letter_queue(false)
            .with_max_queue_size(50_000)
            .with_batch_size(25);

        assert!(options.validate().is_ok());
        assert_eq!(options.max_concurrency, 20);
        assert_eq!(options.batch_size, 25);
        assert!(!options.enable_dead_letter_queue);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            (ProjectionOptions::default().with_max_concurrency(0), "max_concurrency"),
            (
                ProjectionOptions::default().with_processing_timeout(Duration::from_millis(10)),
                "processing_timeout",
            ),
            (ProjectionOptions::default().with_max_retry_attempts(11), "max_retry_attempts"),
            (
                ProjectionOptions::default().with_retry_delay(Duration::from_secs(61)),
                "retry_delay",
            ),
            (ProjectionOptions::default().with_backoff_multiplier(0.5), "backoff_multiplier"),
            (ProjectionOptions::default().with_max_queue_size(99), "max_queue_size"),
            (ProjectionOptions::default().with_batch_size(101), "batch_size"),
        ];
        for (options, field) in cases {
            assert_eq!(options.validate().unwrap_err().field, field);
        }
    }

    #[test]
    fn error_message_names_the_field() {
        let err = ProjectionOptions::default()
            .with_batch_size(0)
            .validate()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid projection option batch_size: 0 is outside 1..=100"
        );
    }

    #[test]
    fn retry_policy_mirrors_options() {
        let policy = ProjectionOptions::default()
            .with_max_retry_attempts(2)
            .with_retry_delay(Duration::from_millis(250))
            .retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
    }
}
