//! Event handler result types.
//!
//! Handlers run before a raised event is appended to the log. Registration and
//! processing live in the runtime; this module only fixes what a handler
//! returns.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single event handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler reported an error.
    #[error("Handler failed: {0}")]
    Failed(String),

    /// The handler exceeded its execution budget and was cancelled.
    #[error("Handler for {event_type} timed out after {limit:?}")]
    TimedOut {
        /// Type name of the event being handled.
        event_type: String,
        /// The configured maximum execution time.
        limit: Duration,
    },
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::Failed`].
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// What a handler returns.
pub type HandlerResult = Result<(), HandlerError>;

/// Boxed handler future, as stored by the registry.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_display_names_event() {
        let err = HandlerError::TimedOut {
            event_type: "Deposited.v1".to_string(),
            limit: Duration::from_millis(50),
        };
        let display = err.to_string();
        assert!(display.contains("Deposited.v1"));
        assert!(display.contains("50ms"));
    }

    #[test]
    fn failed_constructor() {
        assert_eq!(
            HandlerError::failed("boom"),
            HandlerError::Failed("boom".to_string())
        );
    }
}
