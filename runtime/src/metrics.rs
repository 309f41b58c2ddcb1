//! Prometheus metrics for the event-sourcing runtime.
//!
//! Every component records through the `metrics` facade; nothing is exported
//! until a recorder is installed. [`MetricsServer`] installs a Prometheus
//! recorder and describes all runtime metrics:
//!
//! - Event log: raised, confirmed, snapshots, truncation
//! - Handlers: failures
//! - Outbox: delivered, failed, pending, dead-lettered
//! - Projections: dispatched, dropped, failed, processing time
//!
//! # Example
//!
//! ```rust,no_run
//! use eventide_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder.
///
/// The address is where the host is expected to serve [`MetricsServer::render`]
/// output; the server itself only installs the recorder.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// An already-installed recorder (common in tests) is not an error; the
    /// server then has no handle of its own.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Address the metrics endpoint is meant to be served on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Event log
    describe_counter!("eventide_events_raised_total", "Events raised (tentatively applied)");
    describe_counter!("eventide_events_confirmed_total", "Events confirmed as durable");
    describe_counter!("eventide_snapshots_written_total", "Snapshots written");
    describe_counter!("eventide_events_truncated_total", "Journal entries removed after a snapshot");

    // Handlers
    describe_counter!("eventide_handler_failures_total", "Event handler failures and timeouts");

    // Outbox
    describe_counter!("eventide_outbox_delivered_total", "Outbox entries delivered");
    describe_counter!("eventide_outbox_failed_total", "Failed outbox delivery attempts");
    describe_gauge!("eventide_outbox_pending", "Outbox entries waiting for delivery");
    describe_counter!("eventide_outbox_dead_lettered_total", "Outbox entries moved to the dead letter queue");

    // Projections
    describe_counter!("eventide_projection_dispatched_total", "Projection work items queued");
    describe_counter!("eventide_projection_dropped_total", "Projection work items dropped on a full queue");
    describe_counter!("eventide_projection_failed_total", "Projection work items that failed permanently");
    describe_histogram!("eventide_projection_duration_seconds", "Time taken to apply one projection work item");

    // Dead letter queue
    describe_gauge!("dlq.size", "Entries in the dead letter queue");
    describe_counter!("dlq.pushed", "Entries pushed to the dead letter queue");
    describe_counter!("dlq.dropped", "Entries evicted from a full dead letter queue");
    describe_counter!("dlq.drained", "Entries drained from the dead letter queue");
}

/// Event log metrics recorder.
pub struct EventLogMetrics;

impl EventLogMetrics {
    /// Record events applied to the tentative view.
    pub fn record_raised(count: usize) {
        counter!("eventide_events_raised_total").increment(count as u64);
    }

    /// Record events confirmed.
    pub fn record_confirmed(count: u64) {
        counter!("eventide_events_confirmed_total").increment(count);
    }

    /// Record a snapshot write.
    pub fn record_snapshot() {
        counter!("eventide_snapshots_written_total").increment(1);
    }

    /// Record journal truncation.
    pub fn record_truncated(count: u64) {
        counter!("eventide_events_truncated_total").increment(count);
    }
}

/// Handler metrics recorder.
pub struct HandlerMetrics;

impl HandlerMetrics {
    /// Record a handler failure or timeout.
    pub fn record_failure(event_type: &'static str) {
        counter!("eventide_handler_failures_total", "event_type" => event_type).increment(1);
    }
}

/// Outbox metrics recorder.
pub struct OutboxMetrics;

impl OutboxMetrics {
    /// Record a successful delivery.
    pub fn record_delivered() {
        counter!("eventide_outbox_delivered_total").increment(1);
    }

    /// Record a failed delivery attempt.
    pub fn record_failed() {
        counter!("eventide_outbox_failed_total").increment(1);
    }

    /// Record an entry given up on.
    pub fn record_dead_lettered() {
        counter!("eventide_outbox_dead_lettered_total").increment(1);
    }

    /// Record the current queue length.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_pending(len: usize) {
        gauge!("eventide_outbox_pending").set(len as f64);
    }
}

/// Projection metrics recorder.
pub struct ProjectionMetrics;

impl ProjectionMetrics {
    /// Record a queued work item.
    pub fn record_dispatched(projection: &str) {
        counter!("eventide_projection_dispatched_total", "projection" => projection.to_string())
            .increment(1);
    }

    /// Record a work item dropped on a full queue.
    pub fn record_dropped(projection: &str) {
        counter!("eventide_projection_dropped_total", "projection" => projection.to_string())
            .increment(1);
    }

    /// Record a permanently failed work item.
    pub fn record_failed(projection: &str) {
        counter!("eventide_projection_failed_total", "projection" => projection.to_string())
            .increment(1);
    }

    /// Record time spent applying one work item (all attempts).
    pub fn record_duration(projection: &str, duration: Duration) {
        histogram!("eventide_projection_duration_seconds", "projection" => projection.to_string())
            .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn server_starts_without_handle() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn start_tolerates_existing_recorder() {
        let mut first = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        let mut second = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(first.start().is_ok());
        assert!(second.start().is_ok());
    }

    #[test]
    fn render_contains_recorded_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        EventLogMetrics::record_raised(2);
        OutboxMetrics::record_delivered();
        ProjectionMetrics::record_duration("balances", Duration::from_millis(5));

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("eventide_events_raised_total"));
            assert!(rendered.contains("eventide_outbox_delivered_total"));
        }
    }
}
