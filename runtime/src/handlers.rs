//! Ordered registry of typed and untyped event handlers.
//!
//! Handlers run once per raised event, before the event reaches the log.
//! For an event of type `T`:
//!
//! 1. typed handlers registered for exactly `T`, in registration order
//! 2. every untyped handler, in registration order
//!
//! Typed matching compares [`Event::event_type`] names; there is no supertype
//! matching.
//!
//! # Example
//!
//! ```
//! use eventide_core::handler::HandlerError;
//! use eventide_runtime::config::EventHandlerOptions;
//! use eventide_runtime::handlers::EventHandlerRegistry;
//! use eventide_testing::bank::{AccountEvent, Deposited, deposited};
//!
//! # tokio_test::block_on(async {
//! let registry = EventHandlerRegistry::<AccountEvent>::new();
//! registry.register_typed(|d: &Deposited| {
//!     let amount = d.amount;
//!     async move {
//!         if amount == 0 { Err(HandlerError::failed("empty deposit")) } else { Ok(()) }
//!     }
//! });
//! registry.register(|_event: &AccountEvent| async { Ok(()) });
//!
//! let report = registry
//!     .process(&deposited(10), &EventHandlerOptions::default())
//!     .await
//!     .unwrap();
//! assert_eq!(report.invoked, 2);
//! # });
//! ```

use crate::config::EventHandlerOptions;
use crate::metrics::HandlerMetrics;
use eventide_core::event::{Event, EventVariant};
use eventide_core::handler::{HandlerError, HandlerFuture, HandlerResult};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

type BoxedHandler<E> = Arc<dyn Fn(&E) -> HandlerFuture + Send + Sync>;

/// One registered handler.
pub struct HandlerRegistration<E> {
    handler: BoxedHandler<E>,
    event_type: Option<&'static str>,
    order: u64,
}

impl<E> HandlerRegistration<E> {
    /// Event type this handler is bound to; `None` for untyped handlers.
    #[must_use]
    pub const fn event_type(&self) -> Option<&'static str> {
        self.event_type
    }

    /// Position in the global registration sequence.
    #[must_use]
    pub const fn order(&self) -> u64 {
        self.order
    }

    /// Start the handler on `event`.
    pub fn call(&self, event: &E) -> HandlerFuture {
        (self.handler)(event)
    }
}

impl<E> Clone for HandlerRegistration<E> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            event_type: self.event_type,
            order: self.order,
        }
    }
}

impl<E> std::fmt::Debug for HandlerRegistration<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("event_type", &self.event_type)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// What [`EventHandlerRegistry::process`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandlerReport {
    /// Handlers started.
    pub invoked: usize,
    /// Failures swallowed under the default policy.
    pub failures: Vec<HandlerError>,
}

struct Registrations<E> {
    typed: Vec<HandlerRegistration<E>>,
    untyped: Vec<HandlerRegistration<E>>,
    next_order: u64,
}

impl<E> Default for Registrations<E> {
    fn default() -> Self {
        Self {
            typed: Vec::new(),
            untyped: Vec::new(),
            next_order: 0,
        }
    }
}

/// Thread-safe, append-only handler registry for events of type `E`.
pub struct EventHandlerRegistry<E> {
    registrations: RwLock<Registrations<E>>,
}

impl<E: Event> EventHandlerRegistry<E> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Registrations::default()),
        }
    }

    /// Register a handler for one event variant.
    ///
    /// The handler only sees events whose type equals `T::EVENT_TYPE`.
    pub fn register_typed<T, F, Fut>(&self, handler: F)
    where
        T: EventVariant<E>,
        F: Fn(&T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let boxed: BoxedHandler<E> =
            Arc::new(move |event: &E| -> HandlerFuture {
                match T::from_event(event) {
                    Some(payload) => Box::pin(handler(payload)),
                    None => Box::pin(async { Ok(()) }),
                }
            });
        let mut registrations = self.write();
        let order = registrations.next_order;
        registrations.next_order += 1;
        registrations.typed.push(HandlerRegistration {
            handler: boxed,
            event_type: Some(T::EVENT_TYPE),
            order,
        });
        tracing::debug!(event_type = T::EVENT_TYPE, order, "Registered typed event handler");
    }

    /// Register a handler for every event.
    pub fn register<F, Fut>(&self, handler: F)
    where
        F: Fn(&E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let boxed: BoxedHandler<E> =
            Arc::new(move |event: &E| -> HandlerFuture { Box::pin(handler(event)) });
        let mut registrations = self.write();
        let order = registrations.next_order;
        registrations.next_order += 1;
        registrations.untyped.push(HandlerRegistration {
            handler: boxed,
            event_type: None,
            order,
        });
        tracing::debug!(order, "Registered untyped event handler");
    }

    /// Handlers to run for `event_type`, in execution order.
    #[must_use]
    pub fn handlers_for_event(&self, event_type: &str) -> Vec<HandlerRegistration<E>> {
        let registrations = self.read();
        registrations
            .typed
            .iter()
            .filter(|r| r.event_type == Some(event_type))
            .chain(registrations.untyped.iter())
            .cloned()
            .collect()
    }

    /// Remove every handler and reset the ordering counter.
    pub fn clear(&self) {
        *self.write() = Registrations::default();
    }

    /// Total registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        let registrations = self.read();
        registrations.typed.len() + registrations.untyped.len()
    }

    /// Registered typed handlers.
    #[must_use]
    pub fn typed_count(&self) -> usize {
        self.read().typed.len()
    }

    /// Registered untyped handlers.
    #[must_use]
    pub fn untyped_count(&self) -> usize {
        self.read().untyped.len()
    }

    /// Run the handlers for `event` one after another.
    ///
    /// A handler exceeding `max_handler_execution_time` is cancelled and counts
    /// as failed.
    ///
    /// # Errors
    ///
    /// With `fail_fast_on_handler_error`, the first failure is returned and the
    /// remaining handlers do not run. Otherwise failures are collected in the
    /// report and never returned.
    pub async fn process(
        &self,
        event: &E,
        options: &EventHandlerOptions,
    ) -> Result<HandlerReport, HandlerError> {
        let event_type = event.event_type();
        let handlers = self.handlers_for_event(event_type);
        let mut report = HandlerReport::default();

        for registration in handlers {
            report.invoked += 1;
            if options.log_handler_execution {
                tracing::debug!(
                    event_type,
                    order = registration.order,
                    typed = registration.event_type.is_some(),
                    "Running event handler"
                );
            }

            let future = registration.call(event);
            let result = match options.max_handler_execution_time {
                Some(limit) => tokio::time::timeout(limit, future)
                    .await
                    .unwrap_or_else(|_| {
                        Err(HandlerError::TimedOut {
                            event_type: event_type.to_string(),
                            limit,
                        })
                    }),
                None => future.await,
            };

            if let Err(error) = result {
                HandlerMetrics::record_failure(event_type);
                if options.log_handler_errors {
                    tracing::warn!(
                        event_type,
                        order = registration.order,
                        error = %error,
                        fail_fast = options.fail_fast_on_handler_error,
                        "Event handler failed"
                    );
                }
                if options.fail_fast_on_handler_error {
                    return Err(error);
                }
                report.failures.push(error);
            }
        }

        Ok(report)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registrations<E>> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registrations<E>> {
        self.registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Event> Default for EventHandlerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> std::fmt::Debug for EventHandlerRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlerRegistry")
            .field("typed", &self.typed_count())
            .field("untyped", &self.untyped_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use eventide_testing::bank::{AccountEvent, Deposited, Withdrawn, deposited, withdrawn};
    use std::sync::Mutex;
    use std::time::Duration;

    type Trace = Arc<Mutex<Vec<&'static str>>>;

    fn tracer(trace: &Trace, label: &'static str) -> impl Fn() -> std::future::Ready<HandlerResult> + use<> {
        let trace = Arc::clone(trace);
        move || {
            trace.lock().unwrap().push(label);
            std::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn typed_handlers_run_in_order_then_untyped() {
        let registry = EventHandlerRegistry::<AccountEvent>::new();
        let trace: Trace = Arc::default();

        let u1 = tracer(&trace, "u1");
        registry.register(move |_: &AccountEvent| u1());
        for label in ["a", "b", "c"] {
            let t = tracer(&trace, label);
            registry.register_typed(move |_: &Deposited| t());
        }
        let w = tracer(&trace, "w");
        registry.register_typed(move |_: &Withdrawn| w());
        let u2 = tracer(&trace, "u2");
        registry.register(move |_: &AccountEvent| u2());

        registry
            .process(&deposited(1), &EventHandlerOptions::default())
            .await
            .unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["a", "b", "c", "u1", "u2"]);

        trace.lock().unwrap().clear();
        registry
            .process(&withdrawn(1), &EventHandlerOptions::default())
            .await
            .unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["w", "u1", "u2"]);
    }

    #[test]
    fn handlers_for_event_matches_exact_type() {
        let registry = EventHandlerRegistry::<AccountEvent>::new();
        registry.register_typed(|_: &Deposited| async { Ok(()) });
        registry.register(|_: &AccountEvent| async { Ok(()) });

        let for_deposit = registry.handlers_for_event(Deposited::EVENT_TYPE);
        assert_eq!(for_deposit.len(), 2);
        assert_eq!(for_deposit[0].event_type(), Some(Deposited::EVENT_TYPE));
        assert_eq!(for_deposit[1].event_type(), None);

        assert_eq!(registry.handlers_for_event("Unknown.v1").len(), 1);
        assert_eq!(registry.handler_count(), 2);
        assert_eq!(registry.typed_count(), 1);
        assert_eq!(registry.untyped_count(), 1);
    }

    #[test]
    fn clear_resets_ordering() {
        let registry = EventHandlerRegistry::<AccountEvent>::new();
        registry.register(|_: &AccountEvent| async { Ok(()) });
        registry.register(|_: &AccountEvent| async { Ok(()) });
        registry.clear();
        assert_eq!(registry.handler_count(), 0);

        registry.register(|_: &AccountEvent| async { Ok(()) });
        assert_eq!(registry.handlers_for_event("x")[0].order(), 0);
    }

    #[tokio::test]
    async fn failures_are_swallowed_by_default() {
        let registry = EventHandlerRegistry::<AccountEvent>::new();
        let trace: Trace = Arc::default();
        registry.register(|_: &AccountEvent| async { Err(HandlerError::failed("boom")) });
        let after = tracer(&trace, "after");
        registry.register(move |_: &AccountEvent| after());

        let report = registry
            .process(&deposited(1), &EventHandlerOptions::default())
            .await
            .unwrap();
        assert_eq!(report.invoked, 2);
        assert_eq!(report.failures, vec![HandlerError::failed("boom")]);
        assert_eq!(*trace.lock().unwrap(), vec!["after"]);
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_failure() {
        let registry = EventHandlerRegistry::<AccountEvent>::new();
        let trace: Trace = Arc::default();
        registry.register(|_: &AccountEvent| async { Err(HandlerError::failed("boom")) });
        let after = tracer(&trace, "after");
        registry.register(move |_: &AccountEvent| after());

        let options = EventHandlerOptions::default().with_fail_fast(true);
        let err = registry.process(&deposited(1), &options).await.unwrap_err();
        assert_eq!(err, HandlerError::failed("boom"));
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let registry = EventHandlerRegistry::<AccountEvent>::new();
        registry.register(|_: &AccountEvent| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });

        let options = EventHandlerOptions::default()
            .with_max_execution_time(Some(Duration::from_millis(100)))
            .with_fail_fast(true);
        let err = registry.process(&deposited(1), &options).await.unwrap_err();
        assert!(matches!(err, HandlerError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn typed_handler_sees_payload() {
        let registry = EventHandlerRegistry::<AccountEvent>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.register_typed(move |d: &Deposited| {
            sink.lock().unwrap().push(d.amount);
            async { Ok(()) }
        });

        let options = EventHandlerOptions::default();
        registry.process(&deposited(7), &options).await.unwrap();
        registry.process(&withdrawn(3), &options).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }
}
