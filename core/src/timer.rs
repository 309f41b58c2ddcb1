//! Timer scheduling contract.
//!
//! The runtime never sleeps on its own. Periodic confirmation and outbox
//! wake-ups go through a [`TimerScheduler`] supplied by the host, so tests can
//! fire timers by hand.
//!
//! Delays are `Option<Duration>`: `None` means "never". A timer scheduled with
//! `due = None` is armed but disabled until rescheduled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Future produced by one timer tick.
pub type TimerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Callback invoked on every tick.
pub type TimerCallback = Arc<dyn Fn() -> TimerFuture + Send + Sync>;

/// Shared handle to a scheduled timer.
pub type TimerHandle = Arc<dyn Timer>;

/// Wrap an async closure as a [`TimerCallback`].
///
/// ```
/// use eventide_core::timer::timer_callback;
///
/// let callback = timer_callback(|| async {});
/// let _tick = callback();
/// ```
pub fn timer_callback<F, Fut>(f: F) -> TimerCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as TimerFuture)
}

/// A scheduled timer.
pub trait Timer: Send + Sync {
    /// Change when the timer fires next and how often it repeats afterwards.
    ///
    /// `due = None` disables the timer; `period = None` makes it one-shot.
    /// A tick already running is not interrupted.
    fn reschedule(&self, due: Option<Duration>, period: Option<Duration>);

    /// Stop the timer permanently.
    fn cancel(&self);

    /// True once [`Timer::cancel`] has been called.
    fn is_cancelled(&self) -> bool;
}

/// Creates timers.
pub trait TimerScheduler: Send + Sync {
    /// Schedule `callback` to run after `due`, then every `period`.
    ///
    /// Ticks of one timer never overlap: the next due time is computed after
    /// the callback completes.
    fn schedule(
        &self,
        name: &str,
        callback: TimerCallback,
        due: Option<Duration>,
        period: Option<Duration>,
    ) -> TimerHandle;
}
