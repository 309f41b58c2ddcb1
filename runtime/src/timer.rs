//! Tokio-backed [`TimerScheduler`].
//!
//! Each timer is one spawned task sleeping until its due time. Rescheduling
//! goes through a `watch` channel, so a sleeping task picks up the new due time
//! immediately. Ticks never overlap: the next due time is computed after the
//! callback returns, and a reschedule made while the callback runs wins over
//! the period.

use eventide_core::timer::{Timer, TimerCallback, TimerHandle, TimerScheduler};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Schedule {
    due: Option<Duration>,
    period: Option<Duration>,
    generation: u64,
}

#[derive(Debug)]
struct Shared {
    schedule: watch::Sender<Schedule>,
    cancelled: AtomicBool,
    ticks: AtomicU64,
}

/// A timer running on a tokio task. Cancelled when the last handle is dropped.
#[derive(Debug)]
pub struct TokioTimer {
    name: String,
    shared: Arc<Shared>,
}

impl TokioTimer {
    /// Name given at scheduling time.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Completed callback runs.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::SeqCst)
    }
}

impl Timer for TokioTimer {
    fn reschedule(&self, due: Option<Duration>, period: Option<Duration>) {
        self.shared.schedule.send_modify(|schedule| {
            schedule.due = due;
            schedule.period = period;
            schedule.generation = schedule.generation.wrapping_add(1);
        });
    }

    fn cancel(&self) {
        if !self.shared.cancelled.swap(true, Ordering::SeqCst) {
            // wake the task so it notices
            self.shared.schedule.send_modify(|_| {});
            tracing::debug!(timer = %self.name, "Timer cancelled");
        }
    }

    fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Spawns one task per timer on a tokio runtime.
///
/// # Example
///
/// ```
/// use eventide_core::timer::{TimerScheduler, timer_callback};
/// use eventide_runtime::timer::TokioScheduler;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let scheduler = TokioScheduler::try_current().unwrap();
/// let fired = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&fired);
///
/// let _timer = scheduler.schedule(
///     "example",
///     timer_callback(move || {
///         let counter = Arc::clone(&counter);
///         async move { counter.fetch_add(1, Ordering::SeqCst); }
///     }),
///     Some(Duration::from_millis(1)),
///     None,
/// );
///
/// tokio::time::sleep(Duration::from_millis(50)).await;
/// assert_eq!(fired.load(Ordering::SeqCst), 1);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Spawn timers on the given runtime.
    #[must_use]
    pub const fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawn timers on the runtime this is called from.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime.
    pub fn try_current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::from_handle)
    }
}

impl TimerScheduler for TokioScheduler {
    fn schedule(
        &self,
        name: &str,
        callback: TimerCallback,
        due: Option<Duration>,
        period: Option<Duration>,
    ) -> TimerHandle {
        let (sender, _) = watch::channel(Schedule {
            due,
            period,
            generation: 0,
        });
        let shared = Arc::new(Shared {
            schedule: sender,
            cancelled: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        });
        self.handle
            .spawn(run(name.to_string(), Arc::clone(&shared), callback));
        tracing::debug!(timer = name, ?due, ?period, "Timer scheduled");
        Arc::new(TokioTimer {
            name: name.to_string(),
            shared,
        })
    }
}

async fn run(name: String, shared: Arc<Shared>, callback: TimerCallback) {
    let mut changes = shared.schedule.subscribe();
    loop {
        if shared.cancelled.load(Ordering::SeqCst) {
            break;
        }
        let current = *changes.borrow_and_update();

        let Some(due) = current.due else {
            if changes.changed().await.is_err() {
                break;
            }
            continue;
        };

        tokio::select! {
            () = tokio::time::sleep(due) => {}
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        if shared.cancelled.load(Ordering::SeqCst) {
            break;
        }
        tracing::trace!(timer = %name, "Timer fired");
        callback().await;
        shared.ticks.fetch_add(1, Ordering::SeqCst);

        shared.schedule.send_if_modified(|schedule| {
            if schedule.generation == current.generation {
                schedule.due = schedule.period;
                true
            } else {
                false
            }
        });
    }
    tracing::trace!(timer = %name, "Timer task stopped");
}
