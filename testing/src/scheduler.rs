//! Hand-driven timer scheduler.
//!
//! [`ManualScheduler`] never fires on its own. Tests inspect which timers are
//! armed and fire them explicitly, which makes periodic confirmation and outbox
//! wake-ups deterministic.

use eventide_core::timer::{Timer, TimerCallback, TimerHandle, TimerScheduler};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
struct Schedule {
    due: Option<Duration>,
    period: Option<Duration>,
    generation: u64,
}

/// A timer created by [`ManualScheduler`].
pub struct ManualTimer {
    name: String,
    callback: TimerCallback,
    schedule: Mutex<Schedule>,
    generations: AtomicU64,
    cancelled: AtomicBool,
    fired: AtomicUsize,
}

impl ManualTimer {
    /// Name given at scheduling time.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current due time; `None` means disabled.
    #[must_use]
    pub fn due(&self) -> Option<Duration> {
        self.current().due
    }

    /// Current period.
    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        self.current().period
    }

    /// True if the timer would fire on [`ManualScheduler::fire`].
    #[must_use]
    pub fn is_armed(&self) -> bool {
        !self.is_cancelled() && self.due().is_some()
    }

    /// How many times the callback ran.
    #[must_use]
    pub fn fire_count(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }

    /// Run the callback once if armed. Returns whether it ran.
    ///
    /// Afterwards the timer is re-armed with its period, unless the callback
    /// rescheduled it, in which case the new schedule stands.
    pub async fn fire(&self) -> bool {
        if !self.is_armed() {
            return false;
        }
        let before = self.current().generation;
        (self.callback)().await;
        self.fired.fetch_add(1, Ordering::SeqCst);

        let mut schedule = self.schedule.lock().unwrap_or_else(PoisonError::into_inner);
        if schedule.generation == before {
            schedule.due = schedule.period;
        }
        true
    }

    fn current(&self) -> Schedule {
        *self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Timer for ManualTimer {
    fn reschedule(&self, due: Option<Duration>, period: Option<Duration>) {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        *self.schedule.lock().unwrap_or_else(PoisonError::into_inner) = Schedule {
            due,
            period,
            generation,
        };
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualTimer")
            .field("name", &self.name)
            .field("schedule", &self.current())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Scheduler whose timers only fire when a test says so.
///
/// # Example
///
/// ```
/// use eventide_core::timer::{TimerScheduler, timer_callback};
/// use eventide_testing::ManualScheduler;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let scheduler = ManualScheduler::new();
/// let _handle = scheduler.schedule("tick", timer_callback(|| async {}), Some(Duration::ZERO), None);
///
/// assert!(scheduler.fire("tick").await);
/// assert!(!scheduler.fire("tick").await); // one-shot
/// # });
/// ```
#[derive(Debug, Default)]
pub struct ManualScheduler {
    timers: Mutex<Vec<Arc<ManualTimer>>>,
}

impl ManualScheduler {
    /// Create a scheduler with no timers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently scheduled, non-cancelled timer called `name`.
    #[must_use]
    pub fn timer(&self, name: &str) -> Option<Arc<ManualTimer>> {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|t| t.name == name && !t.is_cancelled())
            .cloned()
    }

    /// Names of all live timers, in scheduling order.
    #[must_use]
    pub fn timer_names(&self) -> Vec<String> {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| !t.is_cancelled())
            .map(|t| t.name.clone())
            .collect()
    }

    /// True if a live timer called `name` is armed.
    #[must_use]
    pub fn is_armed(&self, name: &str) -> bool {
        self.timer(name).is_some_and(|t| t.is_armed())
    }

    /// Fire the timer called `name` once if it is armed.
    pub async fn fire(&self, name: &str) -> bool {
        match self.timer(name) {
            Some(timer) => timer.fire().await,
            None => false,
        }
    }

    /// Fire every armed timer once, in scheduling order. Returns how many ran.
    pub async fn fire_all(&self) -> usize {
        let timers: Vec<_> = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut fired = 0;
        for timer in timers {
            if timer.fire().await {
                fired += 1;
            }
        }
        fired
    }
}

impl TimerScheduler for ManualScheduler {
    fn schedule(
        &self,
        name: &str,
        callback: TimerCallback,
        due: Option<Duration>,
        period: Option<Duration>,
    ) -> TimerHandle {
        let timer = Arc::new(ManualTimer {
            name: name.to_string(),
            callback,
            schedule: Mutex::new(Schedule {
                due,
                period,
                generation: 0,
            }),
            generations: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            fired: AtomicUsize::new(0),
        });
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&timer));
        timer
    }
}
