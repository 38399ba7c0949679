//! One-shot eviction timers.
//!
//! Cancellation is advisory: a timer whose task has already started may still
//! run to completion after [`TimerHandle::cancel`]. Every task handed to a
//! [`TimerScheduler`] must therefore be safe to run redundantly.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{trace, warn};

use crate::error::{Error, Result};

/// Work run when a timer fires.
pub type EvictionTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle to an armed timer.
pub trait TimerHandle: Send + Sync + fmt::Debug {
    /// Request cancellation. Has no effect once the task has started.
    fn cancel(&self);

    /// Whether the timer has fired, been cancelled, or otherwise completed.
    fn is_finished(&self) -> bool;
}

/// Arms one-shot timers.
pub trait TimerScheduler: Send + Sync {
    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: EvictionTask) -> Arc<dyn TimerHandle>;
}

// ============================================================================
// TokioTimerScheduler
// ============================================================================

/// Timers backed by the tokio runtime.
///
/// Each timer is a task that sleeps for its delay and then hands the eviction
/// to the blocking worker pool, so store calls never stall the async workers.
#[derive(Debug, Clone)]
pub struct TokioTimerScheduler {
    runtime: Handle,
}

impl TokioTimerScheduler {
    /// Schedule timers on the given runtime.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Schedule timers on the runtime of the calling context.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| Error::NoRuntime)
    }
}

#[derive(Debug)]
struct TokioTimer {
    abort: AbortHandle,
}

impl TimerHandle for TokioTimer {
    fn cancel(&self) {
        self.abort.abort();
    }

    fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

impl TimerScheduler for TokioTimerScheduler {
    fn schedule(&self, delay: Duration, task: EvictionTask) -> Arc<dyn TimerHandle> {
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                warn!(error = %e, "Eviction task did not complete");
            }
        });
        trace!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Eviction timer armed"
        );
        Arc::new(TokioTimer {
            abort: join.abort_handle(),
        })
    }
}

// ============================================================================
// ManualTimerScheduler
// ============================================================================

/// A timer scheduler driven by hand, for testing purposes.
///
/// Records every armed timer, counts schedule and cancel requests, and only
/// fires timers when asked to, either all at once or by advancing a virtual
/// clock.
#[derive(Debug, Default)]
pub struct ManualTimerScheduler {
    inner: Mutex<ManualInner>,
    cancels: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct ManualInner {
    elapsed: Duration,
    timers: Vec<ManualEntry>,
}

impl fmt::Debug for ManualInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualInner")
            .field("elapsed", &self.elapsed)
            .field("timers", &self.timers.len())
            .finish()
    }
}

struct ManualEntry {
    timer: Arc<ManualTimer>,
    due: Duration,
    task: Option<EvictionTask>,
}

/// A timer armed by [`ManualTimerScheduler`].
#[derive(Debug)]
pub struct ManualTimer {
    id: u64,
    delay: Duration,
    cancelled: AtomicBool,
    fired: AtomicBool,
    cancels: Arc<AtomicUsize>,
}

impl ManualTimer {
    /// Sequence number, unique per scheduler.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Delay the timer was armed with.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl TimerHandle for ManualTimer {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.is_cancelled() || self.fired.load(Ordering::SeqCst)
    }
}

impl ManualTimerScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers armed so far.
    pub fn schedule_count(&self) -> usize {
        self.inner.lock().timers.len()
    }

    /// Number of cancel requests made against any of this scheduler's timers.
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Delays of timers that have neither fired nor been cancelled.
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.inner
            .lock()
            .timers
            .iter()
            .filter(|e| e.task.is_some() && !e.timer.is_cancelled())
            .map(|e| e.timer.delay)
            .collect()
    }

    /// The most recently armed timer.
    pub fn last_timer(&self) -> Option<Arc<ManualTimer>> {
        self.inner.lock().timers.last().map(|e| Arc::clone(&e.timer))
    }

    /// Fire every pending, uncancelled timer regardless of its delay.
    pub fn fire_all(&self) -> usize {
        self.fire_where(|entry| !entry.timer.is_cancelled())
    }

    /// Fire every pending timer, including cancelled ones.
    ///
    /// Models timers that were already executing when cancellation arrived.
    pub fn fire_all_ignoring_cancellation(&self) -> usize {
        self.fire_where(|_| true)
    }

    /// Fire one timer by id, even if it was cancelled.
    ///
    /// Returns false if the timer is unknown or already fired.
    pub fn fire_timer(&self, id: u64) -> bool {
        self.fire_where(|entry| entry.timer.id == id) == 1
    }

    /// Advance the virtual clock and fire uncancelled timers that became due.
    pub fn advance(&self, by: Duration) -> usize {
        let now = {
            let mut inner = self.inner.lock();
            inner.elapsed += by;
            inner.elapsed
        };
        self.fire_where(|entry| !entry.timer.is_cancelled() && entry.due <= now)
    }

    fn fire_where(&self, predicate: impl Fn(&ManualEntry) -> bool) -> usize {
        // Tasks run outside the lock so they may arm new timers.
        let tasks: Vec<EvictionTask> = {
            let mut inner = self.inner.lock();
            inner
                .timers
                .iter_mut()
                .filter(|e| e.task.is_some() && predicate(&**e))
                .filter_map(|e| {
                    e.timer.fired.store(true, Ordering::SeqCst);
                    e.task.take()
                })
                .collect()
        };
        let fired = tasks.len();
        for task in tasks {
            task();
        }
        fired
    }
}

impl TimerScheduler for ManualTimerScheduler {
    fn schedule(&self, delay: Duration, task: EvictionTask) -> Arc<dyn TimerHandle> {
        let timer = Arc::new(ManualTimer {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            delay,
            cancelled: AtomicBool::new(false),
            fired: AtomicBool::new(false),
            cancels: Arc::clone(&self.cancels),
        });
        let mut inner = self.inner.lock();
        let due = inner.elapsed + delay;
        inner.timers.push(ManualEntry {
            timer: Arc::clone(&timer),
            due,
            task: Some(task),
        });
        timer
    }
}
