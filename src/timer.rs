//! Hashed-wheel timer.
//!
//! One background driver task advances a cursor over a ring of slots, one
//! slot per tick. Scheduling pushes onto a pending queue that the driver
//! transfers into slots at the next tick, so `schedule` and `cancel` are
//! O(1) and never touch the wheel itself. Tasks whose delay exceeds one
//! revolution carry a rounds counter decremented on each pass.
//!
//! Callbacks run on the driver task and must be fast; anything slow or
//! async should hand off to its own task. Async consumers usually want
//! [`WheelTimer::sleep`], whose callback only completes a oneshot.
//!
//! A process normally creates one timer and injects it into every lock
//! that wants auto-renewal; [`WheelTimer::shutdown`] at process teardown
//! drains whatever is still pending without firing it.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::config::TimerConfig;
use crate::error::{LockstepError, Result};

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct WheelTask {
    id: u64,
    deadline: Instant,
    /// Full revolutions left before this task is due. Assigned when the
    /// task is transferred into its slot.
    rounds: u64,
    callback: Callback,
}

struct WheelInner {
    tick: Duration,
    wheel: Vec<Mutex<Vec<WheelTask>>>,
    /// Tasks scheduled since the last tick, not yet placed in a slot.
    pending: Mutex<Vec<WheelTask>>,
    /// Ids of tasks that are neither fired nor cancelled. Removal is the
    /// single point of truth for both cancellation and firing, so the two
    /// can never both happen.
    live: DashMap<u64, ()>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

/// Cancellation handle for a scheduled task.
///
/// Holds only a weak reference to the wheel; cancelling after the task
/// fired, after the timer shut down, or after the timer was dropped is a
/// no-op returning `false`.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: u64,
    inner: Weak<WheelInner>,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancel the task if it has not fired yet. Returns whether the
    /// cancellation took effect.
    pub fn cancel(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.live.remove(&self.id).is_some(),
            None => false,
        }
    }

    /// Whether the task is still waiting to fire.
    pub fn is_pending(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| inner.live.contains_key(&self.id))
            .unwrap_or(false)
    }
}

/// Process-wide delayed-task scheduler.
pub struct WheelTimer {
    inner: Arc<WheelInner>,
    stop_tx: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl WheelTimer {
    /// Create a timer and spawn its driver task. Must be called from
    /// within a tokio runtime.
    pub fn new(tick: Duration, ticks_per_wheel: usize) -> Result<Self> {
        if tick.is_zero() {
            return Err(LockstepError::InvalidArgument(
                "tick must be greater than 0".to_string(),
            ));
        }
        if ticks_per_wheel == 0 {
            return Err(LockstepError::InvalidArgument(
                "ticks_per_wheel must be greater than 0".to_string(),
            ));
        }

        let inner = Arc::new(WheelInner {
            tick,
            wheel: (0..ticks_per_wheel).map(|_| Mutex::new(Vec::new())).collect(),
            pending: Mutex::new(Vec::new()),
            live: DashMap::new(),
            next_id: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        let driver = spawn_driver(Arc::clone(&inner), stop_rx);
        debug!(
            tick_ms = tick.as_millis() as u64,
            slots = ticks_per_wheel,
            "wheel timer started"
        );
        Ok(Self {
            inner,
            stop_tx,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Create a timer from a [`TimerConfig`].
    pub fn from_config(config: &TimerConfig) -> Result<Self> {
        Self::new(Duration::from_millis(config.tick_ms), config.ticks_per_wheel)
    }

    /// Schedule `callback` to run once, no earlier than `delay` from now
    /// (tick granularity applies). Fails only after [`shutdown`](Self::shutdown).
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> Result<TimerHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let task = WheelTask {
            id,
            deadline: Instant::now() + delay,
            rounds: 0,
            callback: Box::new(callback),
        };

        // The shutdown check happens under the pending lock: shutdown sets
        // the flag before draining, so no task can slip in after the drain.
        {
            let mut pending = self.inner.pending.lock();
            if self.inner.shut_down.load(Ordering::SeqCst) {
                return Err(LockstepError::TimerShutdown);
            }
            self.inner.live.insert(id, ());
            pending.push(task);
        }
        trace!(task = id, delay_ms = delay.as_millis() as u64, "task scheduled");
        Ok(TimerHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Sleep on the wheel: schedule a task that completes a oneshot and
    /// await it. Errors with `TimerShutdown` if the timer shuts down (or
    /// the task is otherwise drained) before the delay elapses.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _handle = self.schedule(delay, move || {
            let _ = tx.send(());
        })?;
        rx.await.map_err(|_| LockstepError::TimerShutdown)
    }

    /// Number of tasks waiting to fire.
    pub fn pending_tasks(&self) -> usize {
        self.inner.live.len()
    }

    /// Stop the driver and drain every not-yet-fired task without running
    /// it. Returns the handles of the drained tasks. Subsequent
    /// [`schedule`](Self::schedule) calls fail; repeated shutdown returns
    /// an empty set.
    pub async fn shutdown(&self) -> Vec<TimerHandle> {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        let _ = self.stop_tx.send(true);
        let driver = self.driver.lock().take();
        if let Some(handle) = driver {
            let _ = handle.await;
        }

        let mut drained = mem::take(&mut *self.inner.pending.lock());
        for slot in &self.inner.wheel {
            drained.append(&mut slot.lock());
        }
        let mut cancelled = Vec::new();
        for task in drained {
            if self.inner.live.remove(&task.id).is_some() {
                cancelled.push(TimerHandle {
                    id: task.id,
                    inner: Arc::downgrade(&self.inner),
                });
            }
        }
        debug!(cancelled = cancelled.len(), "wheel timer shut down");
        cancelled
    }
}

/// Ticks until a deadline this far away.
///
/// Padded by one tick: transfer happens some fraction of a tick after the
/// slot boundary, so rounding up alone could still fire marginally early.
/// Tasks fire late by up to two ticks, never early.
fn ticks_for(remaining: Duration, tick: Duration) -> u64 {
    let ticks = remaining.as_nanos().div_ceil(tick.as_nanos());
    (ticks + 1) as u64
}

fn spawn_driver(inner: Arc<WheelInner>, mut stop_rx: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let slots = inner.wheel.len();
        let mut cursor: usize = 0;
        let mut interval = time::interval_at(Instant::now() + inner.tick, inner.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                // also stops when the timer is dropped without shutdown
                _ = stop_rx.changed() => break,
            }

            cursor = (cursor + 1) % slots;

            // Fire what is due in the slot the cursor just reached.
            let due = {
                let mut slot = inner.wheel[cursor].lock();
                let mut due = Vec::new();
                let mut keep = Vec::with_capacity(slot.len());
                for mut task in slot.drain(..) {
                    if !inner.live.contains_key(&task.id) {
                        continue; // cancelled while parked
                    }
                    if task.rounds == 0 {
                        due.push(task);
                    } else {
                        task.rounds -= 1;
                        keep.push(task);
                    }
                }
                *slot = keep;
                due
            };
            for task in due {
                if inner.live.remove(&task.id).is_none() {
                    continue; // cancelled between unpark and fire
                }
                trace!(task = task.id, "timer task firing");
                (task.callback)();
            }

            // Transfer newly scheduled tasks into their slots, relative to
            // the post-advance cursor so nothing fires before its delay.
            let incoming = mem::take(&mut *inner.pending.lock());
            let now = Instant::now();
            for mut task in incoming {
                if !inner.live.contains_key(&task.id) {
                    continue; // cancelled before transfer
                }
                let ticks = ticks_for(task.deadline.saturating_duration_since(now), inner.tick);
                let slot = (cursor + (ticks % slots as u64) as usize) % slots;
                task.rounds = (ticks - 1) / slots as u64;
                inner.wheel[slot].lock().push(task);
            }
        }
    })
}
