//! Repeating timer capability used by the sweep.
//!
//! # Responsibility
//! - Define the injectable scheduling seam (`Scheduler`, `TimerHandle`).
//! - Provide a thread-backed scheduler and a deterministic manual one.
//!
//! # Invariants
//! - A tick returning `TimerControl::Stop` invalidates its own handle.
//! - An invalidated timer never ticks again.
//! - Schedulers never hold their own locks while running a tick.

use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SWEEP_THREAD_NAME: &str = "notepub-sweep";

/// Decision returned by a tick callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerControl {
    Continue,
    Stop,
}

/// Callback run on every timer period.
pub type TickFn = Box<dyn FnMut() -> TimerControl + Send>;

/// Owner-side view of one armed timer.
pub trait TimerHandle: Send {
    /// Returns `false` once the timer stopped or was invalidated.
    fn is_valid(&self) -> bool;
    /// Stops the timer; pending and future ticks are skipped.
    fn invalidate(&self);
}

/// Factory for repeating timers.
pub trait Scheduler: Send + Sync {
    fn schedule_repeating(&self, interval: Duration, tick: TickFn) -> Box<dyn TimerHandle>;
}

struct ThreadTimerState {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl ThreadTimerState {
    fn stop(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.wake.notify_all();
    }
}

/// Handle for a timer driven by `ThreadScheduler`.
pub struct ThreadTimerHandle {
    state: Arc<ThreadTimerState>,
}

impl TimerHandle for ThreadTimerHandle {
    fn is_valid(&self) -> bool {
        !*self.state.stopped.lock()
    }

    fn invalidate(&self) {
        self.state.stop();
    }
}

/// Runs each timer on its own background thread.
///
/// The thread sleeps on a condvar between periods, so `invalidate()` wakes
/// and retires it without waiting for the next period.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule_repeating(&self, interval: Duration, mut tick: TickFn) -> Box<dyn TimerHandle> {
        let state = Arc::new(ThreadTimerState {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let worker_state = Arc::clone(&state);

        let spawned = thread::Builder::new()
            .name(SWEEP_THREAD_NAME.to_string())
            .spawn(move || loop {
                let deadline = Instant::now() + interval;
                let mut stopped = worker_state.stopped.lock();
                while !*stopped {
                    if worker_state
                        .wake
                        .wait_until(&mut stopped, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                if *stopped {
                    break;
                }
                drop(stopped);

                if tick() == TimerControl::Stop {
                    worker_state.stop();
                    break;
                }
            });

        match spawned {
            Ok(_) => debug!(
                "event=timer_armed module=scheduler status=ok interval_ms={}",
                interval.as_millis()
            ),
            Err(err) => {
                // A dead handle makes the owner re-arm on its next registration.
                error!(
                    "event=timer_armed module=scheduler status=error error_code=spawn_failed error={}",
                    err
                );
                state.stop();
            }
        }

        Box::new(ThreadTimerHandle { state })
    }
}

/// Handle for a timer driven by `ManualScheduler`.
pub struct ManualTimerHandle {
    valid: Arc<AtomicBool>,
}

impl TimerHandle for ManualTimerHandle {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }
}

struct ManualTimer {
    interval: Duration,
    tick: TickFn,
    valid: Arc<AtomicBool>,
}

#[derive(Default)]
struct ManualState {
    timers: Vec<ManualTimer>,
    scheduled_total: usize,
}

/// Deterministic scheduler: timers only tick when `fire()` is called.
///
/// Clones share the same timer set.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one tick on every valid timer and returns how many ticked.
    pub fn fire(&self) -> usize {
        let timers = std::mem::take(&mut self.state.lock().timers);
        let mut survivors = Vec::with_capacity(timers.len());
        let mut fired = 0;

        for mut timer in timers {
            if !timer.valid.load(Ordering::SeqCst) {
                continue;
            }
            fired += 1;
            if (timer.tick)() == TimerControl::Stop {
                timer.valid.store(false, Ordering::SeqCst);
                continue;
            }
            if timer.valid.load(Ordering::SeqCst) {
                survivors.push(timer);
            }
        }

        let mut state = self.state.lock();
        // Timers armed during the ticks were appended meanwhile.
        survivors.append(&mut state.timers);
        state.timers = survivors;
        fired
    }

    /// Number of timers that are still valid.
    pub fn active_timers(&self) -> usize {
        self.state
            .lock()
            .timers
            .iter()
            .filter(|timer| timer.valid.load(Ordering::SeqCst))
            .count()
    }

    /// Number of timers ever created by this scheduler.
    pub fn scheduled_total(&self) -> usize {
        self.state.lock().scheduled_total
    }

    /// Interval of the most recently scheduled valid timer.
    pub fn last_interval(&self) -> Option<Duration> {
        self.state
            .lock()
            .timers
            .iter()
            .rev()
            .find(|timer| timer.valid.load(Ordering::SeqCst))
            .map(|timer| timer.interval)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(&self, interval: Duration, tick: TickFn) -> Box<dyn TimerHandle> {
        let valid = Arc::new(AtomicBool::new(true));
        let mut state = self.state.lock();
        state.scheduled_total += 1;
        state.timers.push(ManualTimer {
            interval,
            tick,
            valid: Arc::clone(&valid),
        });
        Box::new(ManualTimerHandle { valid })
    }
}
