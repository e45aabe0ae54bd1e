//! Time sources for publish tracking.
//!
//! # Invariants
//! - `now_ms` is wall time and may step in either direction; it only stamps
//!   `Note::modified_at_ms`.
//! - `monotonic_ms` never decreases; callback ages are measured on it alone.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

static PROCESS_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Time source used by the publish tracker.
pub trait Clock: Send + Sync {
    /// Returns the current wall time as unix epoch milliseconds.
    fn now_ms(&self) -> i64;

    /// Returns milliseconds elapsed on a timeline that never goes backwards.
    fn monotonic_ms(&self) -> i64;
}

/// System wall clock paired with `Instant` for ages.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(millis)
            .unwrap_or(0)
    }

    fn monotonic_ms(&self) -> i64 {
        millis(PROCESS_ORIGIN.elapsed())
    }
}

/// Deterministic clock advanced explicitly by tests and simulations.
///
/// Clones share the same instant, so a test can keep one handle while the
/// tracker owns another. `advance` moves both timelines; `set` moves only
/// the wall clock, the way an NTP step would.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    wall_ms: Arc<AtomicI64>,
    monotonic_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            wall_ms: Arc::new(AtomicI64::new(start_ms)),
            monotonic_ms: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = millis(by);
        self.wall_ms.fetch_add(delta, Ordering::SeqCst);
        self.monotonic_ms.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.wall_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.wall_ms.load(Ordering::SeqCst)
    }

    fn monotonic_ms(&self) -> i64 {
        self.monotonic_ms.load(Ordering::SeqCst)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
