//! Publish-state callback tracking.
//!
//! # Responsibility
//! - Apply a local publish-state change and persist it.
//! - Hold the caller's completion callback until the sync layer reports that
//!   the remote store acknowledged the note.
//! - Reap callbacks that were never acknowledged within one sweep interval.
//!
//! # Invariants
//! - At most one pending callback per note key; a newer request replaces it.
//! - A callback runs at most once, and never while the state lock is held.
//! - Discarded callbacks (superseded, expired, shutdown) are dropped uninvoked.
//! - Callback ages are measured on the monotonic clock, so wall-clock steps
//!   neither extend nor shorten the wait.
//! - A failed save leaves the caller's note and the pending map as they were
//!   before the request.
//! - The sweep timer is armed while callbacks may be pending and disarms
//!   itself on the first tick that finds the map empty.

use crate::config::{ConfigError, PublishConfig};
use crate::model::note::{Note, NoteValidationError};
use crate::publish::clock::{Clock, SystemClock};
use crate::publish::scheduler::{Scheduler, ThreadScheduler, TimerControl, TimerHandle};
use crate::store::{NoteStore, StoreError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Weak};

/// Completion callback run once the remote store acknowledged the change.
pub type PublishCallback = Box<dyn FnOnce(&Note) + Send>;

/// Errors returned by `PublishController::request_state_change`.
#[derive(Debug)]
pub enum PublishError {
    /// The note key does not satisfy the note-key grammar.
    InvalidNoteKey(NoteValidationError),
    /// The local change was applied and is pending, but persisting it failed.
    Store(StoreError),
}

impl Display for PublishError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNoteKey(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "failed to persist publish state: {err}"),
        }
    }
}

impl Error for PublishError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidNoteKey(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

/// Result of a publish-state request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishRequest {
    /// The note already had the requested state; nothing was registered.
    Unchanged,
    /// A callback is pending; `superseded` is set when it replaced an older one.
    Pending { superseded: bool },
}

/// Why a pending callback was dropped without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    Superseded,
    Expired,
    Shutdown,
}

impl DiscardReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Superseded => "superseded",
            Self::Expired => "expired",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Optional hook told about every dropped callback.
///
/// Runs outside the tracker lock, after the callback itself was dropped.
pub trait DiscardObserver: Send + Sync {
    fn on_discard(&self, key: &str, reason: DiscardReason);
}

/// Point-in-time tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub pending: usize,
    pub resolved: u64,
    pub superseded: u64,
    pub expired: u64,
    /// Update notifications that matched no pending callback.
    pub ignored: u64,
}

struct PendingCallback {
    registration: u64,
    /// Fallback for stores without a read path.
    snapshot: Note,
    callback: PublishCallback,
    registered_at_ms: i64,
}

struct SweepTimer {
    generation: u64,
    handle: Box<dyn TimerHandle>,
}

#[derive(Default)]
struct TrackerState {
    pending: HashMap<String, PendingCallback>,
    timer: Option<SweepTimer>,
    next_generation: u64,
    next_registration: u64,
    stats: PublishStats,
}

impl TrackerState {
    fn timer_is_valid(&self) -> bool {
        self.timer
            .as_ref()
            .is_some_and(|timer| timer.handle.is_valid())
    }

    fn take_expired(&mut self, now_ms: i64, max_age_ms: i64) -> Vec<(String, PendingCallback)> {
        let expired_keys: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, entry)| now_ms.saturating_sub(entry.registered_at_ms) > max_age_ms)
            .map(|(key, _)| key.clone())
            .collect();

        let mut expired = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(entry) = self.pending.remove(key.as_str()) {
                expired.push((key, entry));
            }
        }
        self.stats.expired += expired.len() as u64;
        expired
    }
}

/// State shared with the sweep tick, which only holds a `Weak` to it.
struct Shared {
    state: Mutex<TrackerState>,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn DiscardObserver>>,
    max_age_ms: i64,
}

impl Shared {
    fn on_tick(&self, generation: u64) -> TimerControl {
        let expired = {
            let mut state = self.state.lock();
            let current = state
                .timer
                .as_ref()
                .is_some_and(|timer| timer.generation == generation);
            if !current {
                return TimerControl::Stop;
            }

            if state.pending.is_empty() {
                if let Some(timer) = state.timer.take() {
                    timer.handle.invalidate();
                }
                debug!("event=sweep_timer module=publish status=disarmed generation={generation}");
                return TimerControl::Stop;
            }

            state.take_expired(self.clock.monotonic_ms(), self.max_age_ms)
        };

        self.discard(expired, DiscardReason::Expired);
        TimerControl::Continue
    }

    fn discard(&self, entries: Vec<(String, PendingCallback)>, reason: DiscardReason) {
        for (key, entry) in entries {
            drop(entry);
            debug!(
                "event=publish_discard module=publish status=dropped key={} reason={}",
                key,
                reason.as_str()
            );
            if let Some(observer) = &self.observer {
                observer.on_discard(key.as_str(), reason);
            }
        }
    }
}

/// Builder for `PublishController` with injectable collaborators.
pub struct PublishControllerBuilder<S: NoteStore> {
    store: S,
    config: PublishConfig,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    observer: Option<Arc<dyn DiscardObserver>>,
}

impl<S: NoteStore> PublishControllerBuilder<S> {
    pub fn config(mut self, config: PublishConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn discard_observer(mut self, observer: Arc<dyn DiscardObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Validates the config and builds the controller. No timer is armed yet.
    pub fn build(self) -> Result<PublishController<S>, ConfigError> {
        self.config.validate()?;
        Ok(self.assemble())
    }

    fn assemble(self) -> PublishController<S> {
        PublishController {
            shared: Arc::new(Shared {
                state: Mutex::new(TrackerState::default()),
                clock: self.clock,
                observer: self.observer,
                max_age_ms: self.config.sweep_interval_ms(),
            }),
            store: self.store,
            scheduler: self.scheduler,
            config: self.config,
        }
    }
}

/// Correlates local publish-state changes with remote acknowledgments.
///
/// Callers, the sync notification thread and the sweep timer may all drive
/// one controller concurrently; every access to the pending map goes through
/// a single lock.
pub struct PublishController<S: NoteStore> {
    shared: Arc<Shared>,
    store: S,
    scheduler: Arc<dyn Scheduler>,
    config: PublishConfig,
}

impl<S: NoteStore> PublishController<S> {
    /// Creates a controller with the system clock, a thread-backed sweep
    /// timer and the default five second interval.
    pub fn new(store: S) -> Self {
        Self::builder(store).assemble()
    }

    pub fn builder(store: S) -> PublishControllerBuilder<S> {
        PublishControllerBuilder {
            store,
            config: PublishConfig::default(),
            clock: Arc::new(SystemClock),
            scheduler: Arc::new(ThreadScheduler),
            observer: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// Changes `note.published` and waits for the remote acknowledgment.
    ///
    /// When the note already has the requested state this returns
    /// `PublishRequest::Unchanged` and `on_resolved` is dropped uninvoked.
    /// Otherwise the note is mutated and saved, `on_resolved` replaces any
    /// pending callback for the same key, and the sweep timer is armed.
    ///
    /// # Errors
    /// - `InvalidNoteKey` before any side effect.
    /// - `Store` when saving failed. `note.published` and `note.modified_at_ms`
    ///   are restored and the callback is dropped; a callback this request
    ///   would have superseded stays pending. Retrying with the same flag
    ///   goes through the full request again.
    pub fn request_state_change<F>(
        &self,
        note: &mut Note,
        published: bool,
        on_resolved: F,
    ) -> Result<PublishRequest, PublishError>
    where
        F: FnOnce(&Note) + Send + 'static,
    {
        note.validate().map_err(PublishError::InvalidNoteKey)?;

        if note.published == published {
            debug!(
                "event=publish_request module=publish status=unchanged key={} published={}",
                note.key, published
            );
            return Ok(PublishRequest::Unchanged);
        }

        let prior = (note.published, note.modified_at_ms);
        note.published = published;
        note.modified_at_ms = self.shared.clock.now_ms();

        // Registered before saving so an acknowledgment racing the save
        // still finds its callback.
        let (registration, replaced) = {
            let mut state = self.shared.state.lock();
            state.next_registration += 1;
            let registration = state.next_registration;
            let replaced = state.pending.insert(
                note.key.clone(),
                PendingCallback {
                    registration,
                    snapshot: note.clone(),
                    callback: Box::new(on_resolved),
                    registered_at_ms: self.shared.clock.monotonic_ms(),
                },
            );
            if replaced.is_some() {
                state.stats.superseded += 1;
            }
            self.arm_timer_locked(&mut state);
            (registration, replaced)
        };

        if let Err(err) = self.store.save(note) {
            (note.published, note.modified_at_ms) = prior;
            self.roll_back_registration(note.key.as_str(), registration, replaced);
            warn!(
                "event=publish_request module=publish status=error key={} error_code=save_failed error={}",
                note.key, err
            );
            return Err(PublishError::Store(err));
        }

        let superseded = replaced.is_some();
        if let Some(previous) = replaced {
            self.shared
                .discard(vec![(note.key.clone(), previous)], DiscardReason::Superseded);
        }

        info!(
            "event=publish_request module=publish status=pending key={} published={} superseded={}",
            note.key, published, superseded
        );
        Ok(PublishRequest::Pending { superseded })
    }

    /// Fires and removes the pending callback for `key`, if any.
    ///
    /// Returns whether a callback ran. Unknown keys, repeated deliveries and
    /// deliveries after expiry are ignored.
    pub fn notify_update_received(&self, key: &str) -> bool {
        let entry = {
            let mut state = self.shared.state.lock();
            let entry = state.pending.remove(key);
            if entry.is_some() {
                state.stats.resolved += 1;
            } else {
                state.stats.ignored += 1;
            }
            entry
        };

        let Some(PendingCallback {
            snapshot, callback, ..
        }) = entry
        else {
            debug!("event=publish_ack module=publish status=ignored key={key}");
            return false;
        };

        let note = self.current_note(key, snapshot);
        info!(
            "event=publish_ack module=publish status=resolved key={} published={}",
            key, note.published
        );
        callback(&note);
        true
    }

    /// Runs one expiry pass now and returns how many callbacks were dropped.
    pub fn sweep_expired(&self) -> usize {
        let expired = {
            let mut state = self.shared.state.lock();
            state.take_expired(self.shared.clock.monotonic_ms(), self.shared.max_age_ms)
        };
        let count = expired.len();
        self.shared.discard(expired, DiscardReason::Expired);
        count
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.shared.state.lock().pending.contains_key(key)
    }

    /// Whether a valid sweep timer is currently held.
    pub fn is_timer_armed(&self) -> bool {
        self.shared.state.lock().timer_is_valid()
    }

    pub fn stats(&self) -> PublishStats {
        let state = self.shared.state.lock();
        PublishStats {
            pending: state.pending.len(),
            ..state.stats
        }
    }

    /// Cancels the sweep timer and drops every pending callback uninvoked.
    pub fn shutdown(&self) {
        let drained: Vec<(String, PendingCallback)> = {
            let mut state = self.shared.state.lock();
            if let Some(timer) = state.timer.take() {
                timer.handle.invalidate();
            }
            state.pending.drain().collect()
        };
        if !drained.is_empty() {
            info!(
                "event=publish_shutdown module=publish status=ok dropped={}",
                drained.len()
            );
        }
        self.shared.discard(drained, DiscardReason::Shutdown);
    }

    /// Prefers the persisted note over the registration snapshot.
    fn current_note(&self, key: &str, snapshot: Note) -> Note {
        match self.store.load(key) {
            Ok(Some(current)) => current,
            Ok(None) => snapshot,
            Err(err) => {
                warn!(
                    "event=publish_ack module=publish status=degraded key={} error_code=load_failed error={}",
                    key, err
                );
                snapshot
            }
        }
    }

    /// Undoes the registration made by a request whose save failed.
    ///
    /// If the entry was already resolved or replaced by someone else, the
    /// callback it superseded is stale and gets discarded instead.
    fn roll_back_registration(
        &self,
        key: &str,
        registration: u64,
        replaced: Option<PendingCallback>,
    ) {
        let (ours, orphaned) = {
            let mut state = self.shared.state.lock();
            let still_ours = state
                .pending
                .get(key)
                .is_some_and(|entry| entry.registration == registration);
            if still_ours {
                let ours = state.pending.remove(key);
                if let Some(previous) = replaced {
                    state.stats.superseded = state.stats.superseded.saturating_sub(1);
                    state.pending.insert(key.to_string(), previous);
                }
                (ours, None)
            } else {
                (None, replaced)
            }
        };

        drop(ours);
        if let Some(previous) = orphaned {
            self.shared
                .discard(vec![(key.to_string(), previous)], DiscardReason::Superseded);
        }
    }

    fn arm_timer_locked(&self, state: &mut TrackerState) {
        if state.timer_is_valid() {
            return;
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let handle = self.scheduler.schedule_repeating(
            self.config.sweep_interval,
            Box::new(move || match weak.upgrade() {
                Some(shared) => shared.on_tick(generation),
                None => TimerControl::Stop,
            }),
        );

        if let Some(stale) = state.timer.replace(SweepTimer { generation, handle }) {
            stale.handle.invalidate();
        }
        debug!("event=sweep_timer module=publish status=armed generation={generation}");
    }
}

impl<S: NoteStore> Drop for PublishController<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
