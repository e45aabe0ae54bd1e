use notepub_core::{
    DiscardObserver, DiscardReason, ManualClock, ManualScheduler, Note, NoteStore,
    PublishConfig, PublishController, PublishError, PublishRequest, StoreError, StoreResult,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const START_MS: i64 = 1_700_000_000_000;
const INTERVAL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingStore {
    saved: Mutex<Vec<Note>>,
    fail: AtomicBool,
    fail_load: AtomicBool,
}

impl RecordingStore {
    fn save_count(&self) -> usize {
        self.saved.lock().len()
    }
}

impl NoteStore for RecordingStore {
    fn save(&self, note: &Note) -> StoreResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidData("disk full".to_string()));
        }
        self.saved.lock().push(note.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> StoreResult<Option<Note>> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidData("unreadable".to_string()));
        }
        Ok(self
            .saved
            .lock()
            .iter()
            .rev()
            .find(|note| note.key == key)
            .cloned())
    }
}

#[derive(Default)]
struct RecordingObserver {
    discards: Mutex<Vec<(String, DiscardReason)>>,
}

impl DiscardObserver for RecordingObserver {
    fn on_discard(&self, key: &str, reason: DiscardReason) {
        self.discards.lock().push((key.to_string(), reason));
    }
}

struct Harness {
    controller: PublishController<Arc<RecordingStore>>,
    store: Arc<RecordingStore>,
    clock: ManualClock,
    scheduler: ManualScheduler,
    observer: Arc<RecordingObserver>,
}

fn harness() -> Harness {
    let store = Arc::new(RecordingStore::default());
    let clock = ManualClock::new(START_MS);
    let scheduler = ManualScheduler::new();
    let observer = Arc::new(RecordingObserver::default());
    let controller = PublishController::builder(store.clone())
        .config(PublishConfig {
            sweep_interval: INTERVAL,
        })
        .clock(Arc::new(clock.clone()))
        .scheduler(Arc::new(scheduler.clone()))
        .discard_observer(observer.clone())
        .build()
        .expect("config should be valid");
    Harness {
        controller,
        store,
        clock,
        scheduler,
        observer,
    }
}

fn note(key: &str, published: bool) -> Note {
    let mut note = Note::with_key(key, "body").expect("test keys are valid");
    note.published = published;
    note
}

/// Callback that records the full note it was handed.
fn note_recorder() -> (Arc<Mutex<Vec<Note>>>, impl FnOnce(&Note) + Send + 'static) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    (calls, move |note: &Note| sink.lock().push(note.clone()))
}

/// Callback that records each invocation's `published` flag.
fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl FnOnce(&Note) + Send + 'static) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    (calls, move |note: &Note| sink.lock().push(note.published))
}

#[test]
fn unchanged_state_has_no_side_effects() {
    let h = harness();
    let mut item = note("abc", true);
    let before = item.clone();
    let (calls, callback) = recorder();

    let outcome = h
        .controller
        .request_state_change(&mut item, true, callback)
        .expect("request should succeed");

    assert_eq!(outcome, PublishRequest::Unchanged);
    assert_eq!(item, before);
    assert_eq!(h.store.save_count(), 0);
    assert_eq!(h.scheduler.scheduled_total(), 0);
    assert!(!h.controller.is_timer_armed());
    assert!(!h.controller.notify_update_received("abc"));
    assert!(calls.lock().is_empty());
}

#[test]
fn changed_state_mutates_persists_once_and_arms_timer() {
    let h = harness();
    let mut item = note("abc", false);
    let (_calls, callback) = recorder();

    let outcome = h
        .controller
        .request_state_change(&mut item, true, callback)
        .expect("request should succeed");

    assert_eq!(outcome, PublishRequest::Pending { superseded: false });
    assert!(item.published);
    assert_eq!(item.modified_at_ms, START_MS);
    assert_eq!(h.store.save_count(), 1);
    assert_eq!(h.store.saved.lock()[0], item);
    assert!(h.controller.is_pending("abc"));
    assert!(h.controller.is_timer_armed());
    assert_eq!(h.scheduler.last_interval(), Some(INTERVAL));
}

#[test]
fn notification_resolves_pending_callback_exactly_once() {
    let h = harness();
    let mut item = note("abc", false);
    let (calls, callback) = recorder();
    h.controller
        .request_state_change(&mut item, true, callback)
        .expect("request should succeed");

    assert!(h.controller.notify_update_received("abc"));
    assert_eq!(*calls.lock(), vec![true]);
    assert!(!h.controller.is_pending("abc"));

    assert!(!h.controller.notify_update_received("abc"));
    assert_eq!(calls.lock().len(), 1);

    let stats = h.controller.stats();
    assert_eq!(stats.resolved, 1);
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.pending, 0);
}

#[test]
fn notification_for_unknown_key_is_ignored() {
    let h = harness();
    assert!(!h.controller.notify_update_received("nobody-waits"));
    assert_eq!(h.controller.pending_count(), 0);
    assert_eq!(h.scheduler.scheduled_total(), 0);
    assert_eq!(h.controller.stats().ignored, 1);
}

#[test]
fn later_request_supersedes_earlier_callback() {
    let h = harness();
    let mut item = note("abc", false);
    let (first_calls, first) = recorder();
    let (second_calls, second) = recorder();

    h.controller
        .request_state_change(&mut item, true, first)
        .expect("first request");
    let outcome = h
        .controller
        .request_state_change(&mut item, false, second)
        .expect("second request");

    assert_eq!(outcome, PublishRequest::Pending { superseded: true });
    assert_eq!(h.controller.pending_count(), 1);
    assert_eq!(
        *h.observer.discards.lock(),
        vec![("abc".to_string(), DiscardReason::Superseded)]
    );

    assert!(h.controller.notify_update_received("abc"));
    assert!(first_calls.lock().is_empty());
    assert_eq!(*second_calls.lock(), vec![false]);
    assert_eq!(h.scheduler.scheduled_total(), 1);
}

#[test]
fn republish_with_same_flag_keeps_first_callback() {
    let h = harness();
    let mut item = note("abc", false);
    let (first_calls, first) = recorder();
    let (second_calls, second) = recorder();

    h.controller
        .request_state_change(&mut item, true, first)
        .expect("first request");
    // Already published locally, so this is a no-op and must not replace C1.
    let outcome = h
        .controller
        .request_state_change(&mut item, true, second)
        .expect("second request");
    assert_eq!(outcome, PublishRequest::Unchanged);

    h.controller.notify_update_received("abc");
    assert_eq!(*first_calls.lock(), vec![true]);
    assert!(second_calls.lock().is_empty());
}

#[test]
fn expired_entry_is_swept_without_invocation() {
    let h = harness();
    let mut item = note("xyz", false);
    let (calls, callback) = recorder();
    h.controller
        .request_state_change(&mut item, true, callback)
        .expect("request should succeed");

    h.clock.advance(INTERVAL + Duration::from_millis(1));
    assert_eq!(h.scheduler.fire(), 1);

    assert!(!h.controller.is_pending("xyz"));
    assert!(calls.lock().is_empty());
    assert_eq!(h.controller.stats().expired, 1);
    assert_eq!(
        *h.observer.discards.lock(),
        vec![("xyz".to_string(), DiscardReason::Expired)]
    );

    // Late delivery after the sweep is a no-op.
    assert!(!h.controller.notify_update_received("xyz"));
    assert!(calls.lock().is_empty());

    // Next tick finds the map empty and disarms.
    assert!(h.controller.is_timer_armed());
    assert_eq!(h.scheduler.fire(), 1);
    assert!(!h.controller.is_timer_armed());
    assert_eq!(h.scheduler.active_timers(), 0);
}

#[test]
fn entry_exactly_one_interval_old_survives_the_tick() {
    let h = harness();
    let mut item = note("abc", false);
    let (calls, callback) = recorder();
    h.controller
        .request_state_change(&mut item, true, callback)
        .expect("request should succeed");

    h.clock.advance(INTERVAL);
    h.scheduler.fire();
    assert!(h.controller.is_pending("abc"));

    assert!(h.controller.notify_update_received("abc"));
    assert_eq!(*calls.lock(), vec![true]);
}

#[test]
fn sweep_keeps_fresh_entries_and_drops_stale_ones() {
    let h = harness();
    let mut old = note("old", false);
    let mut fresh = note("fresh", false);
    let (old_calls, old_cb) = recorder();
    let (fresh_calls, fresh_cb) = recorder();

    h.controller
        .request_state_change(&mut old, true, old_cb)
        .expect("old request");
    h.clock.advance(Duration::from_secs(4));
    h.controller
        .request_state_change(&mut fresh, true, fresh_cb)
        .expect("fresh request");
    h.clock.advance(Duration::from_secs(2));

    h.scheduler.fire();
    assert!(!h.controller.is_pending("old"));
    assert!(h.controller.is_pending("fresh"));

    h.controller.notify_update_received("old");
    h.controller.notify_update_received("fresh");
    assert!(old_calls.lock().is_empty());
    assert_eq!(*fresh_calls.lock(), vec![true]);
}

#[test]
fn timer_stops_when_empty_and_rearms_on_next_registration() {
    let h = harness();
    let mut item = note("abc", false);
    let (_calls, callback) = recorder();
    h.controller
        .request_state_change(&mut item, true, callback)
        .expect("request should succeed");
    h.controller.notify_update_received("abc");

    // The map is empty but the timer only notices on its next tick.
    assert!(h.controller.is_timer_armed());
    h.scheduler.fire();
    assert!(!h.controller.is_timer_armed());
    assert_eq!(h.scheduler.scheduled_total(), 1);

    let (_calls, callback) = recorder();
    h.controller
        .request_state_change(&mut item, false, callback)
        .expect("request should succeed");
    assert!(h.controller.is_timer_armed());
    assert_eq!(h.scheduler.scheduled_total(), 2);
    assert_eq!(h.scheduler.active_timers(), 1);
}

#[test]
fn arming_is_idempotent_while_timer_is_valid() {
    let h = harness();
    for key in ["a", "b", "c"] {
        let mut item = note(key, false);
        let (_calls, callback) = recorder();
        h.controller
            .request_state_change(&mut item, true, callback)
            .expect("request should succeed");
    }
    assert_eq!(h.scheduler.scheduled_total(), 1);
    assert_eq!(h.controller.pending_count(), 3);
}

#[test]
fn manual_sweep_uses_the_same_expiry_rule() {
    let h = harness();
    let mut item = note("abc", false);
    let (calls, callback) = recorder();
    h.controller
        .request_state_change(&mut item, true, callback)
        .expect("request should succeed");

    assert_eq!(h.controller.sweep_expired(), 0);
    h.clock.advance(Duration::from_secs(6));
    assert_eq!(h.controller.sweep_expired(), 1);
    assert!(calls.lock().is_empty());
}

#[test]
fn store_failure_restores_note_and_drops_registration() {
    let h = harness();
    h.store.fail.store(true, Ordering::SeqCst);
    let mut item = note("abc", false);
    item.modified_at_ms = 7;
    let before = item.clone();
    let (calls, callback) = recorder();

    let err = h
        .controller
        .request_state_change(&mut item, true, callback)
        .expect_err("save failure should surface");
    assert!(matches!(err, PublishError::Store(_)));
    assert_eq!(item, before);
    assert!(!h.controller.is_pending("abc"));
    assert!(!h.controller.notify_update_received("abc"));
    assert!(calls.lock().is_empty());

    // A retry with the same flag is a real request once the store recovers.
    h.store.fail.store(false, Ordering::SeqCst);
    let (retry_calls, retry) = recorder();
    let outcome = h
        .controller
        .request_state_change(&mut item, true, retry)
        .expect("retry should succeed");
    assert_eq!(outcome, PublishRequest::Pending { superseded: false });
    assert_eq!(h.store.save_count(), 1);
    assert!(h.controller.notify_update_received("abc"));
    assert_eq!(*retry_calls.lock(), vec![true]);
}

#[test]
fn store_failure_keeps_the_callback_it_would_have_replaced() {
    let h = harness();
    let mut item = note("abc", false);
    let (first_calls, first) = recorder();
    let (second_calls, second) = recorder();
    h.controller
        .request_state_change(&mut item, true, first)
        .expect("first request");

    h.store.fail.store(true, Ordering::SeqCst);
    h.controller
        .request_state_change(&mut item, false, second)
        .expect_err("second save fails");
    assert!(item.published);
    assert_eq!(h.controller.stats().superseded, 0);
    assert!(h.observer.discards.lock().is_empty());

    h.store.fail.store(false, Ordering::SeqCst);
    assert!(h.controller.notify_update_received("abc"));
    assert_eq!(*first_calls.lock(), vec![true]);
    assert!(second_calls.lock().is_empty());
}

#[test]
fn callback_sees_note_as_persisted_at_acknowledgment() {
    let h = harness();
    let mut item = Note::with_key("abc", "v1").expect("valid key");
    let (calls, callback) = note_recorder();
    h.controller
        .request_state_change(&mut item, true, callback)
        .expect("request should succeed");

    item.content = "v2".to_string();
    item.modified_at_ms = START_MS + 1_000;
    h.store.save(&item).expect("edit saves");

    assert!(h.controller.notify_update_received("abc"));
    let delivered = calls.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0], item);
    assert_eq!(delivered[0].content, "v2");
}

#[test]
fn unreadable_store_falls_back_to_registered_note() {
    let h = harness();
    let mut item = Note::with_key("abc", "v1").expect("valid key");
    let (calls, callback) = note_recorder();
    h.controller
        .request_state_change(&mut item, true, callback)
        .expect("request should succeed");
    let registered = item.clone();

    h.store.fail_load.store(true, Ordering::SeqCst);
    assert!(h.controller.notify_update_received("abc"));
    assert_eq!(*calls.lock(), vec![registered]);
}

#[test]
fn wall_clock_stepping_back_does_not_extend_the_wait() {
    let h = harness();
    let mut item = note("xyz", false);
    let (calls, callback) = recorder();
    h.controller
        .request_state_change(&mut item, true, callback)
        .expect("request should succeed");

    h.clock.set(START_MS - 3_600_000);
    h.clock.advance(INTERVAL + Duration::from_millis(1));
    h.scheduler.fire();

    assert!(!h.controller.is_pending("xyz"));
    assert!(calls.lock().is_empty());
    assert_eq!(h.controller.stats().expired, 1);
}

#[test]
fn wall_clock_jumping_forward_does_not_expire_early() {
    let h = harness();
    let mut item = note("abc", false);
    let (calls, callback) = recorder();
    h.controller
        .request_state_change(&mut item, true, callback)
        .expect("request should succeed");

    h.clock.set(START_MS + 3_600_000);
    h.scheduler.fire();
    assert!(h.controller.is_pending("abc"));

    // Modification stamps still follow wall time.
    let mut other = note("def", false);
    let (_other_calls, other_cb) = recorder();
    h.controller
        .request_state_change(&mut other, true, other_cb)
        .expect("request should succeed");
    assert_eq!(other.modified_at_ms, START_MS + 3_600_000);

    assert!(h.controller.notify_update_received("abc"));
    assert_eq!(*calls.lock(), vec![true]);
}

#[test]
fn invalid_key_is_rejected_before_side_effects() {
    let h = harness();
    let mut item = note("abc", false);
    item.key = "not a key".to_string();
    let (_calls, callback) = recorder();

    let err = h
        .controller
        .request_state_change(&mut item, true, callback)
        .expect_err("invalid key should fail");
    assert!(matches!(err, PublishError::InvalidNoteKey(_)));
    assert!(!item.published);
    assert_eq!(h.store.save_count(), 0);
    assert_eq!(h.scheduler.scheduled_total(), 0);
}

#[test]
fn shutdown_drops_pending_and_disarms() {
    let h = harness();
    let mut item = note("abc", false);
    let (calls, callback) = recorder();
    h.controller
        .request_state_change(&mut item, true, callback)
        .expect("request should succeed");

    h.controller.shutdown();
    assert_eq!(h.controller.pending_count(), 0);
    assert!(!h.controller.is_timer_armed());
    assert_eq!(h.scheduler.fire(), 0);
    assert!(!h.controller.notify_update_received("abc"));
    assert!(calls.lock().is_empty());
    assert_eq!(
        *h.observer.discards.lock(),
        vec![("abc".to_string(), DiscardReason::Shutdown)]
    );
}

#[test]
fn dropping_controller_stops_timer_and_releases_callbacks() {
    let h = harness();
    let dropped = Arc::new(AtomicUsize::new(0));

    struct DropCounter(Arc<AtomicUsize>);
    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let guard = DropCounter(dropped.clone());
    let mut item = note("abc", false);
    h.controller
        .request_state_change(&mut item, true, move |_| {
            let _keep = &guard;
        })
        .expect("request should succeed");

    let Harness {
        controller,
        scheduler,
        ..
    } = h;
    drop(controller);

    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.fire(), 0);
}
