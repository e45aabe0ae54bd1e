//! Core of notepub: publish-state tracking for synchronized notes.
//!
//! A caller flips a note's `published` flag through `PublishController`; the
//! completion callback fires once the sync engine reports that the remote
//! store acknowledged the note, or is dropped after one sweep interval.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod publish;
pub mod store;
pub mod sync;

pub use config::{ConfigError, PublishConfig, DEFAULT_SWEEP_INTERVAL};
pub use logging::{init_logging, logging_status, LogLevel, LoggingError};
pub use model::note::{validate_note_key, Note, NoteValidationError};
pub use publish::clock::{Clock, ManualClock, SystemClock};
pub use publish::controller::{
    DiscardObserver, DiscardReason, PublishCallback, PublishController, PublishControllerBuilder,
    PublishError, PublishRequest, PublishStats,
};
pub use publish::scheduler::{
    ManualScheduler, Scheduler, ThreadScheduler, TickFn, TimerControl, TimerHandle,
};
pub use store::sqlite::SqliteNoteStore;
pub use store::{NoteStore, StoreError, StoreResult};
pub use sync::listener_registry::{ListenerRegistry, ListenerRegistryError};
pub use sync::update_pump::spawn_update_pump;
pub use sync::RemoteUpdateListener;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
