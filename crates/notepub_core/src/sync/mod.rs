//! Sync-engine integration point.
//!
//! # Responsibility
//! - Define the contract the sync engine calls for every remote update.
//! - Fan remote updates out to registered listeners.
//! - Pump update keys from a channel on a background thread.
//!
//! # Invariants
//! - Listeners receive every update key, whether or not it concerns them.
//! - Delivery is at-least-once; listeners must tolerate duplicates.

use crate::publish::controller::PublishController;
use crate::store::NoteStore;

pub mod listener_registry;
pub mod update_pump;

/// Receiver of "remote store accepted a change for this key" events.
pub trait RemoteUpdateListener: Send + Sync {
    fn on_remote_update(&self, key: &str);
}

impl<S: NoteStore + Send + Sync> RemoteUpdateListener for PublishController<S> {
    fn on_remote_update(&self, key: &str) {
        self.notify_update_received(key);
    }
}
