//! Background delivery of remote update keys.

use crate::sync::RemoteUpdateListener;
use log::info;
use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const PUMP_THREAD_NAME: &str = "notepub-sync-pump";

/// Spawns a thread that forwards every received key to `listener`.
///
/// The thread exits once all senders are dropped; joining it yields the
/// number of delivered keys.
pub fn spawn_update_pump(
    updates: Receiver<String>,
    listener: Arc<dyn RemoteUpdateListener>,
) -> io::Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name(PUMP_THREAD_NAME.to_string())
        .spawn(move || {
            let mut delivered = 0_u64;
            for key in updates {
                listener.on_remote_update(key.as_str());
                delivered += 1;
            }
            info!("event=update_pump module=sync status=stopped delivered={delivered}");
            delivered
        })
}
