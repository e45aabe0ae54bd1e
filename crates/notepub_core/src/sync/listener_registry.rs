//! In-process registry of remote-update listeners.

use crate::sync::RemoteUpdateListener;
use log::debug;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Listener registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerRegistryError {
    InvalidListenerId(String),
    DuplicateListenerId(String),
    ListenerNotFound(String),
}

impl Display for ListenerRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidListenerId(value) => write!(f, "listener id is invalid: {value}"),
            Self::DuplicateListenerId(value) => {
                write!(f, "listener id already registered: {value}")
            }
            Self::ListenerNotFound(value) => write!(f, "listener not found: {value}"),
        }
    }
}

impl Error for ListenerRegistryError {}

/// Fans one remote update out to every registered listener, in id order.
///
/// The registry itself is a `RemoteUpdateListener`, so the sync engine only
/// ever holds one handle.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<BTreeMap<String, Arc<dyn RemoteUpdateListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        listener_id: &str,
        listener: Arc<dyn RemoteUpdateListener>,
    ) -> Result<(), ListenerRegistryError> {
        let listener_id = listener_id.trim().to_string();
        if !is_valid_listener_id(&listener_id) {
            return Err(ListenerRegistryError::InvalidListenerId(listener_id));
        }

        let mut listeners = self.listeners.write();
        if listeners.contains_key(listener_id.as_str()) {
            return Err(ListenerRegistryError::DuplicateListenerId(listener_id));
        }
        listeners.insert(listener_id, listener);
        Ok(())
    }

    pub fn unregister(&self, listener_id: &str) -> Result<(), ListenerRegistryError> {
        let normalized = listener_id.trim();
        match self.listeners.write().remove(normalized) {
            Some(_) => Ok(()),
            None => Err(ListenerRegistryError::ListenerNotFound(
                normalized.to_string(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Returns sorted listener ids.
    pub fn listener_ids(&self) -> Vec<String> {
        self.listeners.read().keys().cloned().collect()
    }
}

impl RemoteUpdateListener for ListenerRegistry {
    fn on_remote_update(&self, key: &str) {
        // Snapshot so listeners may (un)register from inside the callback.
        let listeners: Vec<Arc<dyn RemoteUpdateListener>> =
            self.listeners.read().values().cloned().collect();
        debug!(
            "event=remote_update module=sync status=dispatch key={} listeners={}",
            key,
            listeners.len()
        );
        for listener in listeners {
            listener.on_remote_update(key);
        }
    }
}

fn is_valid_listener_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
