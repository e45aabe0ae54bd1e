//! Note persistence contracts.
//!
//! # Responsibility
//! - Define the persistence hook the publish tracker calls after mutating a note.
//! - Give the tracker a read path so acknowledged callbacks see the latest note.
//! - Isolate SQL details inside `sqlite`.
//!
//! # Invariants
//! - `save` and `load` are synchronous and never called with the tracker
//!   lock held.

use crate::db::DbError;
use crate::model::note::{Note, NoteValidationError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub mod sqlite;

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence failures surfaced to callers.
#[derive(Debug)]
pub enum StoreError {
    Validation(NoteValidationError),
    Db(DbError),
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted note data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<NoteValidationError> for StoreError {
    fn from(value: NoteValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Persistence hook invoked after every local publish-state mutation.
pub trait NoteStore {
    fn save(&self, note: &Note) -> StoreResult<()>;

    /// Reads the note as currently persisted.
    ///
    /// Write-only stores keep the default; the tracker then hands callbacks
    /// the note as it was when the request registered.
    fn load(&self, _key: &str) -> StoreResult<Option<Note>> {
        Ok(None)
    }
}

impl<T: NoteStore + ?Sized> NoteStore for Arc<T> {
    fn save(&self, note: &Note) -> StoreResult<()> {
        (**self).save(note)
    }

    fn load(&self, key: &str) -> StoreResult<Option<Note>> {
        (**self).load(key)
    }
}

impl<T: NoteStore + ?Sized> NoteStore for &T {
    fn save(&self, note: &Note) -> StoreResult<()> {
        (**self).save(note)
    }

    fn load(&self, key: &str) -> StoreResult<Option<Note>> {
        (**self).load(key)
    }
}
