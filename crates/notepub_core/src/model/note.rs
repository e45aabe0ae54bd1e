//! Note domain model.
//!
//! # Responsibility
//! - Define the note record whose publish flag is toggled by the tracker.
//! - Own the note-key grammar shared by persistence and sync paths.
//!
//! # Invariants
//! - `key` is stable and never reused for another note.
//! - `key` matches the note-key grammar (`[A-Za-z0-9._%-]`, 1..=256 chars).
//! - `modified_at_ms` is unix epoch milliseconds.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static NOTE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%\-]{1,256}$").expect("valid note key regex"));

/// Validation failures for note identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteValidationError {
    /// Key is empty after trimming.
    EmptyKey,
    /// Key contains characters outside the grammar or is too long.
    InvalidKey(String),
}

impl Display for NoteValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyKey => write!(f, "note key cannot be empty"),
            Self::InvalidKey(value) => write!(f, "note key is invalid: `{value}`"),
        }
    }
}

impl Error for NoteValidationError {}

/// Note record synchronized with the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Remote-store identity, unique per note.
    pub key: String,
    /// Markdown body.
    pub content: String,
    /// Whether the note is publicly published.
    pub published: bool,
    /// Last local modification, unix epoch milliseconds.
    pub modified_at_ms: i64,
}

impl Note {
    /// Creates an unpublished note with a generated key.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            key: Uuid::new_v4().simple().to_string(),
            content: content.into(),
            published: false,
            modified_at_ms: 0,
        }
    }

    /// Creates an unpublished note with a caller-provided key.
    ///
    /// Used by sync paths where identity already exists remotely.
    pub fn with_key(
        key: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Self, NoteValidationError> {
        let key = key.into();
        validate_note_key(key.as_str())?;
        Ok(Self {
            key,
            content: content.into(),
            published: false,
            modified_at_ms: 0,
        })
    }

    /// Re-checks the key grammar on an existing record.
    pub fn validate(&self) -> Result<(), NoteValidationError> {
        validate_note_key(self.key.as_str())
    }
}

/// Checks one raw key against the note-key grammar.
pub fn validate_note_key(key: &str) -> Result<(), NoteValidationError> {
    if key.trim().is_empty() {
        return Err(NoteValidationError::EmptyKey);
    }
    if !NOTE_KEY_RE.is_match(key) {
        return Err(NoteValidationError::InvalidKey(key.to_string()));
    }
    Ok(())
}
