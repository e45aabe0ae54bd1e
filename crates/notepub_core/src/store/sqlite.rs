//! SQLite-backed note store.
//!
//! # Invariants
//! - Writes validate the note key before touching SQL.
//! - `published` is stored as `0/1`; any other persisted value is rejected
//!   on read instead of being coerced.

use crate::db::{open_db, open_db_in_memory};
use crate::model::note::Note;
use crate::store::{NoteStore, StoreError, StoreResult};
use log::{debug, error};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const NOTE_SELECT_SQL: &str = "SELECT key, content, published, modified_at_ms FROM notes";

/// Note store over one serialized SQLite connection.
pub struct SqliteNoteStore {
    conn: Mutex<Connection>,
}

impl SqliteNoteStore {
    /// Wraps an already-migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    /// Loads one note by key.
    pub fn get(&self, key: &str) -> StoreResult<Option<Note>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("{NOTE_SELECT_SQL} WHERE key = ?1;"),
                [key],
                read_row,
            )
            .optional()?;
        row.map(note_from_row).transpose()
    }

    /// Lists published notes, most recently modified first.
    pub fn list_published(&self) -> StoreResult<Vec<Note>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{NOTE_SELECT_SQL} WHERE published = 1 ORDER BY modified_at_ms DESC, key ASC;"
        ))?;
        let rows = stmt.query_map([], read_row)?;
        let mut notes = Vec::new();
        for row in rows {
            notes.push(note_from_row(row?)?);
        }
        Ok(notes)
    }
}

impl NoteStore for SqliteNoteStore {
    fn save(&self, note: &Note) -> StoreResult<()> {
        note.validate()?;

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO notes (key, content, published, modified_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET
                content = excluded.content,
                published = excluded.published,
                modified_at_ms = excluded.modified_at_ms;",
            params![
                note.key.as_str(),
                note.content.as_str(),
                i64::from(note.published),
                note.modified_at_ms,
            ],
        );

        match result {
            Ok(_) => {
                debug!(
                    "event=note_save module=store status=ok key={} published={}",
                    note.key, note.published
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=note_save module=store status=error key={} error_code=db_write_failed error={}",
                    note.key, err
                );
                Err(err.into())
            }
        }
    }

    fn load(&self, key: &str) -> StoreResult<Option<Note>> {
        self.get(key)
    }
}

type NoteRow = (String, String, i64, i64);

fn read_row(row: &Row<'_>) -> rusqlite::Result<NoteRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn note_from_row((key, content, published, modified_at_ms): NoteRow) -> StoreResult<Note> {
    let published = match published {
        0 => false,
        1 => true,
        other => {
            return Err(StoreError::InvalidData(format!(
                "note `{key}` has published={other}"
            )))
        }
    };
    Ok(Note {
        key,
        content,
        published,
        modified_at_ms,
    })
}
