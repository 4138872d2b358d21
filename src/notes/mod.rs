//! Persistent user notes
//!
//! Notes share the SQLite database with the document collection.
use crate::error::{KnowbaseError, Result};
use crate::storage::Database;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Longest accepted title, in characters
pub const MAX_TITLE_CHARS: usize = 100;

/// Note identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteId(Uuid);

impl NoteId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for NoteId {
    type Err = KnowbaseError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| KnowbaseError::validation("id", e.to_string()))
    }
}

/// A stored note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Listing entry without the body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSummary {
    pub id: NoteId,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Note persistence
#[derive(Clone)]
pub struct NoteStore {
    database: Arc<Database>,
}

impl NoteStore {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Validate and store a note
    ///
    /// The title is trimmed and must hold 1 to 100 characters; content must
    /// not be blank. Invalid input is rejected before anything is written.
    pub fn save(&self, title: &str, content: &str) -> Result<NoteId> {
        let title = title.trim();
        validate(title, content)?;

        let id = NoteId::generate();
        let created_at = Utc::now();

        let conn = self.database.get_conn()?;
        conn.execute(
            "INSERT INTO notes (id, title, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id.to_string(), title, content, created_at.timestamp_micros()],
        )?;

        tracing::info!("Saved note {} ({})", id, title);
        Ok(id)
    }

    /// All notes, oldest first
    pub fn list(&self) -> Result<Vec<NoteSummary>> {
        let conn = self.database.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at FROM notes ORDER BY created_at, rowid",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut notes = Vec::new();
        for row in rows {
            let (id, title, created_at) = row?;
            notes.push(NoteSummary {
                id: parse_id(&id)?,
                title,
                created_at: parse_timestamp(created_at)?,
            });
        }
        Ok(notes)
    }

    pub fn get(&self, id: NoteId) -> Result<Option<Note>> {
        let conn = self.database.get_conn()?;
        let row = conn
            .query_row(
                "SELECT title, content, created_at FROM notes WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(title, content, created_at)| {
            Ok(Note {
                id,
                title,
                content,
                created_at: parse_timestamp(created_at)?,
            })
        })
        .transpose()
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.database.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn validate(title: &str, content: &str) -> Result<()> {
    if title.is_empty() {
        return Err(KnowbaseError::validation("title", "must not be empty"));
    }
    let length = title.chars().count();
    if length > MAX_TITLE_CHARS {
        return Err(KnowbaseError::validation(
            "title",
            format!("{} characters exceeds the {} limit", length, MAX_TITLE_CHARS),
        ));
    }
    if content.trim().is_empty() {
        return Err(KnowbaseError::validation("content", "must not be empty"));
    }
    Ok(())
}

fn parse_id(raw: &str) -> Result<NoteId> {
    raw.parse()
        .map_err(|_| KnowbaseError::IndexCorrupted(format!("note id '{}' is not a UUID", raw)))
}

fn parse_timestamp(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| KnowbaseError::IndexCorrupted(format!("note timestamp {} out of range", micros)))
}
