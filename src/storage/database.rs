//! SQLite database management with migrations
//!
//! Backs the persisted collections and the note store

use crate::error::{KnowbaseError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::{Path, PathBuf};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the database at `db_path`
    ///
    /// Fails with `StorageUnavailable` when the location cannot be created
    /// or opened, and with `IndexCorrupted` when the file is not a usable
    /// SQLite database.
    pub fn new(db_path: &Path) -> Result<Self> {
        let unavailable = |message: String| KnowbaseError::StorageUnavailable {
            path: db_path.to_path_buf(),
            message,
        };

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| unavailable(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| unavailable(format!("failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| unavailable(format!("failed to get connection: {}", e)))?;

            // WAL lets searches read while a batch is being written
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                ",
            )
            .map_err(|e| match KnowbaseError::from(e) {
                KnowbaseError::Database(e) => unavailable(e.to_string()),
                other => other,
            })?;
        }

        let db = Self {
            pool,
            path: db_path.to_path_buf(),
        };

        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| KnowbaseError::StorageUnavailable {
                path: self.path.clone(),
                message: format!("failed to get connection: {}", e),
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes on disk, including the write-ahead log
    pub fn size_on_disk(&self) -> u64 {
        let mut files = vec![self.path.clone()];
        for suffix in ["-wal", "-shm"] {
            let mut name = self.path.as_os_str().to_owned();
            name.push(suffix);
            files.push(PathBuf::from(name));
        }

        files
            .iter()
            .filter_map(|path| std::fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum()
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let collection_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM collections", [], |row| row.get(0))?;

        let entry_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;

        let note_count: i64 = conn.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;

        Ok(DbStats {
            collection_count: collection_count as usize,
            entry_count: entry_count as usize,
            note_count: note_count as usize,
            total_size_bytes: self.size_on_disk(),
        })
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub collection_count: usize,
    pub entry_count: usize,
    pub note_count: usize,
    pub total_size_bytes: u64,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Named collections; the dimension is fixed at creation
    CREATE TABLE collections (
        name TEXT PRIMARY KEY,
        dimension INTEGER NOT NULL,
        model TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    -- One row per indexed chunk; id order is insertion order
    CREATE TABLE entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        collection TEXT NOT NULL,
        source TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        char_offset INTEGER NOT NULL,
        char_length INTEGER NOT NULL,
        text TEXT NOT NULL,
        metadata TEXT NOT NULL,  -- JSON metadata
        vector BLOB NOT NULL,    -- little-endian f32
        checksum TEXT NOT NULL,  -- BLAKE3 of vector + text
        FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
    );

    CREATE INDEX idx_entries_collection ON entries(collection);
    CREATE INDEX idx_entries_source ON entries(source);

    -- User notes
    CREATE TABLE notes (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_notes_created_at ON notes(created_at);
    "#,
    // Migration 2: Record when a collection was last built, reloaded, or reset
    r#"
    ALTER TABLE collections ADD COLUMN built_at INTEGER;
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let _db = Database::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();

        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();

        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_reopen_does_not_rerun_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        drop(Database::new(&db_path).unwrap());
        let db = Database::new(&db_path).unwrap();

        let conn = db.get_conn().unwrap();
        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_schema_exists() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();

        for table in ["collections", "entries", "notes"] {
            let count: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();

            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_garbage_file_is_reported_corrupted() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        std::fs::write(&db_path, vec![0x42u8; 8192]).unwrap();

        let result = Database::new(&db_path);
        assert!(matches!(result, Err(KnowbaseError::IndexCorrupted(_))));
    }

    #[test]
    fn test_unwritable_location_is_storage_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let result = Database::new(&blocker.join("test.db"));
        assert!(matches!(
            result,
            Err(KnowbaseError::StorageUnavailable { .. })
        ));
    }

    #[test]
    fn test_stats_on_empty_database() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.note_count, 0);
        assert!(stats.total_size_bytes > 0);
    }
}
