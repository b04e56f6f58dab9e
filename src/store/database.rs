//! SQLite database management with migrations
//!
//! Holds collection metadata and per-row metadata; vectors live in
//! per-collection segment files referenced by slot.

use crate::error::{Result, TrawlError};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrawlError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| TrawlError::Config(format!("Failed to create connection pool: {}", e)))?;

        // Configure connection
        {
            let conn = pool
                .get()
                .map_err(|e| TrawlError::Config(format!("Failed to get connection: {}", e)))?;

            // WAL keeps readers unblocked while one writer is active
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| TrawlError::Config(format!("Failed to get connection: {}", e)))
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

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

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

        let row_count: i64 = conn.query_row("SELECT COUNT(*) FROM rows", [], |row| row.get(0))?;

        Ok(DbStats {
            collection_count: collection_count as usize,
            row_count: row_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub collection_count: usize,
    pub row_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Collections: typed, named containers sharing one embedding dimension
    CREATE TABLE collections (
        name TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        embedding_dim INTEGER NOT NULL,
        embedding_model TEXT NOT NULL,
        distance TEXT NOT NULL DEFAULT 'cosine',
        created_at INTEGER NOT NULL
    );

    -- Rows: document + scalar metadata; slot points into the vector segment
    CREATE TABLE rows (
        collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
        id TEXT NOT NULL,
        document TEXT NOT NULL,
        metadata TEXT NOT NULL,
        slot INTEGER NOT NULL,
        PRIMARY KEY (collection, id)
    );

    CREATE UNIQUE INDEX idx_rows_slot ON rows(collection, slot);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("trawl.sqlite3");

        let _db = Database::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("trawl.sqlite3");

        let db = Database::new(&db_path).unwrap();

        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();

        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_schema_exists() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("trawl.sqlite3");

        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();

        for table in ["collections", "rows"] {
            let count: i32 = conn
                .query_row(
                    &format!(
                        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='{}'",
                        table
                    ),
                    [],
                    |row| row.get(0),
                )
                .unwrap();

            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_row_delete_cascades_from_collection() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("trawl.sqlite3");

        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();

        conn.execute(
            "INSERT INTO collections (name, kind, embedding_dim, embedding_model, created_at)
             VALUES ('messages', 'messages', 8, 'stub', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO rows (collection, id, document, metadata, slot)
             VALUES ('messages', 'm1', 'hello', '{}', 0)",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM collections WHERE name = 'messages'", [])
            .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM rows", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
