//! SQLite-backed lesson store.
//!
//! Stores serialized lessons as TEXT keyed by the versioned per-day key.
//! An optional byte quota makes oversized writes fail instead of growing
//! the database without bound.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::LessonStore;

/// SQLite key-value store for lesson JSON.
pub struct SqliteLessonStore {
    conn: Mutex<Connection>,
    /// Maximum total size of stored payloads in bytes.
    max_total_bytes: Option<u64>,
}

impl SqliteLessonStore {
    /// Open (or create) a store at the given path, creating parent dirs.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create lesson store dir {}", parent.display())
            })?;
        }
        let conn = Connection::open(db_path).context("failed to open lesson store database")?;
        Self::with_connection(conn, None)
    }

    /// Create an in-memory store (for testing and ephemeral runs).
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    /// Reject writes that would push the stored payloads past `max_total_bytes`.
    pub fn with_quota(mut self, max_total_bytes: u64) -> Self {
        self.max_total_bytes = Some(max_total_bytes);
        self
    }

    fn with_connection(conn: Connection, max_total_bytes: Option<u64>) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            max_total_bytes,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("lesson store connection mutex poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS lesson_cache (
                cache_key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
            )
            .context("failed to initialize lesson store schema")?;
        Ok(())
    }

    /// Return the total size of stored payloads in bytes.
    pub fn total_size_bytes(&self) -> Result<u64> {
        let size: i64 = self
            .conn()?
            .query_row(
                "SELECT COALESCE(SUM(length(CAST(payload AS BLOB))), 0) FROM lesson_cache",
                [],
                |row| row.get(0),
            )
            .context("failed to query lesson store size")?;
        Ok(size as u64)
    }

    /// Return the number of stored entries.
    pub fn entry_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM lesson_cache", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Bytes currently held by every key except `key`.
    fn size_excluding(&self, conn: &Connection, key: &str) -> Result<u64> {
        let size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(length(CAST(payload AS BLOB))), 0) FROM lesson_cache WHERE cache_key != ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(size as u64)
    }
}

impl LessonStore for SqliteLessonStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let payload = self
            .conn()?
            .query_row(
                "SELECT payload FROM lesson_cache WHERE cache_key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("failed to read lesson store")?;

        debug!(key, hit = payload.is_some(), "lesson store lookup");
        Ok(payload)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;

        if let Some(limit) = self.max_total_bytes {
            let total = self.size_excluding(&conn, key)? + value.len() as u64;
            if total > limit {
                bail!(
                    "lesson store quota exceeded ({} bytes > {} bytes)",
                    total,
                    limit
                );
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO lesson_cache (cache_key, payload, updated_at)
             VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )
        .context("failed to write lesson store")?;

        debug!(key, bytes = value.len(), "lesson store write");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conn()?.execute("DELETE FROM lesson_cache", [])?;
        Ok(())
    }
}
