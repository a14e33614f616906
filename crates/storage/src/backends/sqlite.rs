#![forbid(unsafe_code)]

use crate::{BlobStore, StoreError};
use ho_core::keys::BlobKey;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Blob namespace in a single SQLite table. Each statement touches exactly one row, which
/// gives the same single-key atomicity as an object store and nothing more.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
              key TEXT PRIMARY KEY,
              value BLOB NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
        .min(i64::MAX as u128) as i64
}

impl BlobStore for SqliteStore {
    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let value = conn
            .query_row(
                "SELECT value FROM blobs WHERE key=?1",
                params![key.as_str()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &BlobKey, value: &[u8]) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            r#"
            INSERT INTO blobs(key, value, updated_at_ms) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE
              SET value=excluded.value, updated_at_ms=excluded.updated_at_ms
            "#,
            params![key.as_str(), value, now_ms()],
        )?;
        Ok(())
    }

    fn delete(&self, key: &BlobKey) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute("DELETE FROM blobs WHERE key=?1", params![key.as_str()])?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobKey>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT key FROM blobs WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key ASC",
        )?;
        let mut rows = stmt.query(params![prefix])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            out.push(BlobKey::try_new(key)?);
        }
        Ok(out)
    }

    fn exists(&self, key: &BlobKey) -> Result<bool, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM blobs WHERE key=?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }
}
