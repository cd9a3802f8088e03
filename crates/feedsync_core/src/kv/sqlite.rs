//! SQLite-backed key-value storage.

use crate::kv::schema::{self, prepare};
use crate::kv::{KeyValueStore, KvError, KvResult};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Key-value storage persisted in the `kv_entries` table.
pub struct SqliteKeyValueStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    /// Opens the storage file at `path`, creating and migrating it as needed.
    ///
    /// # Errors
    /// - `KvError::ForeignFile` when `path` is another application's SQLite file.
    /// - `KvError::UnsupportedSchema` when a newer build wrote the file.
    pub fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        let path = path.as_ref();
        Self::open_with("file", || Connection::open(path))
    }

    pub fn open_in_memory() -> KvResult<Self> {
        Self::open_with("memory", Connection::open_in_memory)
    }

    /// Schema version recorded in the open file.
    pub fn schema_version(&self) -> KvResult<u32> {
        let conn = self.lock()?;
        schema::stored_version(&conn)
    }

    fn open_with(
        mode: &'static str,
        opener: impl FnOnce() -> rusqlite::Result<Connection>,
    ) -> KvResult<Self> {
        let started_at = Instant::now();
        let result = opener().map_err(KvError::from).and_then(|mut conn| {
            prepare(&mut conn)?;
            Ok(conn)
        });

        match result {
            Ok(conn) => {
                info!(
                    "event=kv_open module=kv status=ok mode={mode} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(Self {
                    conn: Mutex::new(conn),
                })
            }
            Err(err) => {
                error!(
                    "event=kv_open module=kv status=error mode={mode} duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn lock(&self) -> KvResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| KvError::Poisoned)
    }
}

fn select_value(conn: &Connection, key: &str) -> KvResult<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM kv_entries WHERE key = ?1;",
            [key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value)
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> KvResult<Option<String>> {
        let conn = self.lock()?;
        select_value(&conn, key)
    }

    fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv_entries (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> KvResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM kv_entries WHERE key = ?1;", [key])?;
        Ok(changed > 0)
    }

    fn take(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = select_value(&tx, key)?;
        if value.is_some() {
            tx.execute("DELETE FROM kv_entries WHERE key = ?1;", [key])?;
        }
        tx.commit()?;
        Ok(value)
    }
}
