//! Schema bootstrap for the SQLite key-value file.
//!
//! # Invariants
//! - A file is adopted only when it is empty or already carries
//!   `KV_APPLICATION_ID`; any other SQLite file is left untouched.
//! - `PRAGMA user_version` equals the number of applied schema steps.
//! - All pending steps and the header update commit in one transaction.

use crate::kv::{KvError, KvResult};
use log::{debug, info};
use rusqlite::Connection;
use std::time::Duration;

/// `PRAGMA application_id` stamped on key-value files ("FDSY").
pub const KV_APPLICATION_ID: i32 = 0x4644_5359;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Schema steps; step `n` moves `user_version` from `n - 1` to `n`.
const SCHEMA_STEPS: &[&str] = &[include_str!("sql/0001_kv_entries.sql")];

/// Schema version written by this build.
pub fn supported_version() -> u32 {
    SCHEMA_STEPS.len() as u32
}

/// Reads `user_version` of an open connection.
pub fn stored_version(conn: &Connection) -> KvResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}

/// Configures `conn` and brings its key-value schema up to date.
pub(crate) fn prepare(conn: &mut Connection) -> KvResult<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;

    let application_id = conn.query_row("PRAGMA application_id;", [], |row| row.get::<_, i32>(0))?;
    let found = stored_version(conn)?;
    let supported = supported_version();

    if application_id != 0 && application_id != KV_APPLICATION_ID {
        return Err(KvError::ForeignFile { application_id });
    }
    if found > supported {
        return Err(KvError::UnsupportedSchema { found, supported });
    }
    if application_id == KV_APPLICATION_ID && found == supported {
        return Ok(());
    }
    if application_id == 0 && has_tables(conn)? {
        return Err(KvError::ForeignFile { application_id });
    }

    let tx = conn.transaction()?;
    for (index, sql) in SCHEMA_STEPS.iter().enumerate().skip(found as usize) {
        tx.execute_batch(sql)?;
        debug!("event=kv_schema module=kv status=step version={}", index + 1);
    }
    tx.execute_batch(&format!(
        "PRAGMA application_id = {KV_APPLICATION_ID}; PRAGMA user_version = {supported};"
    ))?;
    tx.commit()?;

    info!("event=kv_schema module=kv status=ok from={found} to={supported}");
    Ok(())
}

fn has_tables(conn: &Connection) -> KvResult<bool> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table';",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::{prepare, stored_version, supported_version, KV_APPLICATION_ID};
    use crate::kv::KvError;
    use rusqlite::Connection;

    #[test]
    fn fresh_connection_is_tagged_and_migrated() {
        let mut conn = Connection::open_in_memory().unwrap();
        prepare(&mut conn).unwrap();

        let application_id: i32 = conn
            .query_row("PRAGMA application_id;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(application_id, KV_APPLICATION_ID);
        assert_eq!(stored_version(&conn).unwrap(), supported_version());

        prepare(&mut conn).unwrap();
    }

    #[test]
    fn untagged_file_with_tables_is_not_adopted() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE notes (id TEXT);").unwrap();

        let err = prepare(&mut conn).unwrap_err();
        assert!(matches!(err, KvError::ForeignFile { application_id: 0 }));
    }
}
