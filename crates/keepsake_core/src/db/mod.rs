//! SQLite store handle with an explicit open/teardown lifecycle.
//!
//! Every store borrows the same [`StoreHandle`]; there is no ambient
//! global connection. Cloning the handle is cheap and shares the
//! underlying connection, which serializes access through a mutex so a
//! read-modify-write sequence on one pointer is atomic.

mod schema;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;

/// Shared handle to the local SQLite database.
#[derive(Clone)]
pub struct StoreHandle {
    conn: Arc<Mutex<Connection>>,
}

impl StoreHandle {
    /// Open (or create) the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

/// Convert an epoch-millis column value to a `DateTime<Utc>`.
pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_on_disk_initializes_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keepsake.db");
        let handle = StoreHandle::open(&path).unwrap();
        let count: i64 = handle
            .conn()
            .query_row("SELECT COUNT(*) FROM pointers", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        // Reopening the same file is fine; schema init is idempotent.
        drop(handle);
        StoreHandle::open(&path).unwrap();
    }
}
