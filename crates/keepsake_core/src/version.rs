//! Append-only version log for pointer history.
//!
//! A snapshot is written alongside (not replacing) each pointer update.
//! Retention keeps only the newest N `session` snapshots per pointer;
//! `checkpoint` snapshots are never auto-pruned.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::{StoreHandle, millis_to_datetime};
use crate::error::Result;

/// Snapshot label: automatically retained recent edit vs. permanent,
/// user-requested checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionLabel {
    Session,
    Checkpoint,
}

impl VersionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionLabel::Session => "session",
            VersionLabel::Checkpoint => "checkpoint",
        }
    }

    /// Parse a label string; unknown values fall back to Session.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "checkpoint" => VersionLabel::Checkpoint,
            _ => VersionLabel::Session,
        }
    }
}

/// One entry in a pointer's hash history.
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    pub id: i64,
    pub pointer_id: String,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub label: VersionLabel,
}

/// Append-only history of pointer hashes, with retention.
#[derive(Clone)]
pub struct VersionLog {
    handle: StoreHandle,
}

impl VersionLog {
    pub fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Append a snapshot. Always succeeds, independent of whether the
    /// hash differs from the previous snapshot; callers decide when.
    pub fn snapshot(&self, pointer_id: &str, hash: &str, label: VersionLabel) -> Result<Version> {
        let now = Utc::now().timestamp_millis();
        let conn = self.handle.conn();
        conn.execute(
            "INSERT INTO versions (pointer_id, hash, timestamp, label) VALUES (?, ?, ?, ?)",
            params![pointer_id, hash, now, label.as_str()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Version {
            id,
            pointer_id: pointer_id.to_string(),
            hash: hash.to_string(),
            timestamp: millis_to_datetime(now),
            label,
        })
    }

    /// List a pointer's versions, newest first.
    pub fn list(&self, pointer_id: &str) -> Result<Vec<Version>> {
        let conn = self.handle.conn();
        let mut stmt = conn.prepare(
            "SELECT id, pointer_id, hash, timestamp, label
             FROM versions WHERE pointer_id = ?
             ORDER BY timestamp DESC, id DESC",
        )?;
        let versions = stmt
            .query_map([pointer_id], |row| {
                Ok(Version {
                    id: row.get(0)?,
                    pointer_id: row.get(1)?,
                    hash: row.get(2)?,
                    timestamp: millis_to_datetime(row.get(3)?),
                    label: VersionLabel::from_str_lossy(&row.get::<_, String>(4)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    /// Delete all but the newest `keep_count` session-labeled versions of
    /// a pointer; checkpoints are exempt. Returns the number deleted.
    /// Idempotent.
    pub fn prune(&self, pointer_id: &str, keep_count: usize) -> Result<usize> {
        let conn = self.handle.conn();
        let deleted = conn.execute(
            "DELETE FROM versions
             WHERE pointer_id = ?1 AND label = 'session' AND id NOT IN (
                 SELECT id FROM versions
                 WHERE pointer_id = ?1 AND label = 'session'
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2
             )",
            params![pointer_id, keep_count as i64],
        )?;
        if deleted > 0 {
            log::debug!("pruned {} session versions of {}", deleted, pointer_id);
        }
        Ok(deleted)
    }
}
