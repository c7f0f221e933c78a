//! Mutable named references to content hashes.
//!
//! A pointer represents a user or project. Its id is immutable after
//! creation. Every local mutation replaces `current_hash` with a new
//! content blob's hash and increments `logical_clock` by exactly 1;
//! `update` is the only way the clock changes locally. Each mutation runs
//! as a single-pointer transaction so readers never observe a half-written
//! record.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use crate::canonical::Payload;
use crate::content::ContentStore;
use crate::db::{StoreHandle, millis_to_datetime};
use crate::error::{Result, StoreError};
use crate::ids::EntityKind;

/// A mutable named reference to a content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct Pointer {
    pub id: String,
    pub owner_id: Option<String>,
    pub kind: EntityKind,
    pub current_hash: String,
    pub last_modified: DateTime<Utc>,
    pub logical_clock: i64,
}

/// Store of pointers, layered over the content store.
#[derive(Clone)]
pub struct PointerStore {
    handle: StoreHandle,
    content: ContentStore,
}

impl PointerStore {
    pub fn new(handle: StoreHandle) -> Self {
        let content = ContentStore::new(handle.clone());
        Self { handle, content }
    }

    /// Create a pointer with `logical_clock = 1`, storing the initial
    /// payload in the content store.
    pub fn create(
        &self,
        id: &str,
        owner_id: Option<&str>,
        initial_payload: &Payload,
        kind: EntityKind,
    ) -> Result<Pointer> {
        let hash = self.content.put(initial_payload, kind)?;
        let now = Utc::now().timestamp_millis();
        let conn = self.handle.conn();
        conn.execute(
            "INSERT INTO pointers (id, owner_id, kind, current_hash, last_modified, logical_clock)
             VALUES (?, ?, ?, ?, ?, 1)",
            params![id, owner_id, kind.as_str(), hash, now],
        )?;
        Ok(Pointer {
            id: id.to_string(),
            owner_id: owner_id.map(|s| s.to_string()),
            kind,
            current_hash: hash,
            last_modified: millis_to_datetime(now),
            logical_clock: 1,
        })
    }

    /// Get a pointer by id.
    pub fn get(&self, id: &str) -> Result<Option<Pointer>> {
        let conn = self.handle.conn();
        conn.query_row(
            "SELECT id, owner_id, kind, current_hash, last_modified, logical_clock
             FROM pointers WHERE id = ?",
            [id],
            row_to_pointer,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Replace a pointer's content: stores the new payload (new or
    /// deduplicated hash), bumps the logical clock by 1 and stamps
    /// `last_modified` with the current wall-clock time.
    ///
    /// The increment and the read-back happen in one statement, so the
    /// returned clock is exact even under racing updates.
    pub fn update(&self, id: &str, new_payload: &Payload) -> Result<Pointer> {
        let existing = self
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(format!("pointer {}", id)))?;
        let hash = self.content.put(new_payload, existing.kind)?;
        let now = Utc::now().timestamp_millis();
        let conn = self.handle.conn();
        conn.query_row(
            "UPDATE pointers
             SET current_hash = ?, last_modified = ?, logical_clock = logical_clock + 1
             WHERE id = ?
             RETURNING id, owner_id, kind, current_hash, last_modified, logical_clock",
            params![hash, now, id],
            row_to_pointer,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("pointer {}", id)))
    }

    /// Overwrite a pointer with state adopted from the remote side,
    /// creating it if absent. The clock never moves backwards: the stored
    /// value is `max(local, remote)`.
    ///
    /// This is the pull path's write; it does not bump the clock.
    pub fn apply_remote(
        &self,
        id: &str,
        owner_id: Option<&str>,
        kind: EntityKind,
        hash: &str,
        logical_clock: i64,
        last_modified: DateTime<Utc>,
    ) -> Result<Pointer> {
        let clock = match self.get(id)? {
            Some(existing) => existing.logical_clock.max(logical_clock),
            None => logical_clock.max(1),
        };
        let millis = last_modified.timestamp_millis();
        let conn = self.handle.conn();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO pointers (id, owner_id, kind, current_hash, last_modified, logical_clock)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 current_hash = excluded.current_hash,
                 last_modified = excluded.last_modified,
                 logical_clock = excluded.logical_clock",
            params![id, owner_id, kind.as_str(), hash, millis, clock],
        )?;
        tx.commit()?;
        Ok(Pointer {
            id: id.to_string(),
            owner_id: owner_id.map(|s| s.to_string()),
            kind,
            current_hash: hash.to_string(),
            last_modified: millis_to_datetime(millis),
            logical_clock: clock,
        })
    }

    /// Raise a pointer's clock so it causally supersedes a revision at
    /// `other_clock`, stamping `last_modified`. No-op when already ahead.
    ///
    /// Used when a conflict resolution keeps this pointer's state: the
    /// kept side must dominate the discarded revision or the two would
    /// stay concurrent forever.
    pub fn advance_clock_past(&self, id: &str, other_clock: i64) -> Result<Pointer> {
        let existing = self
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(format!("pointer {}", id)))?;
        if existing.logical_clock > other_clock {
            return Ok(existing);
        }
        let clock = other_clock + 1;
        let now = Utc::now().timestamp_millis();
        let conn = self.handle.conn();
        conn.execute(
            "UPDATE pointers SET logical_clock = ?, last_modified = ? WHERE id = ?",
            params![clock, now, id],
        )?;
        Ok(Pointer {
            logical_clock: clock,
            last_modified: millis_to_datetime(now),
            ..existing
        })
    }

    /// Delete a pointer; versions referencing it are cascaded away.
    /// Content blobs are left in place (shared ownership, no refcounting).
    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.handle.conn();
        let deleted = conn.execute("DELETE FROM pointers WHERE id = ?", [id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(format!("pointer {}", id)));
        }
        log::debug!("deleted pointer {} (versions cascaded)", id);
        Ok(())
    }

    /// List pointers belonging to an owner.
    pub fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Pointer>> {
        let conn = self.handle.conn();
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, kind, current_hash, last_modified, logical_clock
             FROM pointers WHERE owner_id = ? ORDER BY last_modified DESC",
        )?;
        let pointers = stmt
            .query_map([owner_id], row_to_pointer)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pointers)
    }

    /// List every pointer in the store (the sync engine's work set).
    pub fn list_all(&self) -> Result<Vec<Pointer>> {
        let conn = self.handle.conn();
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, kind, current_hash, last_modified, logical_clock
             FROM pointers ORDER BY id",
        )?;
        let pointers = stmt
            .query_map([], row_to_pointer)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pointers)
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }
}

fn row_to_pointer(row: &rusqlite::Row<'_>) -> std::result::Result<Pointer, rusqlite::Error> {
    Ok(Pointer {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        kind: EntityKind::from_str_lossy(&row.get::<_, String>(2)?),
        current_hash: row.get(3)?,
        last_modified: millis_to_datetime(row.get(4)?),
        logical_clock: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::new_id;
    use chrono::TimeZone;
    use serde_json::json;

    fn store() -> PointerStore {
        PointerStore::new(StoreHandle::open_in_memory().unwrap())
    }

    #[test]
    fn create_starts_at_clock_one() {
        let store = store();
        let id = new_id(EntityKind::Project);
        let pointer = store
            .create(&id, Some("user_a3f9c2b8e1d4"), &Payload::Json(json!({"v": 1})), EntityKind::Project)
            .unwrap();
        assert_eq!(pointer.logical_clock, 1);
        assert_eq!(store.get(&id).unwrap().unwrap(), pointer);
    }

    #[test]
    fn update_bumps_clock_by_exactly_one() {
        let store = store();
        let id = new_id(EntityKind::Project);
        store
            .create(&id, None, &Payload::Json(json!({"v": 1})), EntityKind::Project)
            .unwrap();
        for expected in 2..=5 {
            let pointer = store
                .update(&id, &Payload::Json(json!({"v": expected})))
                .unwrap();
            assert_eq!(pointer.logical_clock, expected);
        }
    }

    #[test]
    fn update_missing_pointer_is_not_found() {
        let store = store();
        let err = store
            .update("project_000000000000", &Payload::Json(json!({})))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn identical_update_dedupes_content_but_still_bumps_clock() {
        let store = store();
        let id = new_id(EntityKind::Project);
        let payload = Payload::Json(json!({"same": true}));
        let created = store.create(&id, None, &payload, EntityKind::Project).unwrap();
        let updated = store.update(&id, &payload).unwrap();
        assert_eq!(created.current_hash, updated.current_hash);
        assert_eq!(updated.logical_clock, 2);
        assert_eq!(store.content().count().unwrap(), 1);
    }

    #[test]
    fn racing_updates_each_return_an_exact_clock() {
        let store = store();
        let id = new_id(EntityKind::Project);
        store
            .create(&id, None, &Payload::Json(json!({"v": 0})), EntityKind::Project)
            .unwrap();

        let mut clocks: Vec<i64> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|worker| {
                    let store = store.clone();
                    let id = id.clone();
                    scope.spawn(move || {
                        (0..5)
                            .map(|n| {
                                store
                                    .update(&id, &Payload::Json(json!({"worker": worker, "n": n})))
                                    .unwrap()
                                    .logical_clock
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|w| w.join().unwrap())
                .collect()
        });

        // 20 updates from clock 1: every returned clock is distinct and
        // the set is exactly 2..=21.
        clocks.sort_unstable();
        assert_eq!(clocks, (2..=21).collect::<Vec<i64>>());
        assert_eq!(store.get(&id).unwrap().unwrap().logical_clock, 21);
    }

    #[test]
    fn apply_remote_never_lowers_clock() {
        let store = store();
        let id = new_id(EntityKind::Project);
        store
            .create(&id, None, &Payload::Json(json!({"v": 1})), EntityKind::Project)
            .unwrap();
        store.update(&id, &Payload::Json(json!({"v": 2}))).unwrap();
        store.update(&id, &Payload::Json(json!({"v": 3}))).unwrap();

        let stamped = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
        let applied = store
            .apply_remote(&id, None, EntityKind::Project, "abc123", 2, stamped)
            .unwrap();
        assert_eq!(applied.logical_clock, 3);
        assert_eq!(applied.current_hash, "abc123");
    }

    #[test]
    fn advance_clock_past_supersedes_or_noops() {
        let store = store();
        let id = new_id(EntityKind::Project);
        store
            .create(&id, None, &Payload::Json(json!({"v": 1})), EntityKind::Project)
            .unwrap();

        let advanced = store.advance_clock_past(&id, 4).unwrap();
        assert_eq!(advanced.logical_clock, 5);

        // Already ahead: nothing changes.
        let unchanged = store.advance_clock_past(&id, 3).unwrap();
        assert_eq!(unchanged.logical_clock, 5);
    }

    #[test]
    fn list_by_owner_filters() {
        let store = store();
        let owner = new_id(EntityKind::User);
        let p1 = new_id(EntityKind::Project);
        let p2 = new_id(EntityKind::Project);
        store
            .create(&p1, Some(&owner), &Payload::Json(json!({"n": 1})), EntityKind::Project)
            .unwrap();
        store
            .create(&p2, Some("user_ffffffffffff"), &Payload::Json(json!({"n": 2})), EntityKind::Project)
            .unwrap();
        let mine = store.list_by_owner(&owner).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, p1);
    }

    #[test]
    fn delete_missing_is_not_found() {
        let store = store();
        assert!(matches!(
            store.delete("project_000000000000").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }
}
