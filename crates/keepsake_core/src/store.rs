//! The [`LocalStore`] facade: one handle owning the content store,
//! pointer store and version log, wired together with the conventional
//! mutation paths (save snapshots a session version and prunes; pulls
//! snapshot the losing state before overwriting).

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::canonical::{Payload, hash_payload};
use crate::content::ContentStore;
use crate::db::StoreHandle;
use crate::error::{Result, StoreError};
use crate::ids::{EntityKind, new_id};
use crate::pointer::{Pointer, PointerStore};
use crate::version::{Version, VersionLabel, VersionLog};

/// Combined local store. Cloning shares the underlying handle.
#[derive(Clone)]
pub struct LocalStore {
    pointers: PointerStore,
    versions: VersionLog,
    session_retention: usize,
}

impl LocalStore {
    /// Newest session versions kept per pointer unless overridden.
    pub const DEFAULT_SESSION_RETENTION: usize = 10;

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_handle(StoreHandle::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_handle(StoreHandle::open_in_memory()?))
    }

    pub fn with_handle(handle: StoreHandle) -> Self {
        Self {
            pointers: PointerStore::new(handle.clone()),
            versions: VersionLog::new(handle),
            session_retention: Self::DEFAULT_SESSION_RETENTION,
        }
    }

    pub fn with_session_retention(mut self, keep_count: usize) -> Self {
        self.session_retention = keep_count;
        self
    }

    pub fn content(&self) -> &ContentStore {
        self.pointers.content()
    }

    pub fn pointers(&self) -> &PointerStore {
        &self.pointers
    }

    pub fn versions(&self) -> &VersionLog {
        &self.versions
    }

    /// Create a pointer (clock 1) and snapshot its initial state.
    pub fn create(
        &self,
        id: &str,
        owner_id: Option<&str>,
        payload: &Payload,
        kind: EntityKind,
    ) -> Result<Pointer> {
        let pointer = self.pointers.create(id, owner_id, payload, kind)?;
        self.versions
            .snapshot(id, &pointer.current_hash, VersionLabel::Session)?;
        Ok(pointer)
    }

    /// The conventional local mutation path: update the pointer, snapshot
    /// the new state as a session version, prune old sessions.
    pub fn save(&self, id: &str, payload: &Payload) -> Result<Pointer> {
        let pointer = self.pointers.update(id, payload)?;
        self.versions
            .snapshot(id, &pointer.current_hash, VersionLabel::Session)?;
        self.versions.prune(id, self.session_retention)?;
        Ok(pointer)
    }

    /// Record a permanent checkpoint of the pointer's current hash.
    pub fn checkpoint(&self, id: &str) -> Result<Version> {
        let pointer = self
            .pointers
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(format!("pointer {}", id)))?;
        self.versions
            .snapshot(id, &pointer.current_hash, VersionLabel::Checkpoint)
    }

    /// Adopt remote state for a pointer (the pull path).
    ///
    /// The losing local state is snapshotted first, so it is demoted to
    /// history rather than destroyed. The payload's recomputed hash must
    /// match the claimed hash.
    pub fn adopt_remote(
        &self,
        id: &str,
        owner_id: Option<&str>,
        kind: EntityKind,
        payload: &Payload,
        claimed_hash: &str,
        logical_clock: i64,
        last_modified: DateTime<Utc>,
    ) -> Result<Pointer> {
        let actual = hash_payload(payload)?;
        if actual != claimed_hash {
            return Err(StoreError::HashMismatch {
                expected: claimed_hash.to_string(),
                actual,
            });
        }
        if let Some(existing) = self.pointers.get(id)? {
            if existing.current_hash != claimed_hash {
                self.versions
                    .snapshot(id, &existing.current_hash, VersionLabel::Session)?;
            }
        }
        self.content().put(payload, kind)?;
        let pointer = self.pointers.apply_remote(
            id,
            owner_id,
            kind,
            claimed_hash,
            logical_clock,
            last_modified,
        )?;
        self.versions
            .snapshot(id, claimed_hash, VersionLabel::Session)?;
        self.versions.prune(id, self.session_retention)?;
        Ok(pointer)
    }

    /// Re-create a losing conflict side under a fresh local id (clock 1).
    pub fn rename_from(
        &self,
        owner_id: Option<&str>,
        payload: &Payload,
        kind: EntityKind,
    ) -> Result<Pointer> {
        let id = new_id(kind);
        self.create(&id, owner_id, payload, kind)
    }

    /// Whether a hash appears in a pointer's recorded history (or as its
    /// current hash). Used as the conservative causal-ancestor test.
    pub fn history_contains(&self, id: &str, hash: &str) -> Result<bool> {
        if let Some(pointer) = self.pointers.get(id)? {
            if pointer.current_hash == hash {
                return Ok(true);
            }
        }
        Ok(self.versions.list(id)?.iter().any(|v| v.hash == hash))
    }

    /// The hash this pointer held before its current one, if recorded.
    pub fn parent_hash(&self, id: &str, current_hash: &str) -> Result<Option<String>> {
        Ok(self
            .versions
            .list(id)?
            .into_iter()
            .map(|v| v.hash)
            .find(|hash| hash != current_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn store() -> LocalStore {
        LocalStore::open_in_memory().unwrap()
    }

    #[test]
    fn save_snapshots_and_prunes() {
        let store = store().with_session_retention(3);
        let id = new_id(EntityKind::Project);
        store
            .create(&id, None, &Payload::Json(json!({"v": 0})), EntityKind::Project)
            .unwrap();
        for v in 1..=6 {
            store.save(&id, &Payload::Json(json!({"v": v}))).unwrap();
        }
        let history = store.versions().list(&id).unwrap();
        assert_eq!(history.len(), 3);
        let pointer = store.pointers().get(&id).unwrap().unwrap();
        assert_eq!(pointer.logical_clock, 7);
        assert_eq!(history[0].hash, pointer.current_hash);
    }

    #[test]
    fn checkpoint_survives_pruning() {
        let store = store().with_session_retention(2);
        let id = new_id(EntityKind::Project);
        store
            .create(&id, None, &Payload::Json(json!({"v": 0})), EntityKind::Project)
            .unwrap();
        store.checkpoint(&id).unwrap();
        for v in 1..=5 {
            store.save(&id, &Payload::Json(json!({"v": v}))).unwrap();
        }
        let history = store.versions().list(&id).unwrap();
        assert!(history.iter().any(|v| v.label == VersionLabel::Checkpoint));
    }

    #[test]
    fn adopt_remote_preserves_losing_state_in_history() {
        let store = store();
        let id = new_id(EntityKind::Project);
        let local = store
            .create(&id, None, &Payload::Json(json!({"side": "local"})), EntityKind::Project)
            .unwrap();

        let remote_payload = Payload::Json(json!({"side": "remote"}));
        let remote_hash = hash_payload(&remote_payload).unwrap();
        let stamped = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
        let adopted = store
            .adopt_remote(
                &id,
                None,
                EntityKind::Project,
                &remote_payload,
                &remote_hash,
                4,
                stamped,
            )
            .unwrap();

        assert_eq!(adopted.current_hash, remote_hash);
        assert_eq!(adopted.logical_clock, 4);
        assert!(store.history_contains(&id, &local.current_hash).unwrap());
    }

    #[test]
    fn adopt_remote_rejects_wrong_hash() {
        let store = store();
        let id = new_id(EntityKind::Project);
        store
            .create(&id, None, &Payload::Json(json!({"v": 1})), EntityKind::Project)
            .unwrap();
        let before = store.pointers().get(&id).unwrap().unwrap();

        let err = store
            .adopt_remote(
                &id,
                None,
                EntityKind::Project,
                &Payload::Json(json!({"v": 2})),
                "0000000000000000000000000000000000000000000000000000000000000000",
                2,
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
        assert_eq!(store.pointers().get(&id).unwrap().unwrap(), before);
    }

    #[test]
    fn rename_from_gets_fresh_id_and_clock_one() {
        let store = store();
        let renamed = store
            .rename_from(Some("user_a3f9c2b8e1d4"), &Payload::Json(json!({"v": 1})), EntityKind::Project)
            .unwrap();
        assert!(renamed.id.starts_with("project_"));
        assert_eq!(renamed.logical_clock, 1);
    }

    #[test]
    fn parent_hash_skips_current() {
        let store = store();
        let id = new_id(EntityKind::Project);
        let first = store
            .create(&id, None, &Payload::Json(json!({"v": 1})), EntityKind::Project)
            .unwrap();
        assert_eq!(store.parent_hash(&id, &first.current_hash).unwrap(), None);
        let second = store.save(&id, &Payload::Json(json!({"v": 2}))).unwrap();
        assert_eq!(
            store.parent_hash(&id, &second.current_hash).unwrap(),
            Some(first.current_hash)
        );
    }
}
