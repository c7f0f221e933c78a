//! Hash-addressed content blob persistence.
//!
//! Blobs are immutable once written and globally deduplicated: identical
//! payload means identical hash means stored once. There is no update or
//! delete operation, and the core performs no garbage collection.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::canonical::{Payload, hash_payload};
use crate::db::StoreHandle;
use crate::error::Result;
use crate::ids::EntityKind;

/// Content store: `hash -> blob`, deduplicated, immutable once written.
#[derive(Clone)]
pub struct ContentStore {
    handle: StoreHandle,
}

impl ContentStore {
    pub fn new(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// Store a payload and return its content hash.
    ///
    /// Idempotent: repeat calls with an identical payload return the same
    /// hash and leave exactly one stored blob.
    pub fn put(&self, payload: &Payload, kind: EntityKind) -> Result<String> {
        let hash = hash_payload(payload)?;
        let bytes = payload.canonical_bytes()?;
        let conn = self.handle.conn();
        conn.execute(
            "INSERT OR IGNORE INTO content_blobs (hash, payload, format, kind, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                hash,
                bytes,
                payload.format(),
                kind.as_str(),
                Utc::now().timestamp_millis()
            ],
        )?;
        Ok(hash)
    }

    /// Fetch a payload by hash, or `None` if absent.
    pub fn get(&self, hash: &str) -> Result<Option<Payload>> {
        let conn = self.handle.conn();
        let row: Option<(String, Vec<u8>)> = conn
            .query_row(
                "SELECT format, payload FROM content_blobs WHERE hash = ?",
                [hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((format, bytes)) => Ok(Some(Payload::from_stored(&format, bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a blob with this hash exists.
    pub fn contains(&self, hash: &str) -> Result<bool> {
        let conn = self.handle.conn();
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM content_blobs WHERE hash = ?)",
            [hash],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }

    /// Number of stored blobs.
    pub fn count(&self) -> Result<u64> {
        let conn = self.handle.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM content_blobs", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ContentStore {
        ContentStore::new(StoreHandle::open_in_memory().unwrap())
    }

    #[test]
    fn put_twice_stores_once() {
        let store = store();
        let payload = Payload::Json(json!({"greeting": "hello"}));
        let h1 = store.put(&payload, EntityKind::File).unwrap();
        let h2 = store.put(&payload, EntityKind::File).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn get_roundtrips_payload() {
        let store = store();
        let payload = Payload::Json(json!({"a": [1, 2], "b": null}));
        let hash = store.put(&payload, EntityKind::Project).unwrap();
        let fetched = store.get(&hash).unwrap().unwrap();
        assert_eq!(hash_payload(&fetched).unwrap(), hash);
    }

    #[test]
    fn get_missing_returns_none() {
        let store = store();
        assert!(store.get("deadbeef").unwrap().is_none());
        assert!(!store.contains("deadbeef").unwrap());
    }

    #[test]
    fn byte_payloads_are_stored_raw() {
        let store = store();
        let payload = Payload::Bytes(vec![0, 159, 146, 150]);
        let hash = store.put(&payload, EntityKind::File).unwrap();
        assert_eq!(store.get(&hash).unwrap().unwrap(), payload);
    }
}
