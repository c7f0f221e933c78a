//! Remote pointer record codec.
//!
//! A record is the metadata half of a remote pointer: the content hash it
//! references plus the ordering fields (logical clock, wall-clock
//! timestamp) and the hash it replaced. Payload bytes live separately
//! under the content-addressed `file/` namespace.
//!
//! Records written during the legacy flat key era predate logical clocks
//! and used a different timestamp field name. Rather than sniffing for
//! optional fields at call sites, decoding goes through a versioned wire
//! variant with an explicit upgrade on read.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use keepsake_core::EntityKind;

/// Current remote pointer record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub hash: String,
    /// Hash this revision replaced, if known. Lets the other side prove
    /// one-step causal ancestry without seeing our full history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Payload storage format (`json` or `bytes`).
    pub format: String,
    pub logical_clock: i64,
    /// Epoch milliseconds.
    pub last_modified: i64,
}

/// Legacy flat-era record: no logical clock, `modified` seconds field.
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    id: String,
    hash: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    modified: Option<i64>,
}

impl LegacyRecord {
    fn upgrade(self) -> RemoteRecord {
        RemoteRecord {
            kind: EntityKind::from_id(&self.id),
            owner: None,
            parent: None,
            format: self.format.unwrap_or_else(|| "json".to_string()),
            logical_clock: 1,
            last_modified: self.modified.map(|secs| secs * 1000).unwrap_or(0),
            id: self.id,
            hash: self.hash,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireRecord {
    Current(RemoteRecord),
    Legacy(LegacyRecord),
}

impl RemoteRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a record, upgrading legacy-format records on read.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let wire: WireRecord = serde_json::from_slice(bytes)?;
        Ok(match wire {
            WireRecord::Current(record) => record,
            WireRecord::Legacy(legacy) => legacy.upgrade(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let record = RemoteRecord {
            id: "project_a3f9c2b8e1d4".to_string(),
            kind: EntityKind::Project,
            owner: Some("user_0011aabbccdd".to_string()),
            hash: "ff".repeat(32),
            parent: Some("ee".repeat(32)),
            format: "json".to_string(),
            logical_clock: 7,
            last_modified: 1_700_000_000_000,
        };
        let decoded = RemoteRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn legacy_records_upgrade_on_read() {
        let bytes = br#"{"id":"project_a3f9c2b8e1d4","hash":"abcd","modified":1700000000}"#;
        let record = RemoteRecord::decode(bytes).unwrap();
        assert_eq!(record.logical_clock, 1);
        assert_eq!(record.kind, EntityKind::Project);
        assert_eq!(record.hash, "abcd");
        assert_eq!(record.last_modified, 1_700_000_000_000);
        assert_eq!(record.format, "json");
        assert_eq!(record.parent, None);
    }
}
