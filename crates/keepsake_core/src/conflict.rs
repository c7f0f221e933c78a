//! Pure conflict-resolution decision logic.
//!
//! Given two divergent pointer states, [`resolve`] recommends an action.
//! The recommendation is never applied automatically; the caller (the
//! sync engine, and ultimately the UI collaborator) decides. Every
//! resolution path preserves the losing state, either as a version
//! snapshot or as a renamed pointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pointer::Pointer;

/// The state of one side of a divergent pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerSnapshot {
    pub id: String,
    pub hash: String,
    pub logical_clock: i64,
    pub last_modified: DateTime<Utc>,
}

impl From<&Pointer> for PointerSnapshot {
    fn from(pointer: &Pointer) -> Self {
        Self {
            id: pointer.id.clone(),
            hash: pointer.current_hash.clone(),
            logical_clock: pointer.logical_clock,
            last_modified: pointer.last_modified,
        }
    }
}

/// Action a caller may take on a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionAction {
    /// Adopt the remote state locally (local loses, demoted to history).
    Import,
    /// Push the local state, overwriting remote.
    Overwrite,
    /// Keep both: the losing side is re-created under a fresh local id.
    Rename,
    /// Discard the incoming candidate and change nothing.
    Skip,
}

/// A recommended action plus the reason it was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: ResolutionAction,
    pub reason: String,
}

/// Recommend an action for two divergent pointer states: the side with
/// the newer `last_modified` wins. Ties keep local.
pub fn resolve(local: &PointerSnapshot, remote: &PointerSnapshot) -> Recommendation {
    if remote.last_modified > local.last_modified {
        Recommendation {
            action: ResolutionAction::Import,
            reason: format!(
                "remote modified {} is newer than local {}",
                remote.last_modified, local.last_modified
            ),
        }
    } else if local.last_modified > remote.last_modified {
        Recommendation {
            action: ResolutionAction::Overwrite,
            reason: format!(
                "local modified {} is newer than remote {}",
                local.last_modified, remote.last_modified
            ),
        }
    } else {
        Recommendation {
            action: ResolutionAction::Overwrite,
            reason: "timestamps are equal; keeping local".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snap(hash: &str, clock: i64, millis: i64) -> PointerSnapshot {
        PointerSnapshot {
            id: "project_a3f9c2b8e1d4".to_string(),
            hash: hash.to_string(),
            logical_clock: clock,
            last_modified: Utc.timestamp_millis_opt(millis).single().unwrap(),
        }
    }

    #[test]
    fn newer_remote_recommends_import() {
        let rec = resolve(&snap("aa", 2, 1_000), &snap("bb", 2, 2_000));
        assert_eq!(rec.action, ResolutionAction::Import);
    }

    #[test]
    fn newer_local_recommends_overwrite() {
        let rec = resolve(&snap("aa", 2, 3_000), &snap("bb", 2, 2_000));
        assert_eq!(rec.action, ResolutionAction::Overwrite);
    }

    #[test]
    fn equal_timestamps_keep_local() {
        let rec = resolve(&snap("aa", 2, 2_000), &snap("bb", 2, 2_000));
        assert_eq!(rec.action, ResolutionAction::Overwrite);
        assert!(rec.reason.contains("equal"));
    }
}
