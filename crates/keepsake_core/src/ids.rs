//! Entity kinds and local identifier generation.

use serde::{Deserialize, Serialize};

/// The kind of entity a blob or pointer represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Project,
    File,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Project => "project",
            EntityKind::File => "file",
        }
    }

    /// Parse a kind string; unknown values fall back to File.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "user" => EntityKind::User,
            "project" => EntityKind::Project,
            _ => EntityKind::File,
        }
    }

    /// Recover the kind from an id prefix (`user_...`, `project_...`).
    pub fn from_id(id: &str) -> Self {
        match id.split('_').next() {
            Some(prefix) => EntityKind::from_str_lossy(prefix),
            None => EntityKind::File,
        }
    }
}

/// Generate a local entity id of the form `{kind}_{12-hex-char-random}`,
/// e.g. `user_a3f9c2b8e1d4`.
pub fn new_id(kind: EntityKind) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let suffix: u64 = rng.gen_range(0..(1u64 << 48));
    format!("{}_{:012x}", kind.as_str(), suffix)
}
