//! Remote key layout.
//!
//! The remote service is a flat key -> opaque-value map with prefix
//! listing. Account data lives under a domain-scoped namespace derived
//! from the account email; content blobs live under the global,
//! content-addressed `file/` namespace, which is public and never
//! deleted (its key is a content hash, so collisions imply identical
//! content).
//!
//! ```text
//! domain/{domain}/user/{localpart}/profile
//! domain/{domain}/user/{localpart}/project/latest/{project_id}/{version}
//! domain/{domain}/user/{localpart}/project/version/{version}
//! file/{hash[0:2]}/{hash[2:4]}/{hash}
//! ```
//!
//! `{version}` is `version_` followed by the first 16 hex chars of the
//! content hash. The pre-migration layout was `user/{email}/...`.

use crate::error::{Result, SyncError};

/// Account identity: an email split into localpart and domain. There is
/// no separate numeric user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    pub localpart: String,
    pub domain: String,
}

impl Identity {
    pub fn from_email(email: &str) -> Result<Self> {
        let (localpart, domain) = email
            .split_once('@')
            .ok_or_else(|| SyncError::InvalidIdentity(format!("no '@' in {:?}", email)))?;
        if localpart.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(SyncError::InvalidIdentity(email.to_string()));
        }
        Ok(Self {
            email: email.to_string(),
            localpart: localpart.to_string(),
            domain: domain.to_string(),
        })
    }

    /// Prefix of everything this account owns in the scoped namespace.
    pub fn user_prefix(&self) -> String {
        format!("domain/{}/user/{}/", self.domain, self.localpart)
    }

    /// Prefix of everything this account owned in the legacy flat layout.
    pub fn legacy_prefix(&self) -> String {
        format!("user/{}/", self.email)
    }

    pub fn profile_key(&self) -> String {
        format!("{}profile", self.user_prefix())
    }

    pub fn project_latest_prefix(&self, project_id: &str) -> String {
        format!("{}project/latest/{}/", self.user_prefix(), project_id)
    }

    pub fn project_latest_key(&self, project_id: &str, hash: &str) -> String {
        format!(
            "{}{}",
            self.project_latest_prefix(project_id),
            version_token(hash)
        )
    }

    pub fn project_version_key(&self, hash: &str) -> String {
        self.project_version_key_for_token(&version_token(hash))
    }

    /// Version-record key from an already-formed `version_*` token
    /// (as extracted from a latest-marker key).
    pub fn project_version_key_for_token(&self, token: &str) -> String {
        format!("{}project/version/{}", self.user_prefix(), token)
    }

    /// Map one legacy key under `user/{email}/` to its scoped equivalent.
    pub fn scoped_from_legacy(&self, legacy_key: &str) -> Option<String> {
        let rest = legacy_key.strip_prefix(&self.legacy_prefix())?;
        Some(format!("{}{}", self.user_prefix(), rest))
    }
}

/// `version_{first 16 chars of hash}`. Genuine hashes are lowercase
/// hex; arbitrary input (a corrupt remote record) must not panic here.
pub fn version_token(hash: &str) -> String {
    let prefix: String = hash.chars().take(16).collect();
    format!("version_{}", prefix)
}

/// Global content-addressed key for a blob: `file/{h[0:2]}/{h[2:4]}/{h}`.
/// Hashes that are not plain hex are left unsharded rather than sliced,
/// so a corrupt remote hash yields a key that simply misses.
pub fn file_key(hash: &str) -> String {
    if hash.len() < 4 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return format!("file/{}", hash);
    }
    format!("file/{}/{}/{}", &hash[..2], &hash[2..4], hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_splits_email() {
        let id = Identity::from_email("ada@example.com").unwrap();
        assert_eq!(id.localpart, "ada");
        assert_eq!(id.domain, "example.com");
        assert_eq!(id.user_prefix(), "domain/example.com/user/ada/");
        assert_eq!(id.profile_key(), "domain/example.com/user/ada/profile");
    }

    #[test]
    fn malformed_emails_are_rejected() {
        assert!(Identity::from_email("no-at-sign").is_err());
        assert!(Identity::from_email("@example.com").is_err());
        assert!(Identity::from_email("ada@").is_err());
    }

    #[test]
    fn project_keys_embed_version_token() {
        let id = Identity::from_email("ada@example.com").unwrap();
        let hash = "a3f9c2b8e1d4aabbccddeeff00112233a3f9c2b8e1d4aabbccddeeff00112233";
        assert_eq!(
            id.project_version_key(hash),
            "domain/example.com/user/ada/project/version/version_a3f9c2b8e1d4aabb"
        );
        assert_eq!(
            id.project_latest_key("project_0011aabbccdd", hash),
            "domain/example.com/user/ada/project/latest/project_0011aabbccdd/version_a3f9c2b8e1d4aabb"
        );
    }

    #[test]
    fn file_key_shards_by_hash_prefix() {
        assert_eq!(file_key("a3f9c2b8"), "file/a3/f9/a3f9c2b8");
    }

    #[test]
    fn non_hex_hashes_build_keys_without_panicking() {
        assert_eq!(file_key("日本語のハッシュ"), "file/日本語のハッシュ");
        assert_eq!(file_key("ab"), "file/ab");
        assert_eq!(version_token("日本語"), "version_日本語");
        assert_eq!(version_token("ab"), "version_ab");
    }

    #[test]
    fn legacy_keys_map_into_scoped_namespace() {
        let id = Identity::from_email("ada@example.com").unwrap();
        assert_eq!(
            id.scoped_from_legacy("user/ada@example.com/profile").unwrap(),
            "domain/example.com/user/ada/profile"
        );
        assert!(id.scoped_from_legacy("user/grace@example.com/profile").is_none());
    }
}
