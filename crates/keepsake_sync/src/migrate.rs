//! Legacy key-space migration.
//!
//! Accounts created before domain scoping stored their data under
//! `user/{email}/...`. On first sync the engine copies that data to the
//! `domain/{domain}/user/{localpart}/...` layout. The copy is
//! idempotent and never deletes legacy data; it is skipped entirely when
//! the scoped namespace is already populated.

use tracing::{debug, info};

use crate::client::RemoteStore;
use crate::error::{Result, SyncError};
use crate::keys::Identity;

/// Copy legacy flat-layout keys into the domain-scoped namespace.
/// Returns the number of keys copied.
pub async fn run(remote: &dyn RemoteStore, identity: &Identity) -> Result<usize> {
    let legacy_keys = remote
        .list(&identity.legacy_prefix())
        .await
        .map_err(migration_err)?;
    if legacy_keys.is_empty() {
        debug!("no legacy keys for {}", identity.email);
        return Ok(0);
    }

    let scoped_keys = remote
        .list(&identity.user_prefix())
        .await
        .map_err(migration_err)?;
    if !scoped_keys.is_empty() {
        debug!(
            "scoped namespace for {} already populated; skipping migration",
            identity.email
        );
        return Ok(0);
    }

    let mut copied = 0;
    for legacy_key in &legacy_keys {
        let Some(scoped_key) = identity.scoped_from_legacy(legacy_key) else {
            continue;
        };
        if remote.get(&scoped_key).await.map_err(migration_err)?.is_some() {
            continue;
        }
        let value = remote
            .get(legacy_key)
            .await
            .map_err(migration_err)?
            .ok_or_else(|| SyncError::Migration(format!("legacy key {} vanished", legacy_key)))?;
        remote
            .put(&scoped_key, &value)
            .await
            .map_err(migration_err)?;
        copied += 1;
    }

    info!(
        "migrated {} legacy keys for {} into {}",
        copied,
        identity.email,
        identity.user_prefix()
    );
    Ok(copied)
}

fn migration_err(e: SyncError) -> SyncError {
    match e {
        already @ SyncError::Migration(_) => already,
        other => SyncError::Migration(other.to_string()),
    }
}
