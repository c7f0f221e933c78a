//! The sync engine: orchestrates push/pull between the local store and
//! the remote key-value service.
//!
//! Each pointer moves through its own state machine on a sync pass:
//! `Unsynced -> Pushing -> Reconciled`, `Unsynced -> Pulling ->
//! Reconciled`, `-> Conflict -> Resolved`, or `-> Failed` (retryable).
//! Content blobs are always uploaded before the pointer record that
//! references them, so a crash mid-sync never leaves a remote pointer
//! referencing a hash the remote doesn't have.
//!
//! Divergence is decided by logical clock with wall-clock tiebreak, and
//! dominance is only trusted when the losing side's hash is a provable
//! causal ancestor of the winning side (recorded last common hash, local
//! version history, or the remote record's parent hash). Everything else
//! becomes an explicit conflict carrying a keep-newer recommendation that
//! is never auto-applied.
//!
//! Sync state (last common hash per pointer, pending conflicts, pointer
//! statuses) is ephemeral and never persisted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use keepsake_core::{
    EntityKind, LocalStore, Payload, Pointer, PointerSnapshot, Recommendation, ResolutionAction,
    StoreError, hash_bytes, resolve,
};

use crate::client::RemoteStore;
use crate::error::{Result, SyncError};
use crate::keys::{Identity, file_key};
use crate::migrate;
use crate::record::RemoteRecord;

/// Where a pointer currently stands in the sync state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum PointerSyncStatus {
    Unsynced,
    Pushing,
    Pulling,
    Reconciled,
    Conflict,
    Resolved,
    Failed { error: String },
}

/// Result of a sync pass for one pointer.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Remote already matched local; no transfer.
    Reconciled,
    /// Local state was uploaded.
    Pushed,
    /// Remote state was adopted locally.
    Pulled,
    /// Concurrent edits; both candidates exposed, nothing applied.
    Conflict(Recommendation),
}

/// A detected conflict awaiting an external decision. Both candidate
/// states are exposed alongside the recommendation.
#[derive(Debug, Clone)]
pub struct PendingConflict {
    pub local: PointerSnapshot,
    pub remote: PointerSnapshot,
    pub recommendation: Recommendation,
    pub remote_record: RemoteRecord,
    pub remote_payload: Payload,
}

/// Summary of one `sync_all` pass.
#[derive(Debug, Default, Clone)]
pub struct SyncReport {
    pub pushed: usize,
    pub pulled: usize,
    pub reconciled: usize,
    pub conflicts: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub migrated_keys: usize,
}

/// Result of resolving a pointer's remote state.
struct RemoteLookup {
    /// Dominant record claiming this pointer's id, if any.
    record: Option<RemoteRecord>,
    /// A latest marker for the pointer's current hash resolved to a
    /// record owned by another pointer with identical content.
    current_hash_shared: bool,
}

/// Retry knobs for transient failures.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
        }
    }
}

/// Orchestrates reconciliation between a [`LocalStore`] and a
/// [`RemoteStore`] for one account identity.
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    identity: Identity,
    options: SyncOptions,

    // Per-pointer serialization: at most one in-flight sync per id.
    locks: DashMap<String, Arc<Mutex<()>>>,

    // Ephemeral sync state, never persisted.
    status: DashMap<String, PointerSyncStatus>,
    last_common: DashMap<String, String>,
    pending: DashMap<String, PendingConflict>,
    migrated: AtomicBool,
    last_sync: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl SyncEngine {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteStore>, identity: Identity) -> Self {
        Self {
            store,
            remote,
            identity,
            options: SyncOptions::default(),
            locks: DashMap::new(),
            status: DashMap::new(),
            last_common: DashMap::new(),
            pending: DashMap::new(),
            migrated: AtomicBool::new(false),
            last_sync: std::sync::Mutex::new(None),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Build an engine (and its HTTP remote) from environment-derived
    /// configuration.
    pub fn from_config(store: LocalStore, config: &crate::config::Config) -> Result<Self> {
        let remote = crate::client::HttpRemoteStore::from_config(config)?;
        let identity = Identity::from_email(&config.account_email)?;
        Ok(Self::new(
            store.with_session_retention(config.session_retention),
            Arc::new(remote),
            identity,
        )
        .with_options(SyncOptions {
            max_attempts: config.max_attempts,
            backoff_base: config.backoff_base,
        }))
    }

    /// Current state-machine position for a pointer, if it has been seen
    /// this session.
    pub fn status(&self, pointer_id: &str) -> Option<PointerSyncStatus> {
        self.status.get(pointer_id).map(|s| s.clone())
    }

    /// Timestamp of the last completed `sync_all` pass.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().unwrap()
    }

    /// Conflicts awaiting an external decision.
    pub fn pending_conflicts(&self) -> Vec<(String, PendingConflict)> {
        self.pending
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn pending_conflict(&self, pointer_id: &str) -> Option<PendingConflict> {
        self.pending.get(pointer_id).map(|c| c.clone())
    }

    /// Run one sync pass over every local pointer. Pointers fail or
    /// conflict independently; the pass continues past them.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let mut report = SyncReport {
            migrated_keys: self.ensure_migrated().await?,
            ..Default::default()
        };

        for pointer in self.store.pointers().list_all()? {
            match self.sync_pointer(&pointer.id).await {
                Ok(SyncOutcome::Pushed) => report.pushed += 1,
                Ok(SyncOutcome::Pulled) => report.pulled += 1,
                Ok(SyncOutcome::Reconciled) => report.reconciled += 1,
                Ok(SyncOutcome::Conflict(_)) => report.conflicts.push(pointer.id.clone()),
                Err(e) => {
                    warn!("sync failed for {}: {}", pointer.id, e);
                    report.failed.push((pointer.id.clone(), e.to_string()));
                }
            }
        }

        *self.last_sync.lock().unwrap() = Some(Utc::now());
        info!(
            "sync pass: {} pushed, {} pulled, {} reconciled, {} conflicts, {} failed",
            report.pushed,
            report.pulled,
            report.reconciled,
            report.conflicts.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Sync one pointer, retrying transient failures with backoff.
    /// Operations on the same pointer id are serialized; different
    /// pointers may sync concurrently.
    pub async fn sync_pointer(&self, pointer_id: &str) -> Result<SyncOutcome> {
        let lock = self.pointer_lock(pointer_id);
        let _guard = lock.lock().await;

        if let Some(pending) = self.pending.get(pointer_id) {
            // Still waiting on an external decision; don't touch it.
            return Ok(SyncOutcome::Conflict(pending.recommendation.clone()));
        }

        let mut attempt = 0;
        loop {
            match self.sync_pointer_inner(pointer_id).await {
                Err(e) if e.is_transient() && attempt + 1 < self.options.max_attempts => {
                    attempt += 1;
                    let delay = self.options.backoff_base * 2u32.pow(attempt);
                    debug!(
                        "transient failure for {} (attempt {}): {}; retrying in {:?}",
                        pointer_id, attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.set_status(
                        pointer_id,
                        PointerSyncStatus::Failed {
                            error: e.to_string(),
                        },
                    );
                    return Err(e);
                }
                Ok(outcome) => return Ok(outcome),
            }
        }
    }

    async fn sync_pointer_inner(&self, pointer_id: &str) -> Result<SyncOutcome> {
        let local = self
            .store
            .pointers()
            .get(pointer_id)?
            .ok_or_else(|| StoreError::NotFound(format!("pointer {}", pointer_id)))?;
        self.set_status(pointer_id, PointerSyncStatus::Unsynced);

        let lookup = self.fetch_remote(&local).await?;
        if lookup.record.is_none() && lookup.current_hash_shared {
            // Our current content is already published; the shared
            // version record just carries another pointer's id.
            self.mark_reconciled(pointer_id, &local.current_hash);
            return Ok(SyncOutcome::Reconciled);
        }
        let Some(record) = lookup.record else {
            // No remote record: first push for this pointer.
            self.set_status(pointer_id, PointerSyncStatus::Pushing);
            self.push(&local).await?;
            self.mark_reconciled(pointer_id, &local.current_hash);
            return Ok(SyncOutcome::Pushed);
        };

        if record.hash == local.current_hash {
            self.mark_reconciled(pointer_id, &record.hash);
            return Ok(SyncOutcome::Reconciled);
        }

        let last_common = self.last_common.get(pointer_id).map(|h| h.clone());

        // Local dominates only when the remote state is a provable causal
        // ancestor of ours; symmetrically for remote via its parent hash.
        let local_dominates = local.logical_clock > record.logical_clock
            && (last_common.as_deref() == Some(record.hash.as_str())
                || self.store.history_contains(pointer_id, &record.hash)?);
        let remote_dominates = record.logical_clock > local.logical_clock
            && (last_common.as_deref() == Some(local.current_hash.as_str())
                || record.parent.as_deref() == Some(local.current_hash.as_str()));

        if local_dominates {
            self.set_status(pointer_id, PointerSyncStatus::Pushing);
            self.push(&local).await?;
            self.mark_reconciled(pointer_id, &local.current_hash);
            return Ok(SyncOutcome::Pushed);
        }

        if remote_dominates {
            self.set_status(pointer_id, PointerSyncStatus::Pulling);
            self.pull(&local, &record).await?;
            self.mark_reconciled(pointer_id, &record.hash);
            return Ok(SyncOutcome::Pulled);
        }

        // Concurrent clocks: expose both candidates, apply nothing.
        let remote_payload = self.fetch_remote_payload(pointer_id, &record).await?;
        let local_snapshot = PointerSnapshot::from(&local);
        let remote_snapshot = PointerSnapshot {
            id: record.id.clone(),
            hash: record.hash.clone(),
            logical_clock: record.logical_clock,
            last_modified: millis_to_datetime(record.last_modified),
        };
        let recommendation = resolve(&local_snapshot, &remote_snapshot);
        debug!(
            "conflict on {}: local clock {} vs remote clock {}; recommending {:?}",
            pointer_id, local.logical_clock, record.logical_clock, recommendation.action
        );
        self.pending.insert(
            pointer_id.to_string(),
            PendingConflict {
                local: local_snapshot,
                remote: remote_snapshot,
                recommendation: recommendation.clone(),
                remote_record: record,
                remote_payload,
            },
        );
        self.set_status(pointer_id, PointerSyncStatus::Conflict);
        Ok(SyncOutcome::Conflict(recommendation))
    }

    /// Apply an externally chosen action to a pending conflict. Returns
    /// the renamed pointer when the action was [`ResolutionAction::Rename`].
    pub async fn apply_resolution(
        &self,
        pointer_id: &str,
        action: ResolutionAction,
    ) -> Result<Option<Pointer>> {
        let lock = self.pointer_lock(pointer_id);
        let _guard = lock.lock().await;

        let (_, pending) = self.pending.remove(pointer_id).ok_or_else(|| {
            SyncError::Store(StoreError::NotFound(format!(
                "pending conflict for {}",
                pointer_id
            )))
        })?;

        let renamed = match action {
            ResolutionAction::Import => {
                self.adopt(pointer_id, &pending.remote_record, &pending.remote_payload)?;
                self.last_common
                    .insert(pointer_id.to_string(), pending.remote.hash.clone());
                None
            }
            ResolutionAction::Overwrite => {
                let local = self.supersede(pointer_id, pending.remote.logical_clock)?;
                self.push(&local).await?;
                self.last_common
                    .insert(pointer_id.to_string(), local.current_hash.clone());
                None
            }
            ResolutionAction::Rename => {
                // Keep both: the remote candidate becomes a fresh local
                // pointer; the original id keeps the local state and is
                // pushed over the remote copy.
                let local = self.supersede(pointer_id, pending.remote.logical_clock)?;
                let renamed = self.store.rename_from(
                    pending.remote_record.owner.as_deref().or(local.owner_id.as_deref()),
                    &pending.remote_payload,
                    pending.remote_record.kind,
                )?;
                info!(
                    "conflict on {} resolved by rename; remote candidate kept as {}",
                    pointer_id, renamed.id
                );
                self.push(&local).await?;
                self.push(&renamed).await?;
                self.last_common
                    .insert(pointer_id.to_string(), local.current_hash.clone());
                Some(renamed)
            }
            ResolutionAction::Skip => {
                // Discard the incoming candidate; both sides stay as they
                // are and may re-conflict on a later pass.
                None
            }
        };
        self.set_status(pointer_id, PointerSyncStatus::Resolved);
        Ok(renamed)
    }

    // ===== Remote access =====

    /// Fetch the remote record for a pointer, if any. Projects may have
    /// accumulated several latest markers (the KV surface has no delete);
    /// the dominant one by (clock, timestamp) wins.
    ///
    /// Version records are keyed by content hash alone, so pointers with
    /// identical payloads share one record and the last writer's id wins
    /// the shared key. A marker under this pointer's prefix resolving to
    /// another pointer's record at our current hash still proves our
    /// content is published; `current_hash_shared` reports that case so
    /// the caller doesn't re-push forever.
    async fn fetch_remote(&self, pointer: &Pointer) -> Result<RemoteLookup> {
        match pointer.kind {
            EntityKind::User => {
                let record = match self.remote.get(&self.identity.profile_key()).await? {
                    Some(bytes) => Some(RemoteRecord::decode(&bytes)?),
                    None => None,
                };
                Ok(RemoteLookup {
                    record,
                    current_hash_shared: false,
                })
            }
            _ => {
                let markers = self
                    .remote
                    .list(&self.identity.project_latest_prefix(&pointer.id))
                    .await?;
                let mut best: Option<RemoteRecord> = None;
                let mut current_hash_shared = false;
                for marker in markers {
                    let Some(token) = marker.rsplit('/').next() else {
                        continue;
                    };
                    let key = self.identity.project_version_key_for_token(token);
                    let Some(bytes) = self.remote.get(&key).await? else {
                        continue;
                    };
                    let record = RemoteRecord::decode(&bytes)?;
                    if record.id != pointer.id {
                        if record.hash == pointer.current_hash {
                            current_hash_shared = true;
                        }
                        continue;
                    }
                    let better = match &best {
                        None => true,
                        Some(current) => {
                            (record.logical_clock, record.last_modified)
                                > (current.logical_clock, current.last_modified)
                        }
                    };
                    if better {
                        best = Some(record);
                    }
                }
                Ok(RemoteLookup {
                    record: best,
                    current_hash_shared,
                })
            }
        }
    }

    /// Upload a pointer: content blob first, then the record keyed for
    /// its kind. Re-uploading an existing content hash is a safe no-op on
    /// the server.
    async fn push(&self, pointer: &Pointer) -> Result<()> {
        let payload = self
            .store
            .content()
            .get(&pointer.current_hash)?
            .ok_or_else(|| {
                StoreError::NotFound(format!("content blob {}", pointer.current_hash))
            })?;
        let bytes = payload.canonical_bytes().map_err(SyncError::Store)?;
        self.remote
            .put(&file_key(&pointer.current_hash), &bytes)
            .await?;

        let record = RemoteRecord {
            id: pointer.id.clone(),
            kind: pointer.kind,
            owner: pointer.owner_id.clone(),
            hash: pointer.current_hash.clone(),
            parent: self
                .store
                .parent_hash(&pointer.id, &pointer.current_hash)?,
            format: payload.format().to_string(),
            logical_clock: pointer.logical_clock,
            last_modified: pointer.last_modified.timestamp_millis(),
        };
        let encoded = record.encode()?;

        match pointer.kind {
            EntityKind::User => {
                self.remote
                    .put(&self.identity.profile_key(), &encoded)
                    .await?;
            }
            _ => {
                self.remote
                    .put(
                        &self.identity.project_version_key(&pointer.current_hash),
                        &encoded,
                    )
                    .await?;
                // Pointer marker with an empty body.
                self.remote
                    .put(
                        &self
                            .identity
                            .project_latest_key(&pointer.id, &pointer.current_hash),
                        &[],
                    )
                    .await?;
            }
        }
        debug!(
            "pushed {} at clock {} ({})",
            pointer.id, pointer.logical_clock, pointer.current_hash
        );
        Ok(())
    }

    /// Adopt remote state locally. Local stores are only mutated after
    /// the payload's hash has been verified.
    async fn pull(&self, local: &Pointer, record: &RemoteRecord) -> Result<Pointer> {
        let payload = self.fetch_remote_payload(&local.id, record).await?;
        self.adopt(&local.id, record, &payload)
    }

    /// Fetch and verify the content bytes a record claims. A hash
    /// mismatch is a hard error and the data is discarded.
    async fn fetch_remote_payload(
        &self,
        pointer_id: &str,
        record: &RemoteRecord,
    ) -> Result<Payload> {
        let bytes = self
            .remote
            .get(&file_key(&record.hash))
            .await?
            .ok_or_else(|| SyncError::MissingRemoteContent(record.hash.clone()))?;
        let actual = hash_bytes(&bytes);
        if actual != record.hash {
            return Err(SyncError::Integrity {
                pointer_id: pointer_id.to_string(),
                expected: record.hash.clone(),
                actual,
            });
        }
        Payload::from_stored(&record.format, bytes).map_err(SyncError::Store)
    }

    fn adopt(&self, pointer_id: &str, record: &RemoteRecord, payload: &Payload) -> Result<Pointer> {
        let owner = record.owner.clone().or_else(|| {
            self.store
                .pointers()
                .get(pointer_id)
                .ok()
                .flatten()
                .and_then(|p| p.owner_id)
        });
        let pointer = self.store.adopt_remote(
            pointer_id,
            owner.as_deref(),
            record.kind,
            payload,
            &record.hash,
            record.logical_clock,
            millis_to_datetime(record.last_modified),
        )?;
        debug!(
            "pulled {} to clock {} ({})",
            pointer_id, pointer.logical_clock, pointer.current_hash
        );
        Ok(pointer)
    }

    // ===== Helpers =====

    async fn ensure_migrated(&self) -> Result<usize> {
        if self.migrated.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let copied = migrate::run(self.remote.as_ref(), &self.identity).await?;
        self.migrated.store(true, Ordering::SeqCst);
        Ok(copied)
    }

    fn pointer_lock(&self, pointer_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(pointer_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Ensure the kept local state strictly dominates the discarded
    /// remote revision. The remote store is append-only, so an overwrite
    /// only sticks if the pushed record wins the (clock, timestamp)
    /// ordering against every record already there.
    fn supersede(&self, pointer_id: &str, remote_clock: i64) -> Result<Pointer> {
        Ok(self
            .store
            .pointers()
            .advance_clock_past(pointer_id, remote_clock)?)
    }

    fn mark_reconciled(&self, pointer_id: &str, hash: &str) {
        self.last_common
            .insert(pointer_id.to_string(), hash.to_string());
        self.set_status(pointer_id, PointerSyncStatus::Reconciled);
    }

    fn set_status(&self, pointer_id: &str, status: PointerSyncStatus) {
        self.status.insert(pointer_id.to_string(), status);
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}
