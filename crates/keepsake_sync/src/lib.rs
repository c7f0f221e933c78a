//! # `keepsake_sync`
//!
//! Synchronization for Keepsake: eventually-consistent reconciliation
//! between the local content-addressable store (`keepsake_core`) and a
//! remote flat key-value service, both keyed by cryptographic hash.
//!
//! Conflict resolution is driven by per-pointer logical clocks with
//! wall-clock tiebreak; concurrent edit histories become explicit
//! conflicts that surface both candidates plus a recommendation and wait
//! for an external decision. First sync for a pre-domain-scoping account
//! also runs an idempotent legacy key-space migration.
//!
//! Authentication is consumed as a capability: callers hand the client a
//! session token, and the remote service enforces it. The server never
//! parses stored values.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod migrate;
pub mod record;

pub use client::{HttpRemoteStore, InMemoryRemoteStore, RemoteStore};
pub use config::{Config, ConfigError};
pub use engine::{
    PendingConflict, PointerSyncStatus, SyncEngine, SyncOptions, SyncOutcome, SyncReport,
};
pub use error::{Result, SyncError};
pub use keys::{Identity, file_key, version_token};
pub use record::RemoteRecord;
