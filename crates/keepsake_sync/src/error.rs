//! Error types for sync operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] keepsake_core::StoreError),

    #[error("integrity error for {pointer_id}: expected {expected}, got {actual}")]
    Integrity {
        pointer_id: String,
        expected: String,
        actual: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("remote returned status {status} for key {key}")]
    Remote { status: u16, key: String },

    #[error("remote content missing for hash {0}")]
    MissingRemoteContent(String),

    #[error("legacy migration failed: {0}")]
    Migration(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Transient errors mark the pointer `Failed` and are retried with
    /// backoff; everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout(_) => true,
            SyncError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
