//! # `keepsake_core`
//!
//! Core library for Keepsake, a local-first content store.
//!
//! Data is authored entirely offline. Payloads are stored as immutable,
//! hash-addressed content blobs; mutable named entities (users, projects)
//! are represented as pointers that reference a current content hash and
//! carry a per-entity logical clock. Every pointer mutation is also
//! snapshotted into an append-only version log with a retention policy.
//!
//! The pieces compose bottom-up:
//!
//! 1. [`canonical`] - deterministic canonicalization and SHA-256 hashing
//! 2. [`content`] - hash -> blob persistence, deduplicated and immutable
//! 3. [`pointer`] - mutable named references with logical clocks
//! 4. [`version`] - append-only pointer history with pruning
//! 5. [`store`] - the [`store::LocalStore`] facade combining the above
//! 6. [`conflict`] - pure decision logic for divergent pointer states
//!
//! The core never interprets the meaning of stored payloads; it treats
//! them as opaque, hashable byte/JSON blobs. Synchronization against a
//! remote store lives in the `keepsake_sync` crate.

pub mod canonical;
pub mod conflict;
pub mod content;
pub mod db;
pub mod error;
pub mod ids;
pub mod pointer;
pub mod store;
pub mod version;

pub use canonical::{Payload, canonicalize, hash_bytes, hash_payload};
pub use conflict::{PointerSnapshot, Recommendation, ResolutionAction, resolve};
pub use content::ContentStore;
pub use db::StoreHandle;
pub use error::{Result, StoreError};
pub use ids::{EntityKind, new_id};
pub use pointer::{Pointer, PointerStore};
pub use store::LocalStore;
pub use version::{Version, VersionLabel, VersionLog};
