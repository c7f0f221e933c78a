use rusqlite::Connection;

/// SQL schema for the local store.
const SCHEMA: &str = r#"
-- Immutable, hash-addressed content blobs (deduplicated by hash)
CREATE TABLE IF NOT EXISTS content_blobs (
    hash TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    format TEXT NOT NULL,               -- json|bytes
    kind TEXT NOT NULL,                 -- user|project|file
    created_at INTEGER NOT NULL
);

-- Mutable named references to a current content hash
CREATE TABLE IF NOT EXISTS pointers (
    id TEXT PRIMARY KEY,
    owner_id TEXT,
    kind TEXT NOT NULL,                 -- user|project
    current_hash TEXT NOT NULL,
    last_modified INTEGER NOT NULL,     -- epoch millis
    logical_clock INTEGER NOT NULL CHECK (logical_clock >= 1)
);

CREATE INDEX IF NOT EXISTS idx_pointers_owner ON pointers(owner_id);

-- Append-only snapshots of a pointer's hash history
CREATE TABLE IF NOT EXISTS versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pointer_id TEXT NOT NULL REFERENCES pointers(id) ON DELETE CASCADE,
    hash TEXT NOT NULL,
    timestamp INTEGER NOT NULL,         -- epoch millis
    label TEXT NOT NULL                 -- session|checkpoint
);

CREATE INDEX IF NOT EXISTS idx_versions_pointer ON versions(pointer_id);
CREATE INDEX IF NOT EXISTS idx_versions_pointer_label ON versions(pointer_id, label);
"#;

/// Initialize the store schema (idempotent).
pub fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA)
}
