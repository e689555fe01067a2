/// Schema for the cache partitions and the background sync queue.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named, versioned cache partitions (creation order matters for lookups)
CREATE TABLE IF NOT EXISTS cache_partitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One response per (partition, request key)
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, key_hash),
    FOREIGN KEY (partition) REFERENCES cache_partitions(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(key_hash);

-- Client actions waiting for connectivity
CREATE TABLE IF NOT EXISTS pending_sync (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint TEXT NOT NULL,
    payload TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_pending_sync_synced ON pending_sync(synced, id);
"#;
