/// Schema for the local store.
///
/// Every statement is idempotent so the batch can run on each open.
pub const SCHEMA: &str = r#"
-- Domain records (serialized JSON), the local fallback for reads
CREATE TABLE IF NOT EXISTS entities (
    entity_type TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    is_synced INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (entity_type, id)
);

CREATE INDEX IF NOT EXISTS idx_entities_unsynced
    ON entities(entity_type, is_synced);

-- Read-through cache
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    written_at TEXT NOT NULL
);

-- Writes not yet confirmed by the server
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    record_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    next_attempt_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (table_name, record_id, operation)
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_order ON sync_queue(created_at, id);
"#;
