use rusqlite::Connection;

use crate::error::GatewayError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), GatewayError> {
    apply_pragmas(conn)?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

pub fn init_draft_schema(conn: &Connection) -> Result<(), GatewayError> {
    apply_pragmas(conn)?;
    conn.execute_batch(DRAFT_SCHEMA_SQL)?;
    Ok(())
}

fn apply_pragmas(conn: &Connection) -> Result<(), GatewayError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    Ok(())
}

// Notes and folders share one table; `is_folder` tells them apart and a
// folder's own name lives in `folder_name`.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS notes (
    id BLOB PRIMARY KEY CHECK (length(id) = 16),
    is_folder INTEGER NOT NULL DEFAULT 0,
    title TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    folder_name TEXT NOT NULL,
    folder_color TEXT NOT NULL,
    parent_folder_name TEXT,
    \"order\" INTEGER NOT NULL,
    list_mode INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notes_folder ON notes (is_folder, folder_name);
CREATE INDEX IF NOT EXISTS idx_notes_order ON notes (is_folder, \"order\");

CREATE TABLE IF NOT EXISTS automations (
    id BLOB PRIMARY KEY CHECK (length(id) = 16),
    name TEXT NOT NULL,
    trigger_kind TEXT NOT NULL,
    condition TEXT NOT NULL DEFAULT '{}',
    action_kind TEXT NOT NULL,
    action_config TEXT NOT NULL DEFAULT '{}',
    active INTEGER NOT NULL DEFAULT 1
);
";

const DRAFT_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS draft_stash (
    slot TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    stashed_at INTEGER NOT NULL
);
";
