//! v001 -- Initial schema creation.
//!
//! Creates the `snapshots` table holding one JSON document per user key.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    user_key   TEXT PRIMARY KEY NOT NULL,   -- account address of the local user
    json       TEXT NOT NULL,               -- serialized Snapshot
    updated_at TEXT NOT NULL                -- RFC-3339
);
"#;

/// Apply the migration.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
