//! Load / save operations for [`Snapshot`] records.

use chrono::Utc;
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Snapshot;

impl Database {
    /// Insert or replace the snapshot of `user_key`.
    pub fn save_snapshot(&self, user_key: &str, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO snapshots (user_key, json, updated_at)
             VALUES (?1, ?2, ?3)",
            params![user_key, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Load the snapshot of `user_key`, [`StoreError::NotFound`] on first run.
    pub fn load_snapshot(&self, user_key: &str) -> Result<Snapshot> {
        let json: String = self
            .conn()
            .query_row(
                "SELECT json FROM snapshots WHERE user_key = ?1",
                params![user_key],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        Ok(serde_json::from_str(&json)?)
    }
}
