//! Persistent cache of the per-user snapshot.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use blockchat_shared::Address;
use blockchat_store::{Database, Snapshot, StoreError};

use crate::config::SyncConfig;
use crate::error::Result;

#[async_trait]
pub trait PersistentCache: Send + Sync {
    /// Snapshot saved for `user`, `None` on first run.
    async fn load(&self, user: &Address) -> Result<Option<Snapshot>>;

    async fn save(&self, user: &Address, snapshot: &Snapshot) -> Result<()>;
}

/// [`PersistentCache`] backed by the SQLite store.
pub struct SqliteCache {
    db: Mutex<Database>,
}

impl SqliteCache {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Open the database configured by `BLOCKCHAT_DB_PATH`, or the platform
    /// default.
    pub fn open(config: &SyncConfig) -> Result<Self> {
        let db = match &config.db_path {
            Some(path) => Self::open_file(path)?,
            None => Database::new()?,
        };
        Ok(Self::new(db))
    }

    fn open_file(path: &Path) -> std::result::Result<Database, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        info!(path = %path.display(), "opening snapshot cache");
        Database::open_at(path)
    }

    fn db(&self) -> std::sync::MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PersistentCache for SqliteCache {
    async fn load(&self, user: &Address) -> Result<Option<Snapshot>> {
        match self.db().load_snapshot(user.as_str()) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, user: &Address, snapshot: &Snapshot) -> Result<()> {
        self.db().save_snapshot(user.as_str(), snapshot)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user() -> Address {
        Address("0x00000000000000000000000000000000000000ee".into())
    }

    #[tokio::test]
    async fn test_first_load_is_empty() {
        let cache = SqliteCache::new(Database::open_in_memory().unwrap());
        assert_eq!(cache.load(&user()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = SyncConfig {
            db_path: Some(dir.path().join("nested").join("cache.db")),
            ..SyncConfig::default()
        };

        let mut snapshot = Snapshot {
            recipients: vec!["general".into(), user().0],
            active: Some("general".into()),
            page_size: 4,
            ..Snapshot::default()
        };
        snapshot.encrypted_recipients.insert(user().0);

        {
            let cache = SqliteCache::open(&config).unwrap();
            cache.save(&user(), &snapshot).await.unwrap();
        }

        let cache = SqliteCache::open(&config).unwrap();
        assert_eq!(cache.load(&user()).await.unwrap(), Some(snapshot));
    }
}
