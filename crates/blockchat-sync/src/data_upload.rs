//! Side-channel records a recipient has uploaded to the ledger, such as the
//! public key used to seal messages for it.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use blockchat_shared::constants::PUBLIC_KEY_TAG;
use blockchat_shared::{BlockNumber, RecipientHash};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::ledger::DataUploadedEvent;
use crate::retry::retry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "camelCase")]
pub enum DataRecord {
    /// Checked; nothing was uploaded.
    Absent,
    /// Uploaded at this block, detail not fetched yet.
    Pending(BlockNumber),
    Resolved(DataUploadedEvent),
}

#[derive(Clone, Debug)]
pub struct DataUploads {
    ctx: Arc<SyncContext>,
}

impl DataUploads {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Resolve every configured tag of a resolved recipient.
    ///
    /// A failing tag is logged and does not stop the others.
    pub async fn resolve_data(&self, key: &str) -> Result<()> {
        let hash = self
            .ctx
            .lock()
            .recipients
            .get(key)
            .map(|r| r.hash.clone())
            .ok_or_else(|| SyncError::NotFound(format!("recipient {key}")))?;

        for tag in &self.ctx.config().data_tags {
            if let Err(e) = self.resolve_tag(key, &hash, tag).await {
                warn!(recipient = %key, tag = %tag, error = %e, "Data record lookup failed");
            }
        }
        Ok(())
    }

    /// Resolve one record, skipping the block lookup when its block is
    /// already known.
    pub async fn resolve_tag(&self, key: &str, hash: &RecipientHash, tag: &str) -> Result<DataRecord> {
        let block = match self.record(hash, tag) {
            Some(resolved @ DataRecord::Resolved(_)) => return Ok(resolved),
            Some(DataRecord::Pending(block)) => block,
            Some(DataRecord::Absent) | None => {
                let ledger = self.ctx.ledger();
                let data_hash = ledger.data_hash(hash, tag);
                let block = retry(self.ctx.config().fetch_attempts, "data block", || {
                    ledger.data_block(&data_hash)
                })
                .await?;
                if block == 0 {
                    debug!(recipient = %key, tag, "No data uploaded");
                    self.store(key, hash, tag, DataRecord::Absent);
                    return Ok(DataRecord::Absent);
                }
                self.store(key, hash, tag, DataRecord::Pending(block));
                block
            }
        };

        let ledger = self.ctx.ledger();
        let data_hash = ledger.data_hash(hash, tag);
        let detail = retry(self.ctx.config().fetch_attempts, "data event", || {
            ledger.fetch_data_uploaded_event(&data_hash, block, block)
        })
        .await?;

        match detail {
            Some(event) => {
                debug!(recipient = %key, tag, block, "Data record resolved");
                let record = DataRecord::Resolved(event);
                self.store(key, hash, tag, record.clone());
                Ok(record)
            }
            None => {
                warn!(recipient = %key, tag, block, "Data block has no upload event");
                Ok(DataRecord::Pending(block))
            }
        }
    }

    pub fn record(&self, hash: &RecipientHash, tag: &str) -> Option<DataRecord> {
        self.ctx
            .lock()
            .data
            .get(&(hash.clone(), tag.to_string()))
            .cloned()
    }

    /// Hex public key `key` has published, if it has been resolved.
    pub fn public_key(&self, key: &str) -> Option<String> {
        let state = self.ctx.lock();
        let hash = &state.recipients.get(key)?.hash;
        match state.data.get(&(hash.clone(), PUBLIC_KEY_TAG.to_string()))? {
            DataRecord::Resolved(event) => Some(event.content.clone()),
            _ => None,
        }
    }

    /// Store `record` unless the recipient was removed meanwhile or the
    /// stored record is already further along.
    fn store(&self, key: &str, hash: &RecipientHash, tag: &str, record: DataRecord) {
        {
            let mut state = self.ctx.lock();
            if !state.recipients.values().any(|r| &r.hash == hash) {
                return;
            }
            let entry = state
                .data
                .entry((hash.clone(), tag.to_string()))
                .or_insert(DataRecord::Absent);
            let keep = matches!(
                (&*entry, &record),
                (DataRecord::Resolved(_), DataRecord::Absent | DataRecord::Pending(_))
            );
            if keep {
                return;
            }
            *entry = record;
        }
        self.ctx.notify(SyncEvent::DataRecordUpdated {
            key: key.to_string(),
            tag: tag.to_string(),
        });
    }
}
