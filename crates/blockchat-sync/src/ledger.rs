//! Contract of the ledger client the engine consumes.
//!
//! The client itself (wallet/provider bootstrapping, contract bindings,
//! call-level timeouts) lives outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use blockchat_shared::hashing;
use blockchat_shared::{Address, BlockNumber, DataHash, LedgerError, RecipientHash, TxHash};

/// A ledger-confirmed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub sender: Address,
    pub recipient_hash: RecipientHash,
    pub content: String,
    pub block_number: BlockNumber,
    /// Position of the event within the queried block range.
    pub log_index: u32,
    pub tx_hash: Option<TxHash>,
}

/// Identity of a [`MessageEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub recipient_hash: RecipientHash,
    pub block_number: BlockNumber,
    pub log_index: u32,
}

impl MessageEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            recipient_hash: self.recipient_hash.clone(),
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }

    /// Lower-case the address fields as they enter the engine.
    pub fn normalized(mut self) -> Self {
        if let Some(sender) = Address::parse(self.sender.as_str()) {
            self.sender = sender;
        }
        if let Some(recipient) = Address::parse(self.recipient_hash.as_str()) {
            self.recipient_hash = RecipientHash::from(&recipient);
        }
        self
    }
}

/// Detail of a data-upload record (e.g. a published public key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUploadedEvent {
    pub sender: Address,
    pub data_hash: DataHash,
    pub content: String,
    pub block_number: BlockNumber,
}

/// Progress reported by the ledger for a submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitStatus {
    /// The transaction was broadcast and has an id.
    TxAssigned(TxHash),
    /// The transaction was included.  Some clients only know the id here.
    Included { tx_hash: Option<TxHash> },
}

pub type StatusSender = mpsc::UnboundedSender<SubmitStatus>;

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Number of message blocks allocated to `recipient`.
    async fn recipient_message_block_count(
        &self,
        recipient: &RecipientHash,
    ) -> Result<u64, LedgerError>;

    /// Block numbers at list indices `[start, start + count)`, oldest first.
    async fn fetch_message_blocks(
        &self,
        recipient: &RecipientHash,
        start: u64,
        count: u64,
    ) -> Result<Vec<BlockNumber>, LedgerError>;

    /// Message events for `recipient` in the inclusive range `[from, to]`.
    async fn fetch_message_events(
        &self,
        recipient: &RecipientHash,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<MessageEvent>, LedgerError>;

    /// Submit a message.  Progress is reported on `status` and may arrive
    /// in any order, before or after this call returns.
    async fn submit_message(
        &self,
        recipient: &RecipientHash,
        content: &str,
        status: StatusSender,
    ) -> Result<(), LedgerError>;

    /// Stream of newly created message events for all recipients.
    async fn subscribe_message_created(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<MessageEvent>, LedgerError>;

    /// Width of the event range queried per message block.
    async fn block_skip(&self) -> Result<u64, LedgerError>;

    /// Content hash of a human-readable recipient name.
    fn recipient_hash(&self, text: &str) -> RecipientHash {
        hashing::content_hash(text)
    }

    fn data_hash(&self, recipient: &RecipientHash, tag: &str) -> DataHash {
        hashing::data_hash(recipient, tag)
    }

    /// Block holding the data record, `0` when nothing was uploaded.
    async fn data_block(&self, data_hash: &DataHash) -> Result<BlockNumber, LedgerError>;

    async fn fetch_data_uploaded_event(
        &self,
        data_hash: &DataHash,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Option<DataUploadedEvent>, LedgerError>;
}
