//! Locally originated messages that the ledger has not finalized yet.

use chrono::{DateTime, Utc};
use serde::Serialize;

use blockchat_shared::{Address, RecipientHash, TxHash};

use crate::ledger::MessageEvent;

/// Stable local slot of a pending message.
pub type ClientId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PendingStatus {
    Drafting,
    Submitted,
    Confirmed,
    Failed,
}

impl PendingStatus {
    fn rank(self) -> u8 {
        match self {
            PendingStatus::Drafting => 0,
            PendingStatus::Submitted => 1,
            PendingStatus::Confirmed | PendingStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub client_id: ClientId,
    pub sender: Address,
    pub recipient_hash: RecipientHash,
    /// Content as submitted (sealed when the recipient uses encryption).
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: PendingStatus,
    pub tx_hash: Option<TxHash>,
}

impl PendingMessage {
    /// Move to `next` if it is strictly further along; never regresses.
    pub fn advance(&mut self, next: PendingStatus) -> bool {
        if next.rank() > self.status.rank() {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Record the ledger transaction id the first time it is reported.
    pub fn assign_tx(&mut self, tx_hash: TxHash) {
        self.tx_hash.get_or_insert(tx_hash);
    }

    fn same_tx(&self, event: &MessageEvent) -> bool {
        matches!((&self.tx_hash, &event.tx_hash), (Some(a), Some(b)) if a == b)
    }

    fn same_payload(&self, event: &MessageEvent) -> bool {
        self.status != PendingStatus::Failed
            && self.sender == event.sender
            && self.recipient_hash == event.recipient_hash
            && self.content == event.content
    }
}

/// For each pending message, whether a confirmed event stands for it.
///
/// Every event resolves at most one pending message.  Matching by
/// transaction id is tried before matching by sender, recipient and content.
pub fn resolve_pending(events: &[MessageEvent], pending: &[PendingMessage]) -> Vec<bool> {
    let mut resolved = vec![false; pending.len()];
    let mut used = vec![false; events.len()];

    for (ei, event) in events.iter().enumerate() {
        if let Some(pi) = (0..pending.len()).find(|&pi| !resolved[pi] && pending[pi].same_tx(event)) {
            resolved[pi] = true;
            used[ei] = true;
        }
    }

    for (ei, event) in events.iter().enumerate() {
        if used[ei] {
            continue;
        }
        if let Some(pi) =
            (0..pending.len()).find(|&pi| !resolved[pi] && pending[pi].same_payload(event))
        {
            resolved[pi] = true;
            used[ei] = true;
        }
    }

    resolved
}
