//! Change notifications fired on every committed state transition.
//!
//! UI layers and the persistence worker subscribe through
//! [`SyncContext::subscribe`](crate::context::SyncContext::subscribe).

use serde::Serialize;

use blockchat_shared::BlockNumber;

use crate::pending::{ClientId, PendingStatus};

/// Capacity of the broadcast channel; slow receivers observe `Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A recipient key was added to or removed from the ordered list.
    RecipientListChanged,
    ActiveRecipientChanged { key: String },
    RecipientResolved { key: String },
    RecipientRemoved { key: String },
    BlocksFetched { key: String, count: usize },
    EventsReconciled { key: String, inserted: usize },
    MessageReceived { key: String, block_number: BlockNumber },
    PendingUpdated {
        key: String,
        client_id: ClientId,
        status: PendingStatus,
    },
    DataRecordUpdated { key: String, tag: String },
    /// Page size or per-recipient encryption changed.
    SettingsChanged,
}

impl SyncEvent {
    /// Whether the event changes the persisted snapshot.
    pub fn persists(&self) -> bool {
        matches!(
            self,
            SyncEvent::RecipientListChanged
                | SyncEvent::ActiveRecipientChanged { .. }
                | SyncEvent::RecipientRemoved { .. }
                | SyncEvent::SettingsChanged
        )
    }
}
