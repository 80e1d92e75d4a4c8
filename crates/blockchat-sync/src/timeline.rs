//! Per-recipient store of confirmed events and the merged timeline view.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use blockchat_shared::BlockNumber;

use crate::ledger::{EventKey, MessageEvent};
use crate::pending::{resolve_pending, PendingMessage};

/// Confirmed events of one recipient, bucketed by the message block they
/// were fetched for.
///
/// Events pushed before any block was fetched live in a separate bucket so
/// that "no block fetched yet" never has to masquerade as block `0`.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    buckets: BTreeMap<BlockNumber, Vec<MessageEvent>>,
    live: Vec<MessageEvent>,
    seen: HashSet<EventKey>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a bucket exists for `block`, even if it holds no events.
    pub fn ensure_bucket(&mut self, block: BlockNumber) {
        self.buckets.entry(block).or_default();
    }

    /// Insert `event` into the bucket of `block` unless already stored.
    pub fn insert(&mut self, block: BlockNumber, event: MessageEvent) -> bool {
        if !self.seen.insert(event.key()) {
            return false;
        }
        self.buckets.entry(block).or_default().push(event);
        true
    }

    /// Insert a pushed event into the most recently fetched block's bucket,
    /// or the live bucket when no block has been fetched yet.
    pub fn insert_pushed(&mut self, latest_block: Option<BlockNumber>, event: MessageEvent) -> bool {
        match latest_block {
            Some(block) => self.insert(block, event),
            None => {
                if !self.seen.insert(event.key()) {
                    return false;
                }
                self.live.push(event);
                true
            }
        }
    }

    pub fn bucket(&self, block: BlockNumber) -> Option<&[MessageEvent]> {
        self.buckets.get(&block).map(Vec::as_slice)
    }

    pub fn live(&self) -> &[MessageEvent] {
        &self.live
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// All events ordered by ledger position.
    pub fn ordered(&self) -> Vec<MessageEvent> {
        let mut events: Vec<MessageEvent> = self
            .buckets
            .values()
            .flatten()
            .chain(self.live.iter())
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            (a.block_number, a.log_index).cmp(&(b.block_number, b.log_index))
        });
        events
    }
}

/// One visible row of a recipient's conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TimelineEntry {
    Confirmed(MessageEvent),
    Pending(PendingMessage),
}

impl TimelineEntry {
    pub fn content(&self) -> &str {
        match self {
            TimelineEntry::Confirmed(e) => &e.content,
            TimelineEntry::Pending(p) => &p.content,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TimelineEntry::Pending(_))
    }
}

/// Confirmed events in ledger order, then unresolved pending messages in
/// submission order.
pub fn merge(log: &EventLog, pending: &[PendingMessage]) -> Vec<TimelineEntry> {
    let events = log.ordered();
    let resolved = resolve_pending(&events, pending);

    let mut entries: Vec<TimelineEntry> =
        events.into_iter().map(TimelineEntry::Confirmed).collect();
    entries.extend(
        pending
            .iter()
            .zip(resolved)
            .filter(|(_, done)| !done)
            .map(|(p, _)| TimelineEntry::Pending(p.clone())),
    );
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockchat_shared::{Address, RecipientHash};
    use chrono::Utc;

    use crate::pending::PendingStatus;

    fn event(block_number: BlockNumber, log_index: u32, content: &str) -> MessageEvent {
        MessageEvent {
            sender: Address("0x00000000000000000000000000000000000000bb".into()),
            recipient_hash: RecipientHash("0xr".into()),
            content: content.into(),
            block_number,
            log_index,
            tx_hash: None,
        }
    }

    #[test]
    fn test_insert_dedups_by_key() {
        let mut log = EventLog::new();
        assert!(log.insert(10, event(10, 0, "a")));
        assert!(!log.insert(10, event(10, 0, "a")));
        assert!(!log.insert(11, event(10, 0, "a")));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_push_without_fetched_block_goes_live() {
        let mut log = EventLog::new();
        assert!(log.insert_pushed(None, event(42, 0, "first")));
        assert_eq!(log.live().len(), 1);
        assert!(log.bucket(0).is_none());

        // refetch of the same event is dropped
        assert!(!log.insert(42, event(42, 0, "first")));
    }

    #[test]
    fn test_push_appends_to_latest_bucket() {
        let mut log = EventLog::new();
        log.ensure_bucket(30);
        assert!(log.insert_pushed(Some(30), event(31, 0, "new")));
        assert_eq!(log.bucket(30).map(<[MessageEvent]>::len), Some(1));
    }

    #[test]
    fn test_ordered_by_ledger_position() {
        let mut log = EventLog::new();
        log.insert(20, event(21, 1, "c"));
        log.insert(10, event(10, 0, "a"));
        log.insert_pushed(None, event(21, 0, "b"));

        let contents: Vec<String> = log.ordered().into_iter().map(|e| e.content).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_puts_unresolved_pending_last() {
        let mut log = EventLog::new();
        log.insert(10, event(10, 0, "hello"));

        let pending = PendingMessage {
            client_id: 1,
            sender: Address("0x00000000000000000000000000000000000000aa".into()),
            recipient_hash: RecipientHash("0xr".into()),
            content: "hi".into(),
            created_at: Utc::now(),
            status: PendingStatus::Submitted,
            tx_hash: None,
        };

        let entries = merge(&log, &[pending]);
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].is_pending());
        assert!(entries[1].is_pending());
        assert_eq!(entries[1].content(), "hi");
    }
}
