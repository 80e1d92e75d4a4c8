//! Message reconciler: turns freshly fetched blocks and live pushes into
//! the per-recipient event log.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use blockchat_shared::BlockNumber;

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::ledger::MessageEvent;
use crate::registry::raise_block_count;
use crate::retry::retry;
use crate::timeline::{merge, TimelineEntry};

/// Inclusive event ranges covering `[block, block + skip]`, each at most
/// `max_span` blocks wide.
pub fn sub_ranges(
    block: BlockNumber,
    skip: u64,
    max_span: Option<u64>,
) -> Vec<(BlockNumber, BlockNumber)> {
    let end = block.saturating_add(skip);
    let Some(span) = max_span.filter(|s| *s > 0) else {
        return vec![(block, end)];
    };

    let mut ranges = Vec::new();
    let mut from = block;
    loop {
        let to = from.saturating_add(span - 1).min(end);
        ranges.push((from, to));
        if to >= end {
            break;
        }
        from = to + 1;
    }
    ranges
}

#[derive(Clone, Debug)]
pub struct Reconciler {
    ctx: Arc<SyncContext>,
}

impl Reconciler {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Width of the event range per message block, queried once per
    /// context.
    pub async fn block_skip(&self) -> Result<u64> {
        let ledger = self.ctx.ledger();
        let attempts = self.ctx.config().fetch_attempts;
        self.ctx
            .block_skip_cell()
            .get_or_try_init(|| async move {
                let skip = retry(attempts, "block skip", || ledger.block_skip()).await?;
                debug!(block_skip = skip, "Block skip fetched");
                Ok::<u64, SyncError>(skip)
            })
            .await
            .copied()
    }

    /// Fetch the events of `blocks` and insert the ones not stored yet.
    ///
    /// Sub-ranges are queried concurrently; a sub-range that keeps failing
    /// is logged and skipped.  Returns the number of inserted events.
    pub async fn reconcile_blocks(&self, key: &str, blocks: &[BlockNumber]) -> Result<usize> {
        if blocks.is_empty() {
            return Ok(0);
        }
        let (id, hash) = {
            let state = self.ctx.lock();
            let recipient = state
                .recipients
                .get(key)
                .ok_or_else(|| SyncError::NotFound(format!("recipient {key}")))?;
            (recipient.id, recipient.hash.clone())
        };
        let skip = self.block_skip().await?;
        let max_span = self.ctx.config().max_event_span;
        let attempts = self.ctx.config().fetch_attempts;
        let ledger = self.ctx.ledger();

        let queries = blocks.iter().flat_map(|&block| {
            sub_ranges(block, skip, max_span)
                .into_iter()
                .map(move |(from, to)| (block, from, to))
        });
        let hash_ref = &hash;
        let results = join_all(queries.map(|(block, from, to)| async move {
            let result = retry(attempts, "message events", || {
                ledger.fetch_message_events(hash_ref, from, to)
            })
            .await;
            (block, from, to, result)
        }))
        .await;

        let inserted = {
            let mut guard = self.ctx.lock();
            let state = &mut *guard;
            if state.live_recipient_mut(key, id).is_none() {
                debug!(recipient = %key, "Recipient removed during reconcile, discarding events");
                return Ok(0);
            }
            let log = state.logs.entry(key.to_string()).or_default();
            for &block in blocks {
                log.ensure_bucket(block);
            }

            let mut inserted = 0;
            for (block, from, to, result) in results {
                match result {
                    Ok(events) => {
                        inserted += events
                            .into_iter()
                            .map(MessageEvent::normalized)
                            .filter(|e| e.recipient_hash == hash)
                            .filter(|e| log.insert(block, e.clone()))
                            .count();
                    }
                    Err(e) => {
                        warn!(recipient = %key, from, to, error = %e, "Skipping event range");
                    }
                }
            }
            inserted
        };

        debug!(recipient = %key, blocks = blocks.len(), inserted, "Reconciled blocks");
        self.ctx.notify(SyncEvent::EventsReconciled {
            key: key.to_string(),
            inserted,
        });
        Ok(inserted)
    }

    /// Apply a live-pushed event to every recipient it belongs to.
    ///
    /// Returns `false` when no resolved recipient matches or the event was
    /// already stored.
    pub fn apply_pushed(&self, event: MessageEvent) -> bool {
        let event = event.normalized();
        let received = {
            let mut guard = self.ctx.lock();
            let state = &mut *guard;
            let targets: Vec<(String, Option<BlockNumber>)> = state
                .recipients
                .values()
                .filter(|r| r.hash == event.recipient_hash)
                .map(|r| (r.key.clone(), r.latest_block()))
                .collect();

            let mut received = Vec::new();
            for (key, latest) in targets {
                let log = state.logs.entry(key.clone()).or_default();
                if !log.insert_pushed(latest, event.clone()) {
                    continue;
                }
                if latest.is_none() {
                    // first message before any history: make the next fetch see its block
                    raise_block_count(state, &key, 1);
                }
                received.push(key);
            }
            received
        };

        if received.is_empty() {
            debug!(hash = %event.recipient_hash, "Pushed event ignored");
            return false;
        }
        for key in received {
            debug!(recipient = %key, block = event.block_number, "Message received");
            self.ctx.notify(SyncEvent::MessageReceived {
                key,
                block_number: event.block_number,
            });
        }
        true
    }

    /// Confirmed events of `key` in ledger order, then its unresolved
    /// pending messages.
    pub fn timeline(&self, key: &str) -> Vec<TimelineEntry> {
        let state = self.ctx.lock();
        let pending = state.pending.get(key).map(Vec::as_slice).unwrap_or_default();
        match state.logs.get(key) {
            Some(log) => merge(log, pending),
            None => merge(&Default::default(), pending),
        }
    }

    pub fn events_in_block(&self, key: &str, block: BlockNumber) -> Vec<MessageEvent> {
        self.ctx
            .lock()
            .logs
            .get(key)
            .and_then(|log| log.bucket(block))
            .map(<[MessageEvent]>::to_vec)
            .unwrap_or_default()
    }
}
