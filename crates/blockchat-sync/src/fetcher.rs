//! Block-range fetcher: walks a recipient's message blocks backward from the
//! most recent one, one bounded page at a time.

use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, warn};

use blockchat_shared::BlockNumber;

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::retry::retry;

/// List indices of the next page to fetch, or `None` when everything has
/// been fetched.
///
/// The page ends where the already fetched tail begins and is clamped at
/// index zero, so the last page may be partial.
pub fn unseen_span(total: u64, fetched: u64, page_size: u64) -> Option<Range<u64>> {
    if fetched >= total || page_size == 0 {
        return None;
    }
    let end = total - fetched;
    let start = end.saturating_sub(page_size);
    Some(start..end)
}

#[derive(Clone, Debug)]
pub struct Fetcher {
    ctx: Arc<SyncContext>,
}

impl Fetcher {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Fetch the next unseen page of `key` and prepend it to its cursor.
    ///
    /// Returns the newly fetched block numbers (oldest first), or nothing
    /// when the recipient is fully fetched.  If the record was removed or
    /// its cursor moved while the call was in flight, the result is
    /// discarded and an empty list returned.
    pub async fn fetch_unseen(&self, key: &str, page_size: u64) -> Result<Vec<BlockNumber>> {
        let (id, hash, total, fetched) = {
            let state = self.ctx.lock();
            let recipient = state
                .recipients
                .get(key)
                .ok_or_else(|| SyncError::NotFound(format!("recipient {key}")))?;
            (
                recipient.id,
                recipient.hash.clone(),
                recipient.total_block_count,
                recipient.fetched_blocks.len(),
            )
        };

        let Some(span) = unseen_span(total, fetched as u64, page_size) else {
            debug!(recipient = %key, total, fetched, "Nothing left to fetch");
            return Ok(Vec::new());
        };
        let count = span.end - span.start;

        let ledger = self.ctx.ledger();
        let mut blocks = retry(self.ctx.config().fetch_attempts, "message blocks", || {
            ledger.fetch_message_blocks(&hash, span.start, count)
        })
        .await
        .map_err(|e| {
            warn!(recipient = %key, start = span.start, count, error = %e, "Block fetch failed");
            SyncError::from(e)
        })?;

        if blocks.len() as u64 != count {
            warn!(
                recipient = %key,
                expected = count,
                got = blocks.len(),
                "Ledger returned an unexpected number of blocks"
            );
            blocks.truncate(count as usize);
        }

        {
            let mut state = self.ctx.lock();
            match state.live_recipient_mut(key, id) {
                Some(recipient) if recipient.fetched_blocks.len() == fetched => {
                    recipient.fetched_blocks.splice(0..0, blocks.iter().copied());
                }
                _ => {
                    debug!(recipient = %key, "Recipient changed during fetch, discarding page");
                    return Ok(Vec::new());
                }
            }
        }

        debug!(
            recipient = %key,
            start = span.start,
            end = span.end,
            fetched = blocks.len(),
            "Fetched message blocks"
        );
        self.ctx.notify(SyncEvent::BlocksFetched {
            key: key.to_string(),
            count: blocks.len(),
        });
        Ok(blocks)
    }
}
