//! Recipient registry: the set of known conversation targets, their block
//! cursors, the ordered recipient list and the active recipient.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use blockchat_shared::{Address, BlockNumber, RecipientHash};

use crate::context::{SyncContext, SyncState};
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;

/// A conversation target and its sync cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    /// Generation of this record; a re-created record gets a new id.
    pub id: u64,
    pub key: String,
    pub hash: RecipientHash,
    /// Message blocks the ledger has allocated to this recipient.
    pub total_block_count: u64,
    /// Fetched block numbers, oldest first.
    pub fetched_blocks: Vec<BlockNumber>,
    pub use_encryption: bool,
}

impl Recipient {
    /// Most recent fetched block.
    pub fn latest_block(&self) -> Option<BlockNumber> {
        self.fetched_blocks.last().copied()
    }

    pub fn is_fully_fetched(&self) -> bool {
        self.fetched_blocks.len() as u64 >= self.total_block_count
    }
}

/// Canonical form of a user-supplied recipient key.
pub fn normalize_key(key: &str) -> String {
    match Address::parse(key) {
        Some(address) => address.0,
        None => key.to_string(),
    }
}

/// Raise the block count of `key` to at least `count`.
pub(crate) fn raise_block_count(state: &mut SyncState, key: &str, count: u64) -> bool {
    match state.recipients.get_mut(key) {
        Some(recipient) if recipient.total_block_count < count => {
            recipient.total_block_count = count;
            true
        }
        _ => false,
    }
}

#[derive(Clone, Debug)]
pub struct Registry {
    ctx: Arc<SyncContext>,
}

impl Registry {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Ledger identifier of `key`: the address itself for canonical
    /// addresses, the ledger's content hash otherwise.
    pub fn hash_for(&self, key: &str) -> RecipientHash {
        match Address::parse(key) {
            Some(address) => RecipientHash::from(&address),
            None => self.ctx.ledger().recipient_hash(key),
        }
    }

    /// Return the record of `key`, creating it on first reference.
    ///
    /// Concurrent calls for an unresolved key share one creation: the first
    /// caller registers a pending marker, later callers await it instead of
    /// querying the ledger again.
    pub async fn resolve(&self, key: &str) -> Result<Recipient> {
        let marker = {
            let mut state = self.ctx.lock();
            if let Some(recipient) = state.recipients.get(key) {
                return Ok(recipient.clone());
            }
            state
                .creating
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = marker
            .get_or_try_init(|| self.create(key, &marker))
            .await
            .cloned();

        let mut state = self.ctx.lock();
        if state
            .creating
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, &marker))
        {
            state.creating.remove(key);
        }
        result
    }

    async fn create(&self, key: &str, marker: &Arc<OnceCell<Recipient>>) -> Result<Recipient> {
        let hash = self.hash_for(key);
        let total = self
            .ctx
            .ledger()
            .recipient_message_block_count(&hash)
            .await?;

        let recipient = {
            let mut guard = self.ctx.lock();
            let state = &mut *guard;
            // a remove while the count was in flight drops the marker
            let still_wanted = state
                .creating
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, marker));
            if !still_wanted {
                debug!(recipient = %key, "Recipient removed during creation, discarding");
                return Err(SyncError::NotFound(format!("recipient {key}")));
            }
            let use_encryption = state.encrypted.contains(key);
            let id = self.ctx.next_id();
            state.logs.entry(key.to_string()).or_default();
            state
                .recipients
                .entry(key.to_string())
                .or_insert_with(|| Recipient {
                    id,
                    key: key.to_string(),
                    hash: hash.clone(),
                    total_block_count: total,
                    fetched_blocks: Vec::new(),
                    use_encryption,
                })
                .clone()
        };

        info!(recipient = %key, hash = %hash, total_blocks = total, "Recipient resolved");
        self.ctx.notify(SyncEvent::RecipientResolved {
            key: key.to_string(),
        });
        Ok(recipient)
    }

    /// Re-query the block count of `key`; the count never decreases.
    pub async fn refresh_block_count(&self, key: &str) -> Result<u64> {
        let hash = self
            .recipient(key)
            .map(|r| r.hash)
            .ok_or_else(|| SyncError::NotFound(format!("recipient {key}")))?;
        let total = self
            .ctx
            .ledger()
            .recipient_message_block_count(&hash)
            .await?;

        let mut state = self.ctx.lock();
        raise_block_count(&mut state, key, total);
        Ok(state
            .recipients
            .get(key)
            .map(|r| r.total_block_count)
            .unwrap_or(total))
    }

    /// Remove `key` and everything derived from it.
    ///
    /// Removing the active recipient hands the active status to its
    /// neighbour first; removing the only one fails with
    /// [`SyncError::InvariantViolation`] and changes nothing.
    pub fn remove(&self, key: &str) -> Result<()> {
        let new_active = {
            let mut guard = self.ctx.lock();
            let state = &mut *guard;

            let index = state.order.iter().position(|k| k == key);
            if index.is_none()
                && !state.recipients.contains_key(key)
                && !state.creating.contains_key(key)
            {
                debug!(recipient = %key, "Remove of unknown recipient ignored");
                return Ok(());
            }

            let mut new_active = None;
            if state.active.as_deref() == Some(key) {
                let neighbour = index.and_then(|i| {
                    let j = if i == 0 { 1 } else { i - 1 };
                    state.order.get(j).cloned()
                });
                match neighbour {
                    Some(next) => {
                        state.active = Some(next.clone());
                        new_active = Some(next);
                    }
                    None => {
                        return Err(SyncError::InvariantViolation(
                            "at least one recipient must remain".into(),
                        ))
                    }
                }
            }

            if let Some(i) = index {
                state.order.remove(i);
            }
            state.encrypted.remove(key);
            state.creating.remove(key);
            state.logs.remove(key);
            state.pending.remove(key);
            if let Some(removed) = state.recipients.remove(key) {
                let shared = state.recipients.values().any(|r| r.hash == removed.hash);
                if !shared {
                    state.data.retain(|(hash, _), _| *hash != removed.hash);
                }
            }
            new_active
        };

        info!(recipient = %key, "Recipient removed");
        if let Some(next) = new_active {
            self.ctx
                .notify(SyncEvent::ActiveRecipientChanged { key: next });
        }
        self.ctx.notify(SyncEvent::RecipientRemoved {
            key: key.to_string(),
        });
        self.ctx.notify(SyncEvent::RecipientListChanged);
        Ok(())
    }

    /// Make `key` the active recipient, adding it to the list if needed.
    /// Returns the normalized key.
    pub fn set_active(&self, key: &str) -> String {
        let key = normalize_key(key);
        let added = {
            let mut state = self.ctx.lock();
            let added = !state.order.contains(&key);
            if added {
                state.order.push(key.clone());
            }
            state.active = Some(key.clone());
            added
        };

        if added {
            self.ctx.notify(SyncEvent::RecipientListChanged);
        }
        self.ctx
            .notify(SyncEvent::ActiveRecipientChanged { key: key.clone() });
        key
    }

    /// Append `key` to the recipient list without changing the active one.
    pub fn add(&self, key: &str) -> String {
        let key = normalize_key(key);
        let added = {
            let mut state = self.ctx.lock();
            let added = !state.order.contains(&key);
            if added {
                state.order.push(key.clone());
            }
            added
        };
        if added {
            self.ctx.notify(SyncEvent::RecipientListChanged);
        }
        key
    }

    pub fn set_use_encryption(&self, key: &str, enabled: bool) {
        {
            let mut state = self.ctx.lock();
            if enabled {
                state.encrypted.insert(key.to_string());
            } else {
                state.encrypted.remove(key);
            }
            if let Some(recipient) = state.recipients.get_mut(key) {
                recipient.use_encryption = enabled;
            }
        }
        self.ctx.notify(SyncEvent::SettingsChanged);
    }

    pub fn set_page_size(&self, page_size: u64) -> Result<()> {
        if page_size == 0 {
            return Err(SyncError::InvariantViolation(
                "page size must be positive".into(),
            ));
        }
        self.ctx.lock().page_size = page_size;
        self.ctx.notify(SyncEvent::SettingsChanged);
        Ok(())
    }

    pub fn page_size(&self) -> u64 {
        self.ctx.lock().page_size
    }

    pub fn recipient(&self, key: &str) -> Option<Recipient> {
        self.ctx.lock().recipients.get(key).cloned()
    }

    /// The ordered recipient list.
    pub fn recipient_keys(&self) -> Vec<String> {
        self.ctx.lock().order.clone()
    }

    pub fn active(&self) -> Option<String> {
        self.ctx.lock().active.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_context, MockLedger};
    use std::sync::atomic::Ordering;

    const ALICE: &str = "0x00000000000000000000000000000000000000a1";

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let ledger = MockLedger::new();
        ledger.set_blocks(&RecipientHash(ALICE.into()), vec![3, 7]);
        let ctx = test_context(ledger.clone());
        let registry = Registry::new(ctx);

        let first = registry.resolve(ALICE).await.unwrap();
        let second = registry.resolve(ALICE).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.total_block_count, 2);
        assert_eq!(first.hash, RecipientHash(ALICE.into()));
        assert_eq!(ledger.count_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolve_creates_once() {
        let ledger = MockLedger::new();
        let gate = ledger.gate_block_count();
        let ctx = test_context(ledger.clone());
        let registry = Registry::new(ctx);

        let (a, b, ()) = tokio::join!(registry.resolve("general"), registry.resolve("general"), async {
            tokio::task::yield_now().await;
            gate.notify_waiters();
            gate.notify_one();
        });

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(ledger.count_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_name_uses_content_hash() {
        let ctx = test_context(MockLedger::new());
        let registry = Registry::new(ctx);

        let recipient = registry.resolve("general").await.unwrap();
        assert_eq!(recipient.hash, blockchat_shared::hashing::content_hash("general"));
    }

    #[tokio::test]
    async fn test_failed_creation_leaves_no_record() {
        let ledger = MockLedger::new();
        ledger.fail_block_count.store(true, Ordering::SeqCst);
        let ctx = test_context(ledger.clone());
        let registry = Registry::new(ctx);

        assert!(matches!(
            registry.resolve("general").await,
            Err(SyncError::RemoteUnavailable(_))
        ));
        assert!(registry.recipient("general").is_none());

        ledger.fail_block_count.store(false, Ordering::SeqCst);
        assert!(registry.resolve("general").await.is_ok());
        assert_eq!(ledger.count_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_remove_during_creation_leaves_no_record() {
        let ledger = MockLedger::new();
        let gate = ledger.gate_block_count();
        let ctx = test_context(ledger);
        let registry = Registry::new(ctx.clone());
        registry.add("general");
        registry.add(ALICE);
        registry.set_active("general");

        let (resolved, ()) = tokio::join!(registry.resolve(ALICE), async {
            tokio::task::yield_now().await;
            registry.remove(ALICE).unwrap();
            gate.notify_one();
        });

        assert!(matches!(resolved, Err(SyncError::NotFound(_))));
        assert!(registry.recipient(ALICE).is_none());
        {
            let state = ctx.lock();
            assert!(!state.logs.contains_key(ALICE));
            assert!(!state.creating.contains_key(ALICE));
        }

        let pushed = crate::testing::message(&RecipientHash(ALICE.into()), ALICE, "late", 5, 0);
        assert!(!crate::reconciler::Reconciler::new(ctx).apply_pushed(pushed));
    }

    #[tokio::test]
    async fn test_remove_sole_recipient_rejected() {
        let ctx = test_context(MockLedger::new());
        let registry = Registry::new(ctx.clone());
        registry.set_active(ALICE);
        registry.resolve(ALICE).await.unwrap();
        let before = ctx.snapshot();

        assert!(matches!(
            registry.remove(ALICE),
            Err(SyncError::InvariantViolation(_))
        ));
        assert_eq!(ctx.snapshot(), before);
        assert!(registry.recipient(ALICE).is_some());
    }

    #[tokio::test]
    async fn test_remove_active_reassigns_neighbour() {
        let ctx = test_context(MockLedger::new());
        let registry = Registry::new(ctx);
        registry.add("a");
        registry.add("b");
        registry.add("c");

        registry.set_active("b");
        registry.remove("b").unwrap();
        assert_eq!(registry.active().as_deref(), Some("a"));

        registry.remove("a").unwrap();
        assert_eq!(registry.active().as_deref(), Some("c"));
        assert_eq!(registry.recipient_keys(), vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_first_active_moves_to_next() {
        let ctx = test_context(MockLedger::new());
        let registry = Registry::new(ctx);
        registry.add("a");
        registry.add("b");
        registry.set_active("a");

        registry.remove("a").unwrap();
        assert_eq!(registry.active().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_remove_cascades_and_allows_recreation() {
        let ledger = MockLedger::new();
        let ctx = test_context(ledger.clone());
        let registry = Registry::new(ctx.clone());
        registry.add("a");
        registry.add("general");
        registry.set_active("a");

        let first = registry.resolve("general").await.unwrap();
        registry.remove("general").unwrap();

        {
            let state = ctx.lock();
            assert!(!state.logs.contains_key("general"));
            assert!(!state.pending.contains_key("general"));
        }
        let second = registry.resolve("general").await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(ledger.count_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_set_active_normalizes_addresses() {
        let ctx = test_context(MockLedger::new());
        let registry = Registry::new(ctx);

        let key = registry.set_active("0x00000000000000000000000000000000000000A1");
        assert_eq!(key, ALICE);
        registry.set_active(ALICE);
        assert_eq!(registry.recipient_keys(), vec![ALICE.to_string()]);
    }

    #[tokio::test]
    async fn test_block_count_never_decreases() {
        let ledger = MockLedger::new();
        let hash = RecipientHash(ALICE.into());
        ledger.set_blocks(&hash, vec![1, 2, 3]);
        let ctx = test_context(ledger.clone());
        let registry = Registry::new(ctx);
        registry.resolve(ALICE).await.unwrap();

        ledger.set_blocks(&hash, vec![1]);
        assert_eq!(registry.refresh_block_count(ALICE).await.unwrap(), 3);

        ledger.set_blocks(&hash, vec![1, 2, 3, 4]);
        assert_eq!(registry.refresh_block_count(ALICE).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_list_changes_are_notified() {
        let ctx = test_context(MockLedger::new());
        let mut rx = ctx.subscribe();
        let registry = Registry::new(ctx);

        registry.set_active("general");
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::RecipientListChanged);
        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::ActiveRecipientChanged {
                key: "general".into()
            }
        );
    }
}
