//! Shared state of one synchronization session.
//!
//! [`SyncContext`] is created once per session and handed (as an `Arc`) to
//! every component.  The mutable part lives in [`SyncState`] behind a
//! mutex that is only held for short, non-`await` critical sections, so
//! every mutation is a single atomic step even though components interleave
//! at their remote calls.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, OnceCell};

use blockchat_shared::{Address, RecipientHash};
use blockchat_store::Snapshot;

use crate::config::SyncConfig;
use crate::data_upload::DataRecord;
use crate::events::{SyncEvent, EVENT_CHANNEL_CAPACITY};
use crate::ledger::LedgerClient;
use crate::pending::PendingMessage;
use crate::registry::Recipient;
use crate::timeline::EventLog;

/// Mutable session state.
///
/// Field ownership: the registry writes `recipients` (except
/// `fetched_blocks`), `order`, `active`, `page_size` and `encrypted`; the
/// fetcher grows `fetched_blocks`; the reconciler inserts into `logs`; the
/// outbound pipeline owns `pending`; the data-upload resolver owns `data`.
#[derive(Debug)]
pub struct SyncState {
    pub(crate) recipients: HashMap<String, Recipient>,
    pub(crate) creating: HashMap<String, Arc<OnceCell<Recipient>>>,
    pub(crate) order: Vec<String>,
    pub(crate) active: Option<String>,
    pub(crate) page_size: u64,
    pub(crate) encrypted: BTreeSet<String>,
    pub(crate) logs: HashMap<String, EventLog>,
    pub(crate) pending: HashMap<String, Vec<PendingMessage>>,
    pub(crate) data: HashMap<(RecipientHash, String), DataRecord>,
}

impl SyncState {
    fn new(page_size: u64) -> Self {
        Self {
            recipients: HashMap::new(),
            creating: HashMap::new(),
            order: Vec::new(),
            active: None,
            page_size,
            encrypted: BTreeSet::new(),
            logs: HashMap::new(),
            pending: HashMap::new(),
            data: HashMap::new(),
        }
    }

    /// Resolved recipient whose record still has generation `id`.
    pub(crate) fn live_recipient_mut(&mut self, key: &str, id: u64) -> Option<&mut Recipient> {
        self.recipients.get_mut(key).filter(|r| r.id == id)
    }
}

pub struct SyncContext {
    ledger: Arc<dyn LedgerClient>,
    config: SyncConfig,
    user: Address,
    state: Mutex<SyncState>,
    events: broadcast::Sender<SyncEvent>,
    block_skip: OnceCell<u64>,
    next_id: AtomicU64,
}

impl SyncContext {
    pub fn new(ledger: Arc<dyn LedgerClient>, config: SyncConfig, user: Address) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let user = Address::parse(user.as_str()).unwrap_or(user);
        Arc::new(Self {
            ledger,
            state: Mutex::new(SyncState::new(config.page_size)),
            config,
            user,
            events,
            block_skip: OnceCell::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn ledger(&self) -> &dyn LedgerClient {
        self.ledger.as_ref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Address of the local user, supplied once at session start and
    /// stored lower-cased.
    pub fn user(&self) -> &Address {
        &self.user
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SyncState> {
        // state is only mutated in single steps, so a panic elsewhere
        // cannot leave it half-written
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn block_skip_cell(&self) -> &OnceCell<u64> {
        &self.block_skip
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub(crate) fn notify(&self, event: SyncEvent) {
        // no receivers is fine, nobody is watching yet
        if self.events.send(event).is_err() {
            tracing::trace!("No subscribers for sync event");
        }
    }

    /// The persisted part of the state.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            recipients: state.order.clone(),
            active: state.active.clone(),
            page_size: state.page_size,
            encrypted_recipients: state.encrypted.clone(),
        }
    }

    /// Replace the persisted part of the state with `snapshot`.
    pub(crate) fn restore(&self, snapshot: Snapshot) {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.order = Vec::with_capacity(snapshot.recipients.len());
        for key in snapshot.recipients {
            if !state.order.contains(&key) {
                state.order.push(key);
            }
        }
        let active = snapshot.active.filter(|a| state.order.contains(a));
        state.active = active;
        if snapshot.page_size > 0 {
            state.page_size = snapshot.page_size;
        }
        state.encrypted = snapshot.encrypted_recipients;
        for recipient in state.recipients.values_mut() {
            recipient.use_encryption = state.encrypted.contains(&recipient.key);
        }
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("user", &self.user)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_context, MockLedger};

    #[test]
    fn test_snapshot_restore_dedups_and_validates_active() {
        let ctx = test_context(MockLedger::new());
        let mut snapshot = Snapshot {
            recipients: vec!["a".into(), "b".into(), "a".into()],
            active: Some("zzz".into()),
            page_size: 0,
            ..Snapshot::default()
        };
        snapshot.encrypted_recipients.insert("b".into());

        ctx.restore(snapshot);
        let restored = ctx.snapshot();

        assert_eq!(restored.recipients, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(restored.active, None);
        assert_eq!(restored.page_size, SyncConfig::default().page_size);
        assert!(restored.encrypted_recipients.contains("b"));
    }

    #[test]
    fn test_ids_are_unique() {
        let ctx = test_context(MockLedger::new());
        assert_ne!(ctx.next_id(), ctx.next_id());
    }
}
