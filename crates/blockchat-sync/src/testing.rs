//! In-memory ledger used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use blockchat_shared::{Address, BlockNumber, DataHash, LedgerError, RecipientHash};

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::ledger::{DataUploadedEvent, LedgerClient, MessageEvent, StatusSender, SubmitStatus};

pub const USER: &str = "0x00000000000000000000000000000000000000ee";

pub fn user() -> Address {
    Address(USER.into())
}

pub fn test_context(ledger: MockLedger) -> Arc<SyncContext> {
    test_context_with(ledger, SyncConfig::default())
}

pub fn test_context_with(ledger: MockLedger, config: SyncConfig) -> Arc<SyncContext> {
    SyncContext::new(Arc::new(ledger), config, user())
}

pub fn message(
    recipient: &RecipientHash,
    sender: &str,
    content: &str,
    block_number: BlockNumber,
    log_index: u32,
) -> MessageEvent {
    MessageEvent {
        sender: Address(sender.into()),
        recipient_hash: recipient.clone(),
        content: content.into(),
        block_number,
        log_index,
        tx_hash: None,
    }
}

#[derive(Default)]
struct LedgerData {
    blocks: HashMap<RecipientHash, Vec<BlockNumber>>,
    events: Vec<MessageEvent>,
    failing_ranges: HashMap<(BlockNumber, BlockNumber), u32>,
    block_skip: u64,
    data_blocks: HashMap<DataHash, BlockNumber>,
    data_events: HashMap<DataHash, DataUploadedEvent>,
    submit_script: Vec<SubmitStatus>,
    reject_submit: Option<LedgerError>,
    hold_status: bool,
    held_status: Option<StatusSender>,
    subscribers: Vec<mpsc::UnboundedSender<MessageEvent>>,
}

#[derive(Clone, Default)]
pub struct MockLedger {
    pub count_calls: Arc<AtomicUsize>,
    pub block_skip_calls: Arc<AtomicUsize>,
    pub data_calls: Arc<AtomicUsize>,
    pub subscribe_calls: Arc<AtomicUsize>,
    pub fail_block_count: Arc<AtomicBool>,
    pub fail_blocks: Arc<AtomicUsize>,
    pub fail_block_skip: Arc<AtomicUsize>,
    pub block_calls: Arc<Mutex<Vec<(u64, u64)>>>,
    pub event_calls: Arc<Mutex<Vec<(BlockNumber, BlockNumber)>>>,
    pub submitted: Arc<Mutex<Vec<(RecipientHash, String)>>>,
    store: Arc<Mutex<LedgerData>>,
    count_gate: Arc<Mutex<Option<Arc<Notify>>>>,
    blocks_gate: Arc<Mutex<Option<Arc<Notify>>>>,
    events_gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl MockLedger {
    pub fn new() -> Self {
        let ledger = Self::default();
        ledger.set_block_skip(100);
        ledger
    }

    fn data(&self) -> std::sync::MutexGuard<'_, LedgerData> {
        self.store.lock().unwrap()
    }

    pub fn set_blocks(&self, recipient: &RecipientHash, blocks: Vec<BlockNumber>) {
        self.data().blocks.insert(recipient.clone(), blocks);
    }

    pub fn add_event(&self, event: MessageEvent) {
        self.data().events.push(event);
    }

    pub fn set_block_skip(&self, skip: u64) {
        self.data().block_skip = skip;
    }

    /// Fail the next `times` queries of exactly `[from, to]`.
    pub fn fail_range(&self, from: BlockNumber, to: BlockNumber, times: u32) {
        self.data().failing_ranges.insert((from, to), times);
    }

    pub fn set_data(&self, data_hash: DataHash, block: BlockNumber, event: Option<DataUploadedEvent>) {
        let mut data = self.data();
        data.data_blocks.insert(data_hash.clone(), block);
        if let Some(event) = event {
            data.data_events.insert(data_hash, event);
        }
    }

    pub fn script_submit(&self, statuses: Vec<SubmitStatus>) {
        self.data().submit_script = statuses;
    }

    pub fn reject_submit(&self, error: LedgerError) {
        self.data().reject_submit = Some(error);
    }

    /// Keep a clone of the status sender after `submit_message` returns.
    pub fn hold_status_sender(&self) {
        self.data().hold_status = true;
    }

    pub fn held_status_sender(&self) -> Option<StatusSender> {
        self.data().held_status.take()
    }

    pub fn gate_block_count(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.count_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn gate_fetch_blocks(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.blocks_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn gate_fetch_events(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.events_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Deliver `event` to every live subscriber.
    pub fn push(&self, event: MessageEvent) {
        self.data()
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn submitted(&self) -> Vec<(RecipientHash, String)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn recipient_message_block_count(
        &self,
        recipient: &RecipientHash,
    ) -> Result<u64, LedgerError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.count_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_block_count.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("node down".into()));
        }
        Ok(self
            .data()
            .blocks
            .get(recipient)
            .map_or(0, |b| b.len() as u64))
    }

    async fn fetch_message_blocks(
        &self,
        recipient: &RecipientHash,
        start: u64,
        count: u64,
    ) -> Result<Vec<BlockNumber>, LedgerError> {
        self.block_calls.lock().unwrap().push((start, count));
        let gate = self.blocks_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self
            .fail_blocks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(LedgerError::Unavailable("timeout".into()));
        }
        let data = self.data();
        let blocks = data.blocks.get(recipient).cloned().unwrap_or_default();
        let start = (start as usize).min(blocks.len());
        let end = (start + count as usize).min(blocks.len());
        Ok(blocks[start..end].to_vec())
    }

    async fn fetch_message_events(
        &self,
        recipient: &RecipientHash,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<MessageEvent>, LedgerError> {
        self.event_calls.lock().unwrap().push((from, to));
        let gate = self.events_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut data = self.data();
        if let Some(remaining) = data.failing_ranges.get_mut(&(from, to)) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LedgerError::Unavailable("range too large".into()));
            }
        }
        Ok(data
            .events
            .iter()
            .filter(|e| &e.recipient_hash == recipient)
            .filter(|e| e.block_number >= from && e.block_number <= to)
            .cloned()
            .collect())
    }

    async fn submit_message(
        &self,
        recipient: &RecipientHash,
        content: &str,
        status: StatusSender,
    ) -> Result<(), LedgerError> {
        self.submitted
            .lock()
            .unwrap()
            .push((recipient.clone(), content.to_string()));
        let mut data = self.data();
        for s in &data.submit_script {
            let _ = status.send(s.clone());
        }
        if data.hold_status {
            data.held_status = Some(status);
        }
        match data.reject_submit.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn subscribe_message_created(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<MessageEvent>, LedgerError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.data().subscribers.push(tx);
        Ok(rx)
    }

    async fn block_skip(&self) -> Result<u64, LedgerError> {
        self.block_skip_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_block_skip
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(LedgerError::Unavailable("node down".into()));
        }
        Ok(self.data().block_skip)
    }

    async fn data_block(&self, data_hash: &DataHash) -> Result<BlockNumber, LedgerError> {
        self.data_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.data().data_blocks.get(data_hash).copied().unwrap_or(0))
    }

    async fn fetch_data_uploaded_event(
        &self,
        data_hash: &DataHash,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Option<DataUploadedEvent>, LedgerError> {
        Ok(self
            .data()
            .data_events
            .get(data_hash)
            .filter(|e| e.block_number >= from && e.block_number <= to)
            .cloned())
    }
}
