//! Outbound send pipeline: optimistic local messages, submission and
//! ledger status tracking.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use blockchat_shared::crypto;
use blockchat_shared::RecipientHash;

use crate::context::SyncContext;
use crate::data_upload::DataUploads;
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::ledger::SubmitStatus;
use crate::pending::{ClientId, PendingMessage, PendingStatus};
use crate::registry::Registry;

#[derive(Clone, Debug)]
pub struct Outbound {
    ctx: Arc<SyncContext>,
}

impl Outbound {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Send `content` to the active recipient.
    pub async fn send_active(&self, content: &str) -> Result<ClientId> {
        let key = self
            .ctx
            .lock()
            .active
            .clone()
            .ok_or_else(|| SyncError::NotFound("active recipient".into()))?;
        self.send(&key, content).await
    }

    /// Send `content` to `key`.
    ///
    /// The message is visible as pending from the moment it is submitted.
    /// A rejected submission marks it failed and returns the error; the
    /// entry stays visible until dismissed.
    pub async fn send(&self, key: &str, content: &str) -> Result<ClientId> {
        let recipient = Registry::new(self.ctx.clone()).resolve(key).await?;
        let body = if recipient.use_encryption {
            let public_key = DataUploads::new(self.ctx.clone())
                .public_key(key)
                .ok_or_else(|| SyncError::MissingKey(key.to_string()))?;
            crypto::seal(&crypto::parse_public_key(&public_key)?, content.as_bytes())?
        } else {
            content.to_string()
        };

        let client_id = self.ctx.next_id();
        {
            let mut state = self.ctx.lock();
            state
                .pending
                .entry(key.to_string())
                .or_default()
                .push(PendingMessage {
                    client_id,
                    sender: self.ctx.user().clone(),
                    recipient_hash: recipient.hash.clone(),
                    content: body.clone(),
                    created_at: Utc::now(),
                    status: PendingStatus::Drafting,
                    tx_hash: None,
                });
        }
        self.ctx.notify(SyncEvent::PendingUpdated {
            key: key.to_string(),
            client_id,
            status: PendingStatus::Drafting,
        });

        self.submit(key, &recipient.hash, &body, client_id).await?;
        info!(recipient = %key, client_id, encrypted = recipient.use_encryption, "Message sent");
        Ok(client_id)
    }

    async fn submit(
        &self,
        key: &str,
        hash: &RecipientHash,
        body: &str,
        client_id: ClientId,
    ) -> Result<()> {
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let submit = self.ctx.ledger().submit_message(hash, body, status_tx);
        tokio::pin!(submit);

        let outcome = loop {
            tokio::select! {
                biased;
                Some(status) = status_rx.recv() => self.apply_status(key, client_id, status),
                result = &mut submit => break result,
            }
        };

        if let Err(e) = outcome {
            warn!(recipient = %key, client_id, error = %e, "Submission rejected");
            self.set_status(key, client_id, PendingStatus::Failed);
            return Err(e.into());
        }
        self.set_status(key, client_id, PendingStatus::Submitted);

        loop {
            match status_rx.try_recv() {
                Ok(status) => self.apply_status(key, client_id, status),
                Err(TryRecvError::Empty) => {
                    // the ledger still holds the sender; later updates land here
                    let this = self.clone();
                    let key = key.to_string();
                    tokio::spawn(async move {
                        while let Some(status) = status_rx.recv().await {
                            this.apply_status(&key, client_id, status);
                        }
                        debug!(recipient = %key, client_id, "Status channel closed");
                    });
                    break;
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(())
    }

    /// Apply one ledger status update.  Updates never move a message back.
    pub fn apply_status(&self, key: &str, client_id: ClientId, status: SubmitStatus) {
        let updated = self.update(key, client_id, |pending| match status {
            SubmitStatus::TxAssigned(tx_hash) => {
                pending.assign_tx(tx_hash);
                pending.advance(PendingStatus::Submitted);
            }
            SubmitStatus::Included { tx_hash } => {
                if let Some(tx_hash) = tx_hash {
                    pending.assign_tx(tx_hash);
                }
                pending.advance(PendingStatus::Confirmed);
            }
        });
        if let Some(status) = updated {
            debug!(recipient = %key, client_id, ?status, "Pending message updated");
        }
    }

    fn set_status(&self, key: &str, client_id: ClientId, next: PendingStatus) {
        self.update(key, client_id, |pending| {
            pending.advance(next);
        });
    }

    /// Run `f` on the pending entry and notify with its resulting status.
    fn update(
        &self,
        key: &str,
        client_id: ClientId,
        f: impl FnOnce(&mut PendingMessage),
    ) -> Option<PendingStatus> {
        let status = {
            let mut state = self.ctx.lock();
            let pending = state
                .pending
                .get_mut(key)?
                .iter_mut()
                .find(|p| p.client_id == client_id)?;
            f(pending);
            pending.status
        };
        self.ctx.notify(SyncEvent::PendingUpdated {
            key: key.to_string(),
            client_id,
            status,
        });
        Some(status)
    }

    /// Pending messages of `key` in submission order.
    pub fn pending(&self, key: &str) -> Vec<PendingMessage> {
        self.ctx
            .lock()
            .pending
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop a failed message from the timeline.
    pub fn dismiss(&self, key: &str, client_id: ClientId) -> Result<()> {
        {
            let mut state = self.ctx.lock();
            let list = state
                .pending
                .get_mut(key)
                .ok_or_else(|| SyncError::NotFound(format!("pending message {client_id}")))?;
            let index = list
                .iter()
                .position(|p| p.client_id == client_id)
                .ok_or_else(|| SyncError::NotFound(format!("pending message {client_id}")))?;
            if list[index].status != PendingStatus::Failed {
                return Err(SyncError::InvariantViolation(
                    "only failed messages can be dismissed".into(),
                ));
            }
            list.remove(index);
        }
        debug!(recipient = %key, client_id, "Failed message dismissed");
        Ok(())
    }
}
