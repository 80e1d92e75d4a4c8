//! Session orchestration: start-up, snapshot restore, background loops and
//! the per-recipient sync sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use blockchat_shared::identity::Identity;
use blockchat_shared::{Address, BlockNumber};
use blockchat_store::Snapshot;

use crate::cache::PersistentCache;
use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::data_upload::DataUploads;
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::fetcher::Fetcher;
use crate::ledger::{LedgerClient, MessageEvent};
use crate::outbound::Outbound;
use crate::pending::ClientId;
use crate::reconciler::Reconciler;
use crate::registry::Registry;
use crate::timeline::TimelineEntry;

/// Source of the local user's address.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn user_address(&self) -> Result<Address>;
}

#[async_trait]
impl IdentityProvider for Identity {
    async fn user_address(&self) -> Result<Address> {
        Ok(self.address())
    }
}

#[async_trait]
impl IdentityProvider for Address {
    async fn user_address(&self) -> Result<Address> {
        Ok(self.clone())
    }
}

/// Components bundled for the background loops.
#[derive(Clone, Debug)]
struct Engine {
    ctx: Arc<SyncContext>,
    registry: Registry,
    fetcher: Fetcher,
    reconciler: Reconciler,
    uploads: DataUploads,
}

impl Engine {
    fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            registry: Registry::new(ctx.clone()),
            fetcher: Fetcher::new(ctx.clone()),
            reconciler: Reconciler::new(ctx.clone()),
            uploads: DataUploads::new(ctx.clone()),
            ctx,
        }
    }

    async fn sync_recipient(&self, key: &str) -> Result<()> {
        let recipient = self.registry.resolve(key).await?;

        let uploads = self.uploads.clone();
        let data_key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = uploads.resolve_data(&data_key).await {
                debug!(recipient = %data_key, error = %e, "Data records not resolved");
            }
        });

        if !recipient.fetched_blocks.is_empty() {
            return Ok(());
        }
        // the cursor only moves once the page can be reconciled
        self.reconciler.block_skip().await?;
        let blocks = self
            .fetcher
            .fetch_unseen(key, self.registry.page_size())
            .await?;
        self.reconciler.reconcile_blocks(key, &blocks).await?;
        Ok(())
    }

    async fn sync_all(&self) {
        let keys = self.registry.recipient_keys();
        let results = join_all(keys.iter().map(|key| self.sync_recipient(key))).await;
        for (key, result) in keys.iter().zip(results) {
            if let Err(e) = result {
                warn!(recipient = %key, error = %e, "Recipient sync failed");
            }
        }
    }

    async fn load_more(&self) -> Result<Vec<BlockNumber>> {
        let key = self
            .registry
            .active()
            .ok_or_else(|| SyncError::NotFound("active recipient".into()))?;
        self.registry.resolve(&key).await?;
        self.reconciler.block_skip().await?;
        let blocks = self
            .fetcher
            .fetch_unseen(&key, self.registry.page_size())
            .await?;
        self.reconciler.reconcile_blocks(&key, &blocks).await?;
        Ok(blocks)
    }
}

/// One user's synchronization session.
pub struct Session {
    engine: Engine,
    outbound: Outbound,
    cache: Arc<dyn PersistentCache>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Create a session for the user `identity` resolves to.  Nothing is
    /// loaded or fetched until [`Session::start`].
    pub async fn new(
        ledger: Arc<dyn LedgerClient>,
        cache: Arc<dyn PersistentCache>,
        identity: &dyn IdentityProvider,
        config: SyncConfig,
    ) -> Result<Self> {
        let user = identity.user_address().await?;
        let ctx = SyncContext::new(ledger, config, user);
        Ok(Self {
            outbound: Outbound::new(ctx.clone()),
            engine: Engine::new(ctx),
            cache,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Restore the cached snapshot, start the background loops and sync
    /// every listed recipient.
    ///
    /// Calling it again only re-syncs; the background loops run once.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Session already started");
            self.engine.sync_all().await;
            return Ok(());
        }

        if let Err(e) = self.restore().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        self.spawn_background().await;

        info!(
            user = %self.user(),
            recipients = self.engine.registry.recipient_keys().len(),
            "Session started"
        );
        self.engine.sync_all().await;
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        let ctx = &self.engine.ctx;
        let user = ctx.user().clone();
        let cached = self.cache.load(&user).await?;
        match &cached {
            Some(snapshot) => {
                debug!(recipients = snapshot.recipients.len(), "Snapshot restored");
                ctx.restore(snapshot.clone());
            }
            None => {
                info!(user = %user, "No snapshot cached, starting fresh");
                ctx.restore(Snapshot {
                    page_size: ctx.config().page_size,
                    ..Snapshot::default()
                });
            }
        }

        let registry = &self.engine.registry;
        registry.add(user.as_str());
        if registry.active().is_none() {
            let first = registry
                .recipient_keys()
                .into_iter()
                .next()
                .unwrap_or_else(|| user.0.clone());
            registry.set_active(&first);
        }

        if cached.as_ref() != Some(&ctx.snapshot()) {
            self.persist().await?;
        }
        Ok(())
    }

    async fn spawn_background(&self) {
        let mut handles = Vec::with_capacity(3);

        let events = self.engine.ctx.subscribe();
        let ctx = self.engine.ctx.clone();
        let cache = self.cache.clone();
        handles.push(tokio::spawn(async move {
            persistence_loop(ctx, cache, events).await;
        }));

        match self.engine.ctx.ledger().subscribe_message_created().await {
            Ok(pushed) => {
                let reconciler = self.engine.reconciler.clone();
                handles.push(tokio::spawn(async move {
                    live_loop(reconciler, pushed).await;
                }));
            }
            Err(e) => warn!(error = %e, "Live subscription unavailable"),
        }

        let events = self.engine.ctx.subscribe();
        let engine = self.engine.clone();
        handles.push(tokio::spawn(async move {
            watch_loop(engine, events).await;
        }));

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
    }

    /// Write the current snapshot now.
    pub async fn persist(&self) -> Result<()> {
        let ctx = &self.engine.ctx;
        self.cache.save(ctx.user(), &ctx.snapshot()).await
    }

    /// Resolve `key` and fetch its first page if nothing was fetched yet.
    pub async fn sync_recipient(&self, key: &str) -> Result<()> {
        self.engine.sync_recipient(key).await
    }

    /// Fetch and reconcile the next older page of the active recipient.
    pub async fn load_more(&self) -> Result<Vec<BlockNumber>> {
        self.engine.load_more().await
    }

    /// Send `content` to the active recipient.
    pub async fn send(&self, content: &str) -> Result<ClientId> {
        self.outbound.send_active(content).await
    }

    pub fn timeline(&self, key: &str) -> Vec<TimelineEntry> {
        self.engine.reconciler.timeline(key)
    }

    pub fn user(&self) -> &Address {
        self.engine.ctx.user()
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.engine.ctx
    }

    pub fn registry(&self) -> &Registry {
        &self.engine.registry
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.engine.fetcher
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.engine.reconciler
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    pub fn data_uploads(&self) -> &DataUploads {
        &self.engine.uploads
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.ctx.subscribe()
    }

    /// Stop the background loops.
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if !handles.is_empty() {
            info!(tasks = handles.len(), "Session stopped");
        }
        for handle in handles {
            handle.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Save a snapshot after every committed change, coalescing bursts.
async fn persistence_loop(
    ctx: Arc<SyncContext>,
    cache: Arc<dyn PersistentCache>,
    mut events: broadcast::Receiver<SyncEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) if event.persists() => {}
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Persistence worker lagged, saving anyway");
            }
            Err(RecvError::Closed) => break,
        }

        loop {
            match events.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if let Err(e) = cache.save(ctx.user(), &ctx.snapshot()).await {
            error!(error = %e, "Failed to persist snapshot");
        }
    }
}

async fn live_loop(reconciler: Reconciler, mut pushed: mpsc::UnboundedReceiver<MessageEvent>) {
    while let Some(event) = pushed.recv().await {
        reconciler.apply_pushed(event);
    }
    info!("Live subscription closed");
}

/// Sync recipients that appear in the list but are not resolved yet.
async fn watch_loop(engine: Engine, mut events: broadcast::Receiver<SyncEvent>) {
    loop {
        match events.recv().await {
            Ok(SyncEvent::RecipientListChanged) | Err(RecvError::Lagged(_)) => {}
            Ok(_) => continue,
            Err(RecvError::Closed) => break,
        }

        let unknown: Vec<String> = engine
            .registry
            .recipient_keys()
            .into_iter()
            .filter(|key| engine.registry.recipient(key).is_none())
            .collect();
        for key in unknown {
            if let Err(e) = engine.sync_recipient(&key).await {
                warn!(recipient = %key, error = %e, "Recipient sync failed");
            }
        }
    }
}
