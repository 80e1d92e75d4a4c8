//! # blockchat-sync
//!
//! Client-side recipient synchronization engine.  It keeps a per-recipient
//! message timeline consistent with an append-only, block-indexed ledger
//! log: recipients are resolved on first reference, their message blocks
//! are fetched backward page by page, events are deduplicated into an event
//! log and merged with the user's own pending sends.
//!
//! A [`Session`] wires the components to a [`LedgerClient`] and a
//! [`PersistentCache`]; each component can also be driven on its own over a
//! shared [`SyncContext`].

pub mod cache;
pub mod config;
pub mod context;
pub mod data_upload;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod ledger;
pub mod outbound;
pub mod pending;
pub mod reconciler;
pub mod registry;
pub mod retry;
pub mod session;
pub mod timeline;

#[cfg(test)]
mod testing;

use tracing_subscriber::{fmt, EnvFilter};

pub use cache::{PersistentCache, SqliteCache};
pub use config::SyncConfig;
pub use context::SyncContext;
pub use error::{Result, SyncError};
pub use events::SyncEvent;
pub use ledger::{LedgerClient, MessageEvent, SubmitStatus};
pub use pending::{ClientId, PendingMessage, PendingStatus};
pub use registry::Recipient;
pub use session::{IdentityProvider, Session};
pub use timeline::TimelineEntry;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default filter.  Calling it again is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("blockchat_sync=debug,blockchat_store=info,warn"));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Tracing initialized");
    }
}
