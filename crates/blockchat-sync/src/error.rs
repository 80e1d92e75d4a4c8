use thiserror::Error;

use blockchat_shared::{CryptoError, LedgerError};
use blockchat_store::StoreError;

/// Errors surfaced by the synchronization engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A ledger call failed after its retries.
    #[error("Ledger unavailable: {0}")]
    RemoteUnavailable(String),

    /// The ledger refused a submitted message.
    #[error("Ledger rejected the message: {0}")]
    Rejected(String),

    /// Encryption was requested but no public key has been fetched yet.
    #[error("No public key fetched for recipient {0}")]
    MissingKey(String),

    /// The operation would break a state invariant and was not applied.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<LedgerError> for SyncError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unavailable(msg) => SyncError::RemoteUnavailable(msg),
            LedgerError::Rejected(msg) => SyncError::Rejected(msg),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
