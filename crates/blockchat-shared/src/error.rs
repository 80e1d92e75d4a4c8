use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Invalid encoding: {0}")]
    Encoding(String),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid key encoding: {0}")]
    Encoding(#[from] hex::FromHexError),
}

/// Failures reported by a ledger client implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The call could not be completed (transport, node or rate limit).
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger refused the transaction.
    #[error("Ledger rejected the request: {0}")]
    Rejected(String),
}
