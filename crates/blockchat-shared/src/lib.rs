//! Types, hashing and crypto shared by the BlockChat client crates.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod hashing;
pub mod identity;
pub mod types;

pub use error::{CryptoError, IdentityError, LedgerError};
pub use types::{Address, BlockNumber, DataHash, RecipientHash, TxHash};
