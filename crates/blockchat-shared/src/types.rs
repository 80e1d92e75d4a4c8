use serde::{Deserialize, Serialize};

use crate::constants::ADDRESS_HEX_LEN;

/// Ledger-defined index of a message block.
pub type BlockNumber = u64;

// Account address, stored lower-cased as `0x` + 40 hex digits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub String);

impl Address {
    /// Parse a canonical address, normalising the hex digits to lower case.
    pub fn parse(s: &str) -> Option<Self> {
        if is_address(s) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether `s` is an account address (`0x` followed by 40 hex digits).
pub fn is_address(s: &str) -> bool {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => {
            digits.len() == ADDRESS_HEX_LEN && digits.bytes().all(|b| b.is_ascii_hexdigit())
        }
        None => false,
    }
}

// Canonical on-ledger identifier of a recipient
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecipientHash(pub String);

impl RecipientHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Address> for RecipientHash {
    fn from(address: &Address) -> Self {
        Self(address.0.clone())
    }
}

impl std::fmt::Display for RecipientHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Key of a data-upload record, derived from (recipient hash, tag)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DataHash(pub String);

impl std::fmt::Display for DataHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Ledger transaction id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TxHash(pub String);

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
