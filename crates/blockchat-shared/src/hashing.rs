//! Deterministic hashes used to address recipients and data records on the
//! ledger.  All hashes are BLAKE3 with a domain-separation context and are
//! rendered as `0x`-prefixed lower-case hex.

use crate::constants::{KDF_CONTEXT_ADDRESS, KDF_CONTEXT_DATA_HASH, KDF_CONTEXT_RECIPIENT_HASH};
use crate::types::{Address, DataHash, RecipientHash};

fn prefixed_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Content hash of a human-readable recipient name (e.g. a channel).
pub fn content_hash(text: &str) -> RecipientHash {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_RECIPIENT_HASH);
    hasher.update(text.as_bytes());
    RecipientHash(prefixed_hex(hasher.finalize().as_bytes()))
}

/// Hash identifying the data record `tag` published for `recipient`.
pub fn data_hash(recipient: &RecipientHash, tag: &str) -> DataHash {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_DATA_HASH);
    hasher.update(recipient.as_str().as_bytes());
    // length prefix keeps ("ab", "c") and ("a", "bc") apart
    hasher.update(&(tag.len() as u64).to_le_bytes());
    hasher.update(tag.as_bytes());
    DataHash(prefixed_hex(hasher.finalize().as_bytes()))
}

/// Account address derived from a 32-byte public key (last 20 bytes of the hash).
pub fn address_from_public_key(public_key: &[u8; 32]) -> Address {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_ADDRESS);
    hasher.update(public_key);
    let hash = hasher.finalize();
    Address(prefixed_hex(&hash.as_bytes()[12..]))
}
