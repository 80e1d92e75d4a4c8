/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Number of hex digits in a canonical account address (after `0x`)
pub const ADDRESS_HEX_LEN: usize = 40;

/// Prefix marking message content sealed to the recipient's public key
pub const ENCRYPTED_PREFIX: &str = "e::";

/// Data-upload tag under which a recipient publishes its public key
pub const PUBLIC_KEY_TAG: &str = "publicKey";

/// Blocks fetched per "load more" page
pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// Attempts per remote data fetch before a slice is skipped
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_SEAL_KEY: &str = "blockchat-seal-key-v1";
pub const KDF_CONTEXT_RECIPIENT_HASH: &str = "blockchat-recipient-hash-v1";
pub const KDF_CONTEXT_DATA_HASH: &str = "blockchat-data-hash-v1";
pub const KDF_CONTEXT_ADDRESS: &str = "blockchat-address-v1";
