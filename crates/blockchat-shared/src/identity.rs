use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto;
use crate::error::{CryptoError, IdentityError};
use crate::hashing::address_from_public_key;
use crate::types::Address;

/// The local user's identity: an X25519 keypair whose public half is
/// published under the `publicKey` data tag, and the account address
/// derived from it.
#[derive(Clone)]
pub struct Identity {
    secret: StaticSecret,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(secret),
        }
    }

    /// Restore identity from a hex-encoded secret
    pub fn from_secret_hex(hex_str: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(hex_str.trim())?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidKeyBytes)?;
        Ok(Self::from_secret_bytes(secret))
    }

    /// Get the raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        PublicKey::from(&self.secret).to_bytes()
    }

    /// Public key in the hex form published on the ledger
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Account address of this identity
    pub fn address(&self) -> Address {
        address_from_public_key(&self.public_key_bytes())
    }

    /// Get the raw secret key bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Open message content sealed to this identity
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, CryptoError> {
        crypto::open(&self.secret, sealed)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
