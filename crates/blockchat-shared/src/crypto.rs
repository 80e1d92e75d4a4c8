use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::constants::{
    ENCRYPTED_PREFIX, KDF_CONTEXT_SEAL_KEY, NONCE_SIZE, PUBKEY_SIZE, SYMMETRIC_KEY_SIZE,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

// BLAKE3 KDF over the DH output, bound to both public keys
fn derive_seal_key(shared_secret: &[u8], ephemeral: &[u8], recipient: &[u8]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SEAL_KEY);
    hasher.update(shared_secret);
    hasher.update(ephemeral);
    hasher.update(recipient);
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// Parse a published public key (hex, optionally `0x`-prefixed).
pub fn parse_public_key(hex_str: &str) -> Result<[u8; PUBKEY_SIZE], CryptoError> {
    let trimmed = hex_str.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|e| CryptoError::Encoding(e.to_string()))?;
    if bytes.len() != PUBKEY_SIZE {
        return Err(CryptoError::InvalidKeyLength);
    }
    let mut key = [0u8; PUBKEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Seal `plaintext` to `recipient_public` with an ephemeral X25519 key.
///
/// Output is `e::` followed by base64 of `ephemeral_pub || nonce || ciphertext`.
pub fn seal(recipient_public: &[u8; PUBKEY_SIZE], plaintext: &[u8]) -> Result<String, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient_public));

    let key = derive_seal_key(shared.as_bytes(), ephemeral_public.as_bytes(), recipient_public);
    let body = encrypt(&key, plaintext)?;

    let mut payload = Vec::with_capacity(PUBKEY_SIZE + body.len());
    payload.extend_from_slice(ephemeral_public.as_bytes());
    payload.extend_from_slice(&body);
    Ok(format!("{ENCRYPTED_PREFIX}{}", STANDARD.encode(payload)))
}

/// Open content produced by [`seal`] with the recipient's secret.
pub fn open(secret: &StaticSecret, sealed: &str) -> Result<Vec<u8>, CryptoError> {
    let encoded = sealed
        .strip_prefix(ENCRYPTED_PREFIX)
        .ok_or_else(|| CryptoError::Encoding("missing sealed prefix".into()))?;
    let payload = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;
    if payload.len() < PUBKEY_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (ephemeral_bytes, body) = payload.split_at(PUBKEY_SIZE);
    let mut ephemeral = [0u8; PUBKEY_SIZE];
    ephemeral.copy_from_slice(ephemeral_bytes);

    let own_public = PublicKey::from(secret);
    let shared = secret.diffie_hellman(&PublicKey::from(ephemeral));
    let key = derive_seal_key(shared.as_bytes(), &ephemeral, own_public.as_bytes());
    decrypt(&key, body)
}
