//! AES-256-GCM payload encryption.
//!
//! Every key handed to these functions is single-use (a ratchet message key or
//! a sealed sender ephemeral key), so the nonce is derived alongside the key
//! rather than drawn at random.

use crate::error::{ProtocolError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};

/// AES-256 key size in bytes.
pub const AEAD_KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes.
pub const AEAD_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes.
pub const AEAD_TAG_SIZE: usize = 16;

/// Encrypts `plaintext`, binding `associated_data`.
pub fn aead_encrypt(
    key: &[u8; AEAD_KEY_SIZE],
    nonce: &[u8; AEAD_NONCE_SIZE],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let payload = Payload {
        msg: plaintext,
        aad: associated_data,
    };

    cipher
        .encrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| ProtocolError::invalid_state("Payload encryption failed"))
}

/// Decrypts and authenticates `ciphertext`.
///
/// Any failure, including a truncated input, is reported as
/// [`ProtocolError::InvalidMessage`]; callers that need a different error kind
/// map it.
pub fn aead_decrypt(
    key: &[u8; AEAD_KEY_SIZE],
    nonce: &[u8; AEAD_NONCE_SIZE],
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < AEAD_TAG_SIZE {
        return Err(ProtocolError::invalid_message("Ciphertext too short"));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let payload = Payload {
        msg: ciphertext,
        aad: associated_data,
    };

    cipher
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| ProtocolError::invalid_message("Payload decryption failed"))
}
