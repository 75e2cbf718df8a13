//! Cryptographic primitives consumed by the session protocol.
//!
//! The protocol logic never touches curve arithmetic or cipher internals
//! directly; it goes through this module:
//!
//! - **X25519**: Ratchet, base and prekey agreements ([`KeyPair`])
//! - **Ed25519**: Identity signatures, with the identity key mapped onto
//!   Curve25519 for agreements ([`signature`])
//! - **AES-256-GCM**: Message payload encryption ([`encryption`])
//! - **HKDF / HMAC over SHA3-256**: Key derivation and message authentication
//!
//! All key generation takes an explicit `RngCore + CryptoRng` so that tests can
//! drive the handshake from a seeded generator.

use crate::error::{ProtocolError, Result};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha3::{Digest, Sha3_256};

pub mod encryption;
pub mod keys;
pub mod signature;
pub mod timing;

pub use encryption::{aead_decrypt, aead_encrypt, AEAD_KEY_SIZE, AEAD_NONCE_SIZE, AEAD_TAG_SIZE};
pub use keys::{KeyPair, PrivateKey, PublicKey, DJB_KEY_TYPE, PUBLIC_KEY_LENGTH};
pub use timing::TimingSafe;

type HmacSha3 = Hmac<Sha3_256>;

/// Cryptographic hash function using SHA3-256
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// HKDF-SHA3-256 extract-and-expand into `len` bytes.
///
/// A `None` salt is treated by HKDF as a string of zero bytes.
pub fn derive_secrets(salt: Option<&[u8]>, ikm: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha3_256>::new(salt, ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|_| ProtocolError::invalid_state("HKDF output length too large"))?;
    Ok(okm)
}

/// HMAC-SHA3-256 over the concatenation of `parts`.
pub fn hmac_sha3(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = HmacSha3::new_from_slice(key)
        .map_err(|_| ProtocolError::invalid_key("HMAC key rejected"))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Short printable fingerprint of public key material for logs.
pub fn fingerprint(key_bytes: &[u8]) -> String {
    hex::encode(&hash_data(key_bytes)[..8])
}
