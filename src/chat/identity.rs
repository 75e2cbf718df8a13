//! Long-term identity keys.
//!
//! An identity is an Ed25519 key pair. It signs prekeys and certificates, and
//! its Curve25519 form takes part in the X3DH agreements.

use crate::crypto::signature::{self, SIGNATURE_LENGTH, SIGNING_KEY_LENGTH};
use crate::crypto::{fingerprint, PrivateKey, PublicKey, TimingSafe};
use crate::error::{ProtocolError, Result};
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Largest registration id handed out by [`generate_registration_id`].
pub const MAX_REGISTRATION_ID: u32 = 16380;

/// Generates a registration id in `1..=16380`.
pub fn generate_registration_id<R: CryptoRng + RngCore>(rng: &mut R) -> u32 {
    rng.gen_range(1..=MAX_REGISTRATION_ID)
}

/// The public half of an identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    key: [u8; SIGNING_KEY_LENGTH],
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl IdentityKey {
    /// Parses a 32-byte Ed25519 public key, rejecting invalid points.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; SIGNING_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            ProtocolError::invalid_key(format!(
                "Identity key must be {} bytes, got {}",
                SIGNING_KEY_LENGTH,
                bytes.len()
            ))
        })?;
        signature::verifying_key(&key)?;
        Ok(Self { key })
    }

    pub fn serialize(&self) -> [u8; SIGNING_KEY_LENGTH] {
        self.key
    }

    pub fn as_bytes(&self) -> &[u8; SIGNING_KEY_LENGTH] {
        &self.key
    }

    /// Verifies an Ed25519 signature made by this identity.
    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        signature::verify(&self.key, message, signature)
    }

    /// The Curve25519 key used when this identity takes part in an agreement.
    pub fn agreement_key(&self) -> Result<PublicKey> {
        signature::agreement_public_key(&self.key)
    }

    /// Constant-time equality check.
    pub fn ct_equals(&self, other: &IdentityKey) -> bool {
        TimingSafe::bytes_equal(&self.key, &other.key)
    }

    /// Short hex fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.key)
    }
}

/// An identity key pair.
///
/// Holds the Ed25519 seed; the seed is wiped when the pair is dropped.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityKeyPair {
    identity_key: IdentityKey,
    seed: [u8; SIGNING_KEY_LENGTH],
}

impl Drop for IdentityKeyPair {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("identity_key", &self.identity_key)
            .finish_non_exhaustive()
    }
}

impl IdentityKeyPair {
    /// Generates a new identity from `rng`.
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let mut seed = [0u8; SIGNING_KEY_LENGTH];
        rng.fill_bytes(&mut seed);
        let pair = Self::from_seed(seed);
        seed.zeroize();
        pair
    }

    /// Rebuilds an identity from its 32-byte Ed25519 seed.
    pub fn from_seed(seed: [u8; SIGNING_KEY_LENGTH]) -> Self {
        Self {
            identity_key: IdentityKey {
                key: signature::public_from_seed(&seed),
            },
            seed,
        }
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    /// Signs `message` with the identity key.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        signature::sign(&self.seed, message)
    }

    /// X25519 agreement between this identity and `their_key`.
    pub fn calculate_agreement(&self, their_key: &PublicKey) -> [u8; 32] {
        self.agreement_private_key().calculate_agreement(their_key)
    }

    fn agreement_private_key(&self) -> PrivateKey {
        signature::agreement_private_key(&self.seed)
    }

    /// Seed bytes for persistence by a key store.
    pub fn serialize(&self) -> &[u8; SIGNING_KEY_LENGTH] {
        &self.seed
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let seed: [u8; SIGNING_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| ProtocolError::invalid_key("Identity seed must be 32 bytes"))?;
        Ok(Self::from_seed(seed))
    }
}
