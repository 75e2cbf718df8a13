//! Prekeys for asynchronous key agreement.
//!
//! ## Prekey Types
//!
//! - **Signed Prekey**: X25519 key pair signed by the identity key, rotated
//!   periodically and never deleted on use
//! - **One-Time Prekey**: X25519 key pair used in exactly one handshake, then
//!   deleted by the receiver
//!
//! ## Prekey Bundle
//!
//! A bundle is what a server hands to an initiator: the identity key, the
//! current signed prekey with its signature and, while the supply lasts, one
//! one-time prekey.

use crate::chat::identity::{IdentityKey, IdentityKeyPair};
use crate::crypto::{KeyPair, PublicKey};
use crate::error::{ProtocolError, Result};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for prekeys.
pub type PreKeyId = u32;

/// Prekey ids wrap below this value, leaving the wire sentinel unused.
pub const PRE_KEY_MEDIUM_MAX_VALUE: u32 = 0xFF_FFFF;

/// A one-time prekey as held by its owner.
#[derive(Clone, Serialize, Deserialize)]
pub struct PreKeyRecord {
    id: PreKeyId,
    key_pair: KeyPair,
}

impl fmt::Debug for PreKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreKeyRecord")
            .field("id", &self.id)
            .field("public_key", &self.key_pair.public_key)
            .finish_non_exhaustive()
    }
}

impl PreKeyRecord {
    pub fn new(id: PreKeyId, key_pair: KeyPair) -> Self {
        Self { id, key_pair }
    }

    pub fn id(&self) -> PreKeyId {
        self.id
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A signed prekey as held by its owner.
#[derive(Clone, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    id: PreKeyId,
    timestamp: u64,
    key_pair: KeyPair,
    signature: Vec<u8>,
}

impl fmt::Debug for SignedPreKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedPreKeyRecord")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp)
            .field("public_key", &self.key_pair.public_key)
            .finish_non_exhaustive()
    }
}

impl SignedPreKeyRecord {
    /// Creates a record from existing components.
    ///
    /// The signature is expected to cover `key_pair.public_key.serialize()`.
    pub fn new(id: PreKeyId, timestamp: u64, key_pair: KeyPair, signature: Vec<u8>) -> Self {
        Self {
            id,
            timestamp,
            key_pair,
            signature,
        }
    }

    /// Generates a fresh key pair and signs it with `identity`.
    pub fn generate<R: CryptoRng + RngCore>(
        id: PreKeyId,
        timestamp: u64,
        identity: &IdentityKeyPair,
        rng: &mut R,
    ) -> Self {
        let key_pair = KeyPair::generate(rng);
        let signature = identity.sign(&key_pair.public_key.serialize()).to_vec();
        Self::new(id, timestamp, key_pair, signature)
    }

    pub fn id(&self) -> PreKeyId {
        self.id
    }

    /// Creation time in milliseconds, as supplied by the owner.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Published handshake material for one device.
///
/// The one-time prekey id and public key travel together, so a bundle can
/// never carry one without the other.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreKeyBundle {
    registration_id: u32,
    device_id: u32,
    pre_key: Option<(PreKeyId, PublicKey)>,
    signed_pre_key_id: PreKeyId,
    signed_pre_key_public: PublicKey,
    signed_pre_key_signature: Vec<u8>,
    identity_key: IdentityKey,
}

impl fmt::Debug for PreKeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreKeyBundle")
            .field("registration_id", &self.registration_id)
            .field("device_id", &self.device_id)
            .field("pre_key_id", &self.pre_key_id())
            .field("signed_pre_key_id", &self.signed_pre_key_id)
            .field("identity_key", &self.identity_key)
            .finish()
    }
}

impl PreKeyBundle {
    pub fn new(
        registration_id: u32,
        device_id: u32,
        pre_key: Option<(PreKeyId, PublicKey)>,
        signed_pre_key_id: PreKeyId,
        signed_pre_key_public: PublicKey,
        signed_pre_key_signature: Vec<u8>,
        identity_key: IdentityKey,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            pre_key,
            signed_pre_key_id,
            signed_pre_key_public,
            signed_pre_key_signature,
            identity_key,
        }
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn pre_key_id(&self) -> Option<PreKeyId> {
        self.pre_key.map(|(id, _)| id)
    }

    pub fn pre_key_public(&self) -> Option<PublicKey> {
        self.pre_key.map(|(_, key)| key)
    }

    pub fn signed_pre_key_id(&self) -> PreKeyId {
        self.signed_pre_key_id
    }

    pub fn signed_pre_key_public(&self) -> &PublicKey {
        &self.signed_pre_key_public
    }

    pub fn signed_pre_key_signature(&self) -> &[u8] {
        &self.signed_pre_key_signature
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    /// Verifies the signed prekey signature against the bundle identity key.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidSignature`] on mismatch.
    pub fn verify_signature(&self) -> Result<()> {
        let signed_bytes = self.signed_pre_key_public.serialize();
        if !self
            .identity_key
            .verify_signature(&signed_bytes, &self.signed_pre_key_signature)
        {
            return Err(ProtocolError::invalid_signature(format!(
                "Signed prekey {} is not signed by identity {}",
                self.signed_pre_key_id,
                self.identity_key.fingerprint()
            )));
        }
        Ok(())
    }
}

/// Generates `count` one-time prekeys with consecutive ids from `start`.
///
/// Ids wrap within `1..PRE_KEY_MEDIUM_MAX_VALUE`.
pub fn generate_pre_keys<R: CryptoRng + RngCore>(
    start: PreKeyId,
    count: u32,
    rng: &mut R,
) -> Vec<PreKeyRecord> {
    let start = start.saturating_sub(1);
    (0..count)
        .map(|i| {
            let id = ((start as u64 + i as u64) % (PRE_KEY_MEDIUM_MAX_VALUE as u64 - 1)) as u32 + 1;
            PreKeyRecord::new(id, KeyPair::generate(rng))
        })
        .collect()
}
