//! Double Ratchet key schedule.
//!
//! ### DH Ratchet
//!
//! When a message arrives under a new ratchet key from the peer:
//! 1. Agree with our current ratchet key to derive the receiving chain
//! 2. Generate a new ratchet key pair
//! 3. Agree again to derive the next sending chain
//!
//! Both steps feed the agreement into [`RootKey::create_chain`].
//!
//! ### Symmetric Ratchet (Chain Keys)
//!
//! For each message in a chain:
//! 1. `seed = HMAC(chain_key, 0x01)` yields the message keys
//! 2. `chain_key' = HMAC(chain_key, 0x02)` advances the chain
//!
//! Chain keys only move forward; message keys are used once and dropped.

use crate::chat::{kdf_info, CHAIN_KEY_SEED, MESSAGE_KEY_SEED};
use crate::crypto::{derive_secrets, hmac_sha3, KeyPair, PublicKey, AEAD_KEY_SIZE, AEAD_NONCE_SIZE};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of root keys in bytes.
pub const ROOT_KEY_SIZE: usize = 32;

/// Size of chain keys in bytes.
pub const CHAIN_KEY_SIZE: usize = 32;

/// Size of message MAC keys in bytes.
pub const MAC_KEY_SIZE: usize = 32;

/// A root key used in the DH ratchet.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    key: [u8; ROOT_KEY_SIZE],
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl RootKey {
    pub fn new(key: [u8; ROOT_KEY_SIZE]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; ROOT_KEY_SIZE] {
        &self.key
    }

    /// Steps the root key with `DH(our_ratchet_key, their_ratchet_key)`.
    ///
    /// Returns the next root key and a fresh chain at index 0.
    pub fn create_chain(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_key: &KeyPair,
    ) -> Result<(RootKey, ChainKey)> {
        let mut shared_secret = our_ratchet_key.calculate_agreement(their_ratchet_key);
        let derived = derive_secrets(
            Some(&self.key[..]),
            &shared_secret,
            kdf_info::RATCHET,
            ROOT_KEY_SIZE + CHAIN_KEY_SIZE,
        );
        shared_secret.zeroize();
        let mut derived = derived?;

        let (root, chain) = split_root_and_chain(&derived);
        derived.zeroize();
        Ok((RootKey::new(root), ChainKey::new(chain, 0)))
    }
}

/// Splits 64 bytes of KDF output into a root key and a chain key.
pub(crate) fn split_root_and_chain(derived: &[u8]) -> ([u8; ROOT_KEY_SIZE], [u8; CHAIN_KEY_SIZE]) {
    let mut root = [0u8; ROOT_KEY_SIZE];
    let mut chain = [0u8; CHAIN_KEY_SIZE];
    root.copy_from_slice(&derived[..ROOT_KEY_SIZE]);
    chain.copy_from_slice(&derived[ROOT_KEY_SIZE..ROOT_KEY_SIZE + CHAIN_KEY_SIZE]);
    (root, chain)
}

/// A chain key used in the symmetric ratchet.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    key: [u8; CHAIN_KEY_SIZE],
    index: u32,
}

impl fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainKey")
            .field("index", &self.index)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl ChainKey {
    pub fn new(key: [u8; CHAIN_KEY_SIZE], index: u32) -> Self {
        Self { key, index }
    }

    /// Counter of the next message this chain will produce keys for.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn as_bytes(&self) -> &[u8; CHAIN_KEY_SIZE] {
        &self.key
    }

    /// The chain key for `index + 1`.
    pub fn next_chain_key(&self) -> Result<ChainKey> {
        Ok(ChainKey {
            key: hmac_sha3(&self.key, &[CHAIN_KEY_SEED])?,
            index: self.index + 1,
        })
    }

    /// The message keys for `index`.
    pub fn message_keys(&self) -> Result<MessageKeys> {
        let mut seed = hmac_sha3(&self.key, &[MESSAGE_KEY_SEED])?;
        let keys = MessageKeys::derive(&seed, self.index);
        seed.zeroize();
        keys
    }
}

/// Keys protecting a single message.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    cipher_key: [u8; AEAD_KEY_SIZE],
    mac_key: [u8; MAC_KEY_SIZE],
    nonce: [u8; AEAD_NONCE_SIZE],
    counter: u32,
}

impl fmt::Debug for MessageKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageKeys")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

impl MessageKeys {
    /// Expands a message seed into cipher key, MAC key and nonce.
    pub fn derive(seed: &[u8], counter: u32) -> Result<Self> {
        let mut okm = derive_secrets(
            None,
            seed,
            kdf_info::MESSAGE_KEYS,
            AEAD_KEY_SIZE + MAC_KEY_SIZE + AEAD_NONCE_SIZE,
        )?;

        let mut cipher_key = [0u8; AEAD_KEY_SIZE];
        let mut mac_key = [0u8; MAC_KEY_SIZE];
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        cipher_key.copy_from_slice(&okm[..AEAD_KEY_SIZE]);
        mac_key.copy_from_slice(&okm[AEAD_KEY_SIZE..AEAD_KEY_SIZE + MAC_KEY_SIZE]);
        nonce.copy_from_slice(&okm[AEAD_KEY_SIZE + MAC_KEY_SIZE..]);
        okm.zeroize();

        Ok(Self {
            cipher_key,
            mac_key,
            nonce,
            counter,
        })
    }

    pub fn cipher_key(&self) -> &[u8; AEAD_KEY_SIZE] {
        &self.cipher_key
    }

    pub fn mac_key(&self) -> &[u8; MAC_KEY_SIZE] {
        &self.mac_key
    }

    pub fn nonce(&self) -> &[u8; AEAD_NONCE_SIZE] {
        &self.nonce
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}
