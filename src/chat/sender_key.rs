//! Sender key records for group messaging.
//!
//! A sender key is a symmetric chain owned by one sender within one group.
//! Receivers hold a copy of the chain (plus the sender's signing key) and
//! walk it forward per message, caching keys for skipped iterations exactly
//! like a session receiving chain does.

use crate::chat::address::ProtocolAddress;
use crate::chat::identity::{IdentityKey, IdentityKeyPair};
use crate::chat::{kdf_info, CHAIN_KEY_SEED, MESSAGE_KEY_SEED};
use crate::config::SessionConfig;
use crate::crypto::{derive_secrets, hmac_sha3, AEAD_KEY_SIZE, AEAD_NONCE_SIZE};
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Store key for a sender key: one sender within one group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderKeyName {
    group_id: String,
    sender: ProtocolAddress,
}

impl SenderKeyName {
    pub fn new(group_id: impl Into<String>, sender: ProtocolAddress) -> Self {
        Self {
            group_id: group_id.into(),
            sender,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn sender(&self) -> &ProtocolAddress {
        &self.sender
    }
}

/// Keys for one sender key message.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SenderMessageKey {
    iteration: u32,
    cipher_key: [u8; AEAD_KEY_SIZE],
    nonce: [u8; AEAD_NONCE_SIZE],
}

impl fmt::Debug for SenderMessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderMessageKey")
            .field("iteration", &self.iteration)
            .finish_non_exhaustive()
    }
}

impl SenderMessageKey {
    fn derive(iteration: u32, seed: &[u8]) -> Result<Self> {
        let mut okm = derive_secrets(None, seed, kdf_info::GROUP, AEAD_KEY_SIZE + AEAD_NONCE_SIZE)?;
        let mut cipher_key = [0u8; AEAD_KEY_SIZE];
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        cipher_key.copy_from_slice(&okm[..AEAD_KEY_SIZE]);
        nonce.copy_from_slice(&okm[AEAD_KEY_SIZE..]);
        okm.zeroize();
        Ok(Self {
            iteration,
            cipher_key,
            nonce,
        })
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn cipher_key(&self) -> &[u8; AEAD_KEY_SIZE] {
        &self.cipher_key
    }

    pub fn nonce(&self) -> &[u8; AEAD_NONCE_SIZE] {
        &self.nonce
    }
}

/// The symmetric chain of a sender key.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SenderChainKey {
    iteration: u32,
    seed: [u8; 32],
}

impl fmt::Debug for SenderChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderChainKey")
            .field("iteration", &self.iteration)
            .finish_non_exhaustive()
    }
}

impl SenderChainKey {
    pub fn new(iteration: u32, seed: [u8; 32]) -> Self {
        Self { iteration, seed }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    pub fn next(&self) -> Result<SenderChainKey> {
        Ok(Self {
            iteration: self.iteration + 1,
            seed: hmac_sha3(&self.seed, &[CHAIN_KEY_SEED])?,
        })
    }

    pub fn sender_message_key(&self) -> Result<SenderMessageKey> {
        let mut seed = hmac_sha3(&self.seed, &[MESSAGE_KEY_SEED])?;
        let key = SenderMessageKey::derive(self.iteration, &seed);
        seed.zeroize();
        key
    }
}

/// One generation of a sender's chain.
#[derive(Clone, Serialize, Deserialize)]
pub struct SenderKeyState {
    chain_id: u32,
    chain_key: SenderChainKey,
    signing_key: IdentityKey,
    /// Present only on the sender's own copy.
    signing_private: Option<IdentityKeyPair>,
    /// Oldest first.
    message_keys: VecDeque<SenderMessageKey>,
}

impl fmt::Debug for SenderKeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderKeyState")
            .field("chain_id", &self.chain_id)
            .field("iteration", &self.chain_key.iteration())
            .field("signing_key", &self.signing_key)
            .field("cached_keys", &self.message_keys.len())
            .finish_non_exhaustive()
    }
}

impl SenderKeyState {
    pub fn new(
        chain_id: u32,
        chain_key: SenderChainKey,
        signing_key: IdentityKey,
        signing_private: Option<IdentityKeyPair>,
    ) -> Self {
        Self {
            chain_id,
            chain_key,
            signing_key,
            signing_private,
            message_keys: VecDeque::new(),
        }
    }

    pub fn chain_id(&self) -> u32 {
        self.chain_id
    }

    pub fn chain_key(&self) -> &SenderChainKey {
        &self.chain_key
    }

    pub fn set_chain_key(&mut self, chain_key: SenderChainKey) {
        self.chain_key = chain_key;
    }

    pub fn signing_key(&self) -> &IdentityKey {
        &self.signing_key
    }

    pub fn signing_private(&self) -> Option<&IdentityKeyPair> {
        self.signing_private.as_ref()
    }

    pub fn cached_key_count(&self) -> usize {
        self.message_keys.len()
    }

    fn add_message_key(&mut self, key: SenderMessageKey, max_keys: usize) {
        self.message_keys.push_back(key);
        while self.message_keys.len() > max_keys {
            self.message_keys.pop_front();
        }
    }

    fn remove_message_key(&mut self, iteration: u32) -> Option<SenderMessageKey> {
        let position = self
            .message_keys
            .iter()
            .position(|key| key.iteration() == iteration)?;
        self.message_keys.remove(position)
    }

    /// Returns the key for `iteration`, advancing the chain past it.
    ///
    /// # Errors
    /// - `DuplicateMessage` if the iteration was consumed and is not cached
    /// - `InvalidMessage` if the iteration is more than
    ///   `config.max_forward_jumps` ahead of the chain
    pub fn message_key_for(
        &mut self,
        iteration: u32,
        config: &SessionConfig,
    ) -> Result<SenderMessageKey> {
        let current = self.chain_key.iteration();
        if current > iteration {
            return self.remove_message_key(iteration).ok_or_else(|| {
                debug!(chain_id = self.chain_id, current, iteration, "Duplicate sender key message");
                ProtocolError::DuplicateMessage {
                    chain_index: current,
                    counter: iteration,
                }
            });
        }

        if iteration - current > config.max_forward_jumps {
            warn!(chain_id = self.chain_id, current, iteration, "Sender key jump too large");
            return Err(ProtocolError::invalid_message(format!(
                "Sender key iteration {} is too far ahead of {}",
                iteration, current
            )));
        }

        let mut chain_key = self.chain_key.clone();
        while chain_key.iteration() < iteration {
            self.add_message_key(chain_key.sender_message_key()?, config.max_skipped_message_keys);
            chain_key = chain_key.next()?;
        }

        self.chain_key = chain_key.next()?;
        chain_key.sender_message_key()
    }
}

/// All retained generations of one sender key, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderKeyRecord {
    states: VecDeque<SenderKeyState>,
}

impl SenderKeyRecord {
    pub fn new_fresh() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// The newest state.
    pub fn sender_key_state(&self) -> Result<&SenderKeyState> {
        self.states
            .front()
            .ok_or_else(|| ProtocolError::invalid_state("Sender key record is empty"))
    }

    pub fn sender_key_state_mut(&mut self) -> Result<&mut SenderKeyState> {
        self.states
            .front_mut()
            .ok_or_else(|| ProtocolError::invalid_state("Sender key record is empty"))
    }

    pub fn sender_key_state_for_chain_id(&mut self, chain_id: u32) -> Option<&mut SenderKeyState> {
        self.states
            .iter_mut()
            .find(|state| state.chain_id() == chain_id)
    }

    /// Adds a state as the newest, dropping the oldest beyond
    /// `config.max_sender_key_states`. The new state is always kept, even
    /// under a config that did not pass [`SessionConfig::validate`].
    pub fn add_sender_key_state(&mut self, state: SenderKeyState, config: &SessionConfig) {
        self.states.push_front(state);
        self.states.truncate(config.max_sender_key_states.max(1));
    }

    /// Replaces every state with `state`.
    pub fn set_sender_key_state(&mut self, state: SenderKeyState) {
        self.states.clear();
        self.states.push_front(state);
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
