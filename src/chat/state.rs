//! Persistent session state.
//!
//! A [`SessionState`] is one ratchet instance between two identities. A
//! [`SessionRecord`] holds the current state for a remote address plus a
//! bounded history of earlier states, so messages encrypted under a session
//! that has since been replaced by a new handshake can still be decrypted.

use crate::chat::identity::IdentityKey;
use crate::chat::prekey::PreKeyId;
use crate::chat::ratchet::{ChainKey, MessageKeys, RootKey};
use crate::crypto::{KeyPair, PublicKey};
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::trace;

#[derive(Clone, Serialize, Deserialize)]
struct SenderChain {
    ratchet_key_pair: KeyPair,
    chain_key: ChainKey,
}

#[derive(Clone, Serialize, Deserialize)]
struct ReceiverChain {
    sender_ratchet_key: PublicKey,
    chain_key: ChainKey,
    /// Keys for skipped counters, oldest first.
    message_keys: VecDeque<MessageKeys>,
}

/// Handshake data repeated in every outgoing message until the peer replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPreKey {
    pub pre_key_id: Option<PreKeyId>,
    pub signed_pre_key_id: PreKeyId,
    pub base_key: PublicKey,
}

/// One Double Ratchet instance.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionState {
    session_version: u8,
    local_identity: IdentityKey,
    remote_identity: IdentityKey,
    root_key: RootKey,
    previous_counter: u32,
    sender_chain: SenderChain,
    /// Newest last.
    receiver_chains: VecDeque<ReceiverChain>,
    pending_pre_key: Option<PendingPreKey>,
    local_registration_id: u32,
    remote_registration_id: u32,
    alice_base_key: PublicKey,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("session_version", &self.session_version)
            .field("remote_identity", &self.remote_identity)
            .field("sender_index", &self.sender_chain.chain_key.index())
            .field("receiver_chains", &self.receiver_chains.len())
            .field("pending_pre_key", &self.pending_pre_key.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionState {
    pub(crate) fn new(
        session_version: u8,
        local_identity: IdentityKey,
        remote_identity: IdentityKey,
        root_key: RootKey,
        sender_ratchet_key_pair: KeyPair,
        sender_chain_key: ChainKey,
        alice_base_key: PublicKey,
    ) -> Self {
        Self {
            session_version,
            local_identity,
            remote_identity,
            root_key,
            previous_counter: 0,
            sender_chain: SenderChain {
                ratchet_key_pair: sender_ratchet_key_pair,
                chain_key: sender_chain_key,
            },
            receiver_chains: VecDeque::new(),
            pending_pre_key: None,
            local_registration_id: 0,
            remote_registration_id: 0,
            alice_base_key,
        }
    }

    pub fn session_version(&self) -> u8 {
        self.session_version
    }

    pub fn local_identity_key(&self) -> &IdentityKey {
        &self.local_identity
    }

    pub fn remote_identity_key(&self) -> &IdentityKey {
        &self.remote_identity
    }

    /// Base key of the handshake that created this state.
    pub fn alice_base_key(&self) -> &PublicKey {
        &self.alice_base_key
    }

    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub(crate) fn set_registration_ids(&mut self, local: u32, remote: u32) {
        self.local_registration_id = local;
        self.remote_registration_id = remote;
    }

    pub(crate) fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    pub(crate) fn set_root_key(&mut self, root_key: RootKey) {
        self.root_key = root_key;
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub(crate) fn set_previous_counter(&mut self, previous_counter: u32) {
        self.previous_counter = previous_counter;
    }

    pub fn sender_ratchet_key(&self) -> &PublicKey {
        &self.sender_chain.ratchet_key_pair.public_key
    }

    pub(crate) fn sender_ratchet_key_pair(&self) -> &KeyPair {
        &self.sender_chain.ratchet_key_pair
    }

    pub(crate) fn sender_chain_key(&self) -> &ChainKey {
        &self.sender_chain.chain_key
    }

    /// Number of messages sent on the current sending chain.
    pub fn sender_chain_index(&self) -> u32 {
        self.sender_chain.chain_key.index()
    }

    pub(crate) fn set_sender_chain(&mut self, ratchet_key_pair: KeyPair, chain_key: ChainKey) {
        self.sender_chain = SenderChain {
            ratchet_key_pair,
            chain_key,
        };
    }

    pub(crate) fn set_sender_chain_key(&mut self, chain_key: ChainKey) {
        self.sender_chain.chain_key = chain_key;
    }

    fn receiver_chain(&self, sender: &PublicKey) -> Option<&ReceiverChain> {
        self.receiver_chains
            .iter()
            .find(|chain| chain.sender_ratchet_key.ct_equals(sender))
    }

    fn receiver_chain_mut(&mut self, sender: &PublicKey) -> Option<&mut ReceiverChain> {
        self.receiver_chains
            .iter_mut()
            .find(|chain| chain.sender_ratchet_key.ct_equals(sender))
    }

    pub fn receiver_chain_count(&self) -> usize {
        self.receiver_chains.len()
    }

    pub(crate) fn receiver_chain_key(&self, sender: &PublicKey) -> Option<ChainKey> {
        self.receiver_chain(sender).map(|chain| chain.chain_key.clone())
    }

    /// Adds a receiving chain, dropping the oldest beyond `max_chains`.
    ///
    /// `max_chains` comes from a validated
    /// [`SessionConfig`](crate::config::SessionConfig) and is at least 1.
    pub(crate) fn add_receiver_chain(
        &mut self,
        sender: PublicKey,
        chain_key: ChainKey,
        max_chains: usize,
    ) {
        self.receiver_chains.push_back(ReceiverChain {
            sender_ratchet_key: sender,
            chain_key,
            message_keys: VecDeque::new(),
        });
        while self.receiver_chains.len() > max_chains {
            trace!("Evicting oldest receiver chain");
            self.receiver_chains.pop_front();
        }
    }

    pub(crate) fn set_receiver_chain_key(
        &mut self,
        sender: &PublicKey,
        chain_key: ChainKey,
    ) -> Result<()> {
        let chain = self
            .receiver_chain_mut(sender)
            .ok_or_else(|| ProtocolError::invalid_state("No receiver chain for ratchet key"))?;
        chain.chain_key = chain_key;
        Ok(())
    }

    /// Caches keys for a skipped counter, evicting the oldest beyond `max_keys`.
    pub(crate) fn set_message_keys(
        &mut self,
        sender: &PublicKey,
        keys: MessageKeys,
        max_keys: usize,
    ) -> Result<()> {
        let chain = self
            .receiver_chain_mut(sender)
            .ok_or_else(|| ProtocolError::invalid_state("No receiver chain for ratchet key"))?;
        chain.message_keys.push_back(keys);
        while chain.message_keys.len() > max_keys {
            chain.message_keys.pop_front();
        }
        Ok(())
    }

    pub(crate) fn remove_message_keys(
        &mut self,
        sender: &PublicKey,
        counter: u32,
    ) -> Option<MessageKeys> {
        let chain = self.receiver_chain_mut(sender)?;
        let position = chain
            .message_keys
            .iter()
            .position(|keys| keys.counter() == counter)?;
        chain.message_keys.remove(position)
    }

    /// Number of cached skipped keys for a receiving chain.
    pub fn skipped_key_count(&self, sender: &PublicKey) -> usize {
        self.receiver_chain(sender)
            .map_or(0, |chain| chain.message_keys.len())
    }

    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub(crate) fn set_pending_pre_key(&mut self, pending: PendingPreKey) {
        self.pending_pre_key = Some(pending);
    }

    pub(crate) fn clear_pending_pre_key(&mut self) {
        self.pending_pre_key = None;
    }
}

/// Current session state for one remote address plus archived states.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    current: Option<SessionState>,
    /// Newest first.
    previous: VecDeque<SessionState>,
}

impl SessionRecord {
    /// An empty record with no state.
    pub fn new_fresh() -> Self {
        Self::default()
    }

    pub fn new(state: SessionState) -> Self {
        Self {
            current: Some(state),
            previous: VecDeque::new(),
        }
    }

    pub fn has_current_state(&self) -> bool {
        self.current.is_some()
    }

    pub fn session_state(&self) -> Option<&SessionState> {
        self.current.as_ref()
    }

    pub(crate) fn session_state_mut(&mut self) -> Option<&mut SessionState> {
        self.current.as_mut()
    }

    pub(crate) fn set_session_state(&mut self, state: SessionState) {
        self.current = Some(state);
    }

    pub fn previous_session_states(&self) -> impl Iterator<Item = &SessionState> {
        self.previous.iter()
    }

    pub fn previous_state_count(&self) -> usize {
        self.previous.len()
    }

    /// Whether any held state was created by the handshake with `base_key`.
    pub fn has_session_state(&self, version: u8, base_key: &PublicKey) -> bool {
        self.current
            .iter()
            .chain(self.previous.iter())
            .any(|state| {
                state.session_version() == version && state.alice_base_key().ct_equals(base_key)
            })
    }

    /// Moves the current state into the archive.
    pub fn archive_current_state(&mut self, max_archived_states: usize) {
        if let Some(state) = self.current.take() {
            self.previous.push_front(state);
            self.previous.truncate(max_archived_states);
        }
    }

    /// Makes `state` current, archiving the existing current state.
    pub fn promote_state(&mut self, state: SessionState, max_archived_states: usize) {
        self.archive_current_state(max_archived_states);
        self.current = Some(state);
    }

    /// Replaces the archived state at `index` with `updated` and makes it
    /// current.
    pub(crate) fn promote_old_session(
        &mut self,
        index: usize,
        updated: SessionState,
        max_archived_states: usize,
    ) {
        self.previous.remove(index);
        self.promote_state(updated, max_archived_states);
    }

    pub fn session_version(&self) -> Option<u8> {
        self.current.as_ref().map(SessionState::session_version)
    }

    pub fn remote_registration_id(&self) -> Option<u32> {
        self.current
            .as_ref()
            .map(SessionState::remote_registration_id)
    }

    pub fn local_registration_id(&self) -> Option<u32> {
        self.current
            .as_ref()
            .map(SessionState::local_registration_id)
    }

    pub fn remote_identity_key(&self) -> Option<&IdentityKey> {
        self.current.as_ref().map(SessionState::remote_identity_key)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
