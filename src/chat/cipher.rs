//! Per-message encryption with the Double Ratchet.
//!
//! Every operation loads the session record, works on a copy of the state
//! and writes the record back only once the whole operation has succeeded.
//! A failed decrypt therefore leaves the stores exactly as they were.

use crate::chat::address::ProtocolAddress;
use crate::chat::builder::{persist_session, SessionBuilder};
use crate::chat::message::{CiphertextMessage, PreKeySignalMessage, SignalMessage};
use crate::chat::prekey::PreKeyBundle;
use crate::chat::ratchet::{ChainKey, MessageKeys};
use crate::chat::state::{SessionRecord, SessionState};
use crate::config::SessionConfig;
use crate::crypto::{aead_decrypt, aead_encrypt, fingerprint, KeyPair, PublicKey};
use crate::error::{ProtocolError, Result};
use crate::storage::{Direction, ProtocolStore};
use rand::{CryptoRng, RngCore};
use tracing::{debug, trace, warn};

/// Encrypts to and decrypts from one remote address.
#[derive(Debug, Clone)]
pub struct SessionCipher {
    remote_address: ProtocolAddress,
    config: SessionConfig,
}

impl SessionCipher {
    pub fn new(remote_address: ProtocolAddress) -> Self {
        Self {
            remote_address,
            config: SessionConfig::default(),
        }
    }

    /// Replaces the default bounds.
    ///
    /// # Errors
    /// - `Config` if `config` fails [`SessionConfig::validate`]
    pub fn with_config(mut self, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn remote_address(&self) -> &ProtocolAddress {
        &self.remote_address
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn builder(&self) -> SessionBuilder {
        SessionBuilder::new(self.remote_address.clone()).with_validated_config(self.config.clone())
    }

    /// Encrypts `plaintext` on the current session.
    ///
    /// Produces a PreKey message until the peer's first message has been
    /// decrypted, and a plain ratchet message afterwards.
    ///
    /// # Errors
    /// - `SessionNotFound` if there is no current session
    /// - `UntrustedIdentity` if the pinned identity changed since the session
    ///   was built
    pub fn encrypt<S>(&self, plaintext: &[u8], store: &mut S) -> Result<CiphertextMessage>
    where
        S: ProtocolStore + ?Sized,
    {
        let mut record = store
            .load_session(&self.remote_address)?
            .ok_or_else(|| ProtocolError::session_not_found(&self.remote_address))?;
        let state = record
            .session_state_mut()
            .ok_or_else(|| ProtocolError::session_not_found(&self.remote_address))?;

        let chain_key = state.sender_chain_key().clone();
        let message_keys = chain_key.message_keys()?;
        let local_identity = *state.local_identity_key();
        let remote_identity = *state.remote_identity_key();

        let ciphertext = aead_encrypt(
            message_keys.cipher_key(),
            message_keys.nonce(),
            plaintext,
            &[],
        )?;
        let signal_message = SignalMessage::new(
            state.session_version(),
            message_keys.mac_key(),
            *state.sender_ratchet_key(),
            chain_key.index(),
            state.previous_counter(),
            ciphertext,
            &local_identity,
            &remote_identity,
        )?;

        let message = match state.pending_pre_key() {
            Some(pending) => CiphertextMessage::PreKeySignalMessage(PreKeySignalMessage::new(
                state.session_version(),
                state.local_registration_id(),
                pending.pre_key_id,
                pending.signed_pre_key_id,
                pending.base_key,
                local_identity,
                signal_message,
            )?),
            None => CiphertextMessage::SignalMessage(signal_message),
        };

        state.set_sender_chain_key(chain_key.next_chain_key()?);

        if !store.is_trusted_identity(&self.remote_address, &remote_identity, Direction::Sending)? {
            warn!(
                address = %self.remote_address,
                identity = %remote_identity.fingerprint(),
                "Session identity is no longer trusted"
            );
            return Err(ProtocolError::untrusted_identity(&self.remote_address));
        }
        persist_session(store, &self.remote_address, &remote_identity, &record)?;

        trace!(
            address = %self.remote_address,
            counter = chain_key.index(),
            message_type = ?message.message_type(),
            "Encrypted message"
        );
        Ok(message)
    }

    /// Encrypts `plaintext`, first building a session from `bundle` if none
    /// exists.
    pub fn encrypt_with_bundle<S, R>(
        &self,
        plaintext: &[u8],
        bundle: &PreKeyBundle,
        store: &mut S,
        rng: &mut R,
    ) -> Result<CiphertextMessage>
    where
        S: ProtocolStore + ?Sized,
        R: CryptoRng + RngCore,
    {
        let has_session = store
            .load_session(&self.remote_address)?
            .is_some_and(|record| record.has_current_state());
        if !has_session {
            self.builder().process_pre_key_bundle(bundle, store, rng)?;
        }
        self.encrypt(plaintext, store)
    }

    /// Decrypts a message from the remote address.
    ///
    /// # Errors
    /// - `SessionNotFound` for a plain message without a session
    /// - `InvalidKeyIdentifier` if a PreKey message references unknown
    ///   prekeys
    /// - `UntrustedIdentity` if the sender identity is not trusted
    /// - `DuplicateMessage` if the counter was already consumed
    /// - `InvalidMessage` on authentication failure or malformed input
    pub fn decrypt<S, R>(
        &self,
        message: &CiphertextMessage,
        store: &mut S,
        rng: &mut R,
    ) -> Result<Vec<u8>>
    where
        S: ProtocolStore + ?Sized,
        R: CryptoRng + RngCore,
    {
        match message {
            CiphertextMessage::SignalMessage(message) => {
                self.decrypt_signal_message(message, store, rng)
            }
            CiphertextMessage::PreKeySignalMessage(message) => {
                self.decrypt_pre_key_message(message, store, rng)
            }
        }
    }

    fn decrypt_pre_key_message<S, R>(
        &self,
        message: &PreKeySignalMessage,
        store: &mut S,
        rng: &mut R,
    ) -> Result<Vec<u8>>
    where
        S: ProtocolStore + ?Sized,
        R: CryptoRng + RngCore,
    {
        let mut record = store
            .load_session(&self.remote_address)?
            .unwrap_or_else(SessionRecord::new_fresh);

        let consumed = self.builder().process_pre_key(&mut record, message, store)?;

        let result = self
            .decrypt_with_record(&mut record, message.message(), rng)
            .and_then(|plaintext| {
                let identity = message.identity_key();
                persist_session(&mut *store, &self.remote_address, identity, &record)?;
                Ok(plaintext)
            });

        if result.is_err() {
            if let Some(pre_key) = &consumed {
                debug!(pre_key = pre_key.id(), "Restoring one-time prekey after failed decrypt");
                if let Err(restore_err) = store.save_pre_key(pre_key.id(), pre_key) {
                    warn!(
                        pre_key = pre_key.id(),
                        error = %restore_err,
                        "Failed to restore one-time prekey"
                    );
                }
            }
        }
        result
    }

    fn decrypt_signal_message<S, R>(
        &self,
        message: &SignalMessage,
        store: &mut S,
        rng: &mut R,
    ) -> Result<Vec<u8>>
    where
        S: ProtocolStore + ?Sized,
        R: CryptoRng + RngCore,
    {
        let mut record = store
            .load_session(&self.remote_address)?
            .ok_or_else(|| ProtocolError::session_not_found(&self.remote_address))?;

        let plaintext = self.decrypt_with_record(&mut record, message, rng)?;

        let remote_identity = *record
            .remote_identity_key()
            .ok_or_else(|| ProtocolError::invalid_state("Decrypted without a current state"))?;
        if !store.is_trusted_identity(&self.remote_address, &remote_identity, Direction::Receiving)? {
            warn!(
                address = %self.remote_address,
                identity = %remote_identity.fingerprint(),
                "Session identity is no longer trusted"
            );
            return Err(ProtocolError::untrusted_identity(&self.remote_address));
        }
        persist_session(store, &self.remote_address, &remote_identity, &record)?;
        Ok(plaintext)
    }

    /// Tries the current state, then each archived state. The state that
    /// decrypts becomes current.
    fn decrypt_with_record<R>(
        &self,
        record: &mut SessionRecord,
        message: &SignalMessage,
        rng: &mut R,
    ) -> Result<Vec<u8>>
    where
        R: CryptoRng + RngCore,
    {
        if !record.has_current_state() && record.previous_state_count() == 0 {
            return Err(ProtocolError::session_not_found(&self.remote_address));
        }

        let mut failures = 0usize;

        if let Some(current) = record.session_state() {
            let mut state = current.clone();
            match self.decrypt_with_state(&mut state, message, rng) {
                Ok(plaintext) => {
                    record.set_session_state(state);
                    return Ok(plaintext);
                }
                Err(err @ ProtocolError::DuplicateMessage { .. }) => return Err(err),
                Err(err) => {
                    trace!(error = %err, "Current session state failed to decrypt");
                    failures += 1;
                }
            }
        }

        let mut promoted = None;
        for (index, previous) in record.previous_session_states().enumerate() {
            let mut state = previous.clone();
            match self.decrypt_with_state(&mut state, message, rng) {
                Ok(plaintext) => {
                    promoted = Some((index, state, plaintext));
                    break;
                }
                Err(err @ ProtocolError::DuplicateMessage { .. }) => return Err(err),
                Err(err) => {
                    trace!(index, error = %err, "Archived session state failed to decrypt");
                    failures += 1;
                }
            }
        }

        match promoted {
            Some((index, state, plaintext)) => {
                debug!(address = %self.remote_address, index, "Promoting archived session state");
                record.promote_old_session(index, state, self.config.max_archived_states);
                Ok(plaintext)
            }
            None => {
                warn!(
                    address = %self.remote_address,
                    states = failures,
                    "No session state could decrypt message"
                );
                Err(ProtocolError::invalid_message(format!(
                    "Decryption failed with {} session states",
                    failures
                )))
            }
        }
    }

    fn decrypt_with_state<R>(
        &self,
        state: &mut SessionState,
        message: &SignalMessage,
        rng: &mut R,
    ) -> Result<Vec<u8>>
    where
        R: CryptoRng + RngCore,
    {
        if message.message_version() != state.session_version() {
            return Err(ProtocolError::invalid_message(format!(
                "Message version {} does not match session version {}",
                message.message_version(),
                state.session_version()
            )));
        }

        let their_ephemeral = message.sender_ratchet_key();
        let chain_key = self.get_or_create_chain_key(state, their_ephemeral, rng)?;
        let message_keys =
            self.get_or_create_message_keys(state, their_ephemeral, &chain_key, message.counter())?;

        let remote_identity = *state.remote_identity_key();
        let local_identity = *state.local_identity_key();
        if !message.verify_mac(&remote_identity, &local_identity, message_keys.mac_key())? {
            return Err(ProtocolError::invalid_message("MAC verification failed"));
        }

        let plaintext = aead_decrypt(
            message_keys.cipher_key(),
            message_keys.nonce(),
            message.body(),
            &[],
        )?;

        state.clear_pending_pre_key();
        Ok(plaintext)
    }

    fn get_or_create_chain_key<R>(
        &self,
        state: &mut SessionState,
        their_ephemeral: &PublicKey,
        rng: &mut R,
    ) -> Result<ChainKey>
    where
        R: CryptoRng + RngCore,
    {
        if let Some(chain_key) = state.receiver_chain_key(their_ephemeral) {
            return Ok(chain_key);
        }

        debug!(
            address = %self.remote_address,
            their_ratchet_key = %fingerprint(their_ephemeral.public_key_bytes()),
            "DH ratchet step"
        );

        let (receiver_root, receiver_chain) = state
            .root_key()
            .create_chain(their_ephemeral, state.sender_ratchet_key_pair())?;
        let our_new_ephemeral = KeyPair::generate(rng);
        let (sender_root, sender_chain) =
            receiver_root.create_chain(their_ephemeral, &our_new_ephemeral)?;

        let current_index = state.sender_chain_index();
        state.set_root_key(sender_root);
        state.add_receiver_chain(
            *their_ephemeral,
            receiver_chain.clone(),
            self.config.max_receiver_chains,
        );
        state.set_previous_counter(current_index.saturating_sub(1));
        state.set_sender_chain(our_new_ephemeral, sender_chain);

        Ok(receiver_chain)
    }

    fn get_or_create_message_keys(
        &self,
        state: &mut SessionState,
        their_ephemeral: &PublicKey,
        chain_key: &ChainKey,
        counter: u32,
    ) -> Result<MessageKeys> {
        let chain_index = chain_key.index();

        if chain_index > counter {
            return state
                .remove_message_keys(their_ephemeral, counter)
                .ok_or_else(|| {
                    debug!(
                        address = %self.remote_address,
                        chain_index,
                        counter,
                        "Duplicate message"
                    );
                    ProtocolError::DuplicateMessage {
                        chain_index,
                        counter,
                    }
                });
        }

        let jump = counter - chain_index;
        if jump > self.config.max_forward_jumps {
            warn!(
                address = %self.remote_address,
                chain_index,
                counter,
                "Message counter too far ahead"
            );
            return Err(ProtocolError::invalid_message(format!(
                "Message counter {} is {} ahead of chain index {}",
                counter, jump, chain_index
            )));
        }

        let mut chain_key = chain_key.clone();
        while chain_key.index() < counter {
            state.set_message_keys(
                their_ephemeral,
                chain_key.message_keys()?,
                self.config.max_skipped_message_keys,
            )?;
            chain_key = chain_key.next_chain_key()?;
        }
        if jump > 0 {
            trace!(skipped = jump, "Cached skipped message keys");
        }

        state.set_receiver_chain_key(their_ephemeral, chain_key.next_chain_key()?)?;
        chain_key.message_keys()
    }
}
