//! Session establishment.
//!
//! The initiator builds a session from a published [`PreKeyBundle`]. The
//! responder builds the mirror session when the first PreKey message
//! arrives; that path is driven by the session cipher.

use crate::chat::address::ProtocolAddress;
use crate::chat::identity::IdentityKey;
use crate::chat::message::PreKeySignalMessage;
use crate::chat::prekey::{PreKeyBundle, PreKeyRecord};
use crate::chat::state::{PendingPreKey, SessionRecord};
use crate::chat::x3dh::{self, AliceParameters, BobParameters};
use crate::chat::NO_PRE_KEY_ID;
use crate::config::SessionConfig;
use crate::crypto::{fingerprint, KeyPair};
use crate::error::{ProtocolError, Result};
use crate::storage::{Direction, IdentityKeyStore, PreKeyStore, SessionStore, SignedPreKeyStore};
use rand::{CryptoRng, RngCore};
use tracing::{debug, warn};

/// Builds sessions with one remote address.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    remote_address: ProtocolAddress,
    config: SessionConfig,
}

impl SessionBuilder {
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

    /// Takes bounds that were already validated by the caller.
    pub(crate) fn with_validated_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn remote_address(&self) -> &ProtocolAddress {
        &self.remote_address
    }

    /// Runs the initiator side of X3DH against `bundle` and stores the
    /// resulting session as current.
    ///
    /// # Errors
    /// - `InvalidSignature` if the signed prekey is not signed by the bundle
    ///   identity
    /// - `InvalidKeyIdentifier` if the one-time prekey uses the reserved id
    /// - `UntrustedIdentity` if another identity is pinned for the address
    pub fn process_pre_key_bundle<S, R>(
        &self,
        bundle: &PreKeyBundle,
        store: &mut S,
        rng: &mut R,
    ) -> Result<()>
    where
        S: IdentityKeyStore + SessionStore + ?Sized,
        R: CryptoRng + RngCore,
    {
        bundle.verify_signature()?;
        if bundle.pre_key_id() == Some(NO_PRE_KEY_ID) {
            return Err(ProtocolError::invalid_key_identifier(format!(
                "Bundle prekey id {:#x} is reserved",
                NO_PRE_KEY_ID
            )));
        }

        let their_identity = bundle.identity_key();
        if !store.is_trusted_identity(&self.remote_address, their_identity, Direction::Sending)? {
            warn!(
                address = %self.remote_address,
                identity = %their_identity.fingerprint(),
                "Bundle identity does not match pinned identity"
            );
            return Err(ProtocolError::untrusted_identity(&self.remote_address));
        }

        let our_identity = store.get_identity_key_pair()?;
        let our_base_key = KeyPair::generate(rng);
        let their_one_time = bundle.pre_key_public();

        let mut state = x3dh::initialize_alice_session(
            &AliceParameters {
                our_identity: &our_identity,
                our_base_key: &our_base_key,
                their_identity,
                their_signed_pre_key: bundle.signed_pre_key_public(),
                their_one_time_pre_key: their_one_time.as_ref(),
            },
            rng,
        )?;
        state.set_pending_pre_key(PendingPreKey {
            pre_key_id: bundle.pre_key_id(),
            signed_pre_key_id: bundle.signed_pre_key_id(),
            base_key: our_base_key.public_key,
        });
        state.set_registration_ids(store.get_local_registration_id()?, bundle.registration_id());

        let mut record = store
            .load_session(&self.remote_address)?
            .unwrap_or_else(SessionRecord::new_fresh);
        record.promote_state(state, self.config.max_archived_states);

        persist_session(store, &self.remote_address, their_identity, &record)?;

        debug!(
            address = %self.remote_address,
            base_key = %fingerprint(our_base_key.public_key.public_key_bytes()),
            one_time_pre_key = ?bundle.pre_key_id(),
            signed_pre_key = bundle.signed_pre_key_id(),
            "Built session from prekey bundle"
        );
        Ok(())
    }

    /// Runs the responder side of X3DH for `message`, promoting the new state
    /// in `record`. Nothing is persisted.
    ///
    /// Returns the consumed one-time prekey, if any, so the caller can put it
    /// back should decrypting or persisting fail. A message whose base key
    /// already built a state in `record` is a retransmission from an
    /// initiator that has not yet heard back; no handshake runs for it.
    pub(crate) fn process_pre_key<S>(
        &self,
        record: &mut SessionRecord,
        message: &PreKeySignalMessage,
        store: &mut S,
    ) -> Result<Option<PreKeyRecord>>
    where
        S: IdentityKeyStore + PreKeyStore + SignedPreKeyStore + ?Sized,
    {
        let their_identity = message.identity_key();
        if !store.is_trusted_identity(&self.remote_address, their_identity, Direction::Receiving)? {
            warn!(
                address = %self.remote_address,
                identity = %their_identity.fingerprint(),
                "PreKey message identity does not match pinned identity"
            );
            return Err(ProtocolError::untrusted_identity(&self.remote_address));
        }

        if record.has_session_state(message.message_version(), message.base_key()) {
            debug!(
                address = %self.remote_address,
                "PreKey message for an existing session, skipping handshake"
            );
            return Ok(None);
        }

        let our_identity = store.get_identity_key_pair()?;
        let local_registration_id = store.get_local_registration_id()?;
        let our_signed_pre_key = store.get_signed_pre_key(message.signed_pre_key_id())?;
        let our_one_time_pre_key = match message.pre_key_id() {
            Some(id) => Some(store.take_pre_key(id)?),
            None => None,
        };

        let built = x3dh::initialize_bob_session(&BobParameters {
            our_identity: &our_identity,
            our_signed_pre_key: our_signed_pre_key.key_pair(),
            our_one_time_pre_key: our_one_time_pre_key.as_ref().map(PreKeyRecord::key_pair),
            their_identity,
            their_base_key: message.base_key(),
        });
        let mut state = match built {
            Ok(state) => state,
            Err(err) => {
                if let Some(pre_key) = &our_one_time_pre_key {
                    store.save_pre_key(pre_key.id(), pre_key)?;
                }
                return Err(err);
            }
        };
        state.set_registration_ids(local_registration_id, message.registration_id());
        record.promote_state(state, self.config.max_archived_states);

        debug!(
            address = %self.remote_address,
            base_key = %fingerprint(message.base_key().public_key_bytes()),
            one_time_pre_key = ?message.pre_key_id(),
            signed_pre_key = message.signed_pre_key_id(),
            "Built session from PreKey message"
        );
        Ok(our_one_time_pre_key)
    }
}

/// Pins `identity` and then stores `record` for `address`.
///
/// If the session cannot be stored, the identity pinned before the call is
/// put back, so a failed write leaves neither half behind.
pub(crate) fn persist_session<S>(
    store: &mut S,
    address: &ProtocolAddress,
    identity: &IdentityKey,
    record: &SessionRecord,
) -> Result<()>
where
    S: IdentityKeyStore + SessionStore + ?Sized,
{
    let previous = store.get_identity(address)?;
    store.save_identity(address, identity)?;

    if let Err(err) = store.store_session(address, record) {
        let restored = match &previous {
            Some(pinned) => store.save_identity(address, pinned).map(|_| ()),
            None => store.remove_identity(address),
        };
        if let Err(restore_err) = restored {
            warn!(address = %address, error = %restore_err, "Failed to restore pinned identity");
        }
        return Err(err);
    }
    Ok(())
}
