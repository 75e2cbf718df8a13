//! In-memory protocol store.
//!
//! [`InMemoryProtocolStore`] keeps everything in hash maps and is the
//! reference implementation of the store traits. [`SharedProtocolStore`] wraps
//! it in `Arc<Mutex<_>>` so that clones can be handed to several threads.

use crate::chat::address::ProtocolAddress;
use crate::chat::identity::{IdentityKey, IdentityKeyPair};
use crate::chat::prekey::{PreKeyId, PreKeyRecord, SignedPreKeyRecord};
use crate::chat::sender_key::{SenderKeyName, SenderKeyRecord};
use crate::chat::state::SessionRecord;
use crate::error::{ProtocolError, Result};
use crate::storage::{
    Direction, IdentityKeyStore, PreKeyStore, SenderKeyStore, SessionStore, SignedPreKeyStore,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Hash map backed store with trust-on-first-use identity pinning.
#[derive(Debug, Clone)]
pub struct InMemoryProtocolStore {
    identity_key_pair: IdentityKeyPair,
    registration_id: u32,
    identities: HashMap<ProtocolAddress, IdentityKey>,
    pre_keys: HashMap<PreKeyId, PreKeyRecord>,
    signed_pre_keys: HashMap<PreKeyId, SignedPreKeyRecord>,
    sessions: HashMap<ProtocolAddress, SessionRecord>,
    sender_keys: HashMap<SenderKeyName, SenderKeyRecord>,
}

impl InMemoryProtocolStore {
    pub fn new(identity_key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            identity_key_pair,
            registration_id,
            identities: HashMap::new(),
            pre_keys: HashMap::new(),
            signed_pre_keys: HashMap::new(),
            sessions: HashMap::new(),
            sender_keys: HashMap::new(),
        }
    }

    pub fn identity_key_pair(&self) -> &IdentityKeyPair {
        &self.identity_key_pair
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn contains_pre_key(&self, id: PreKeyId) -> bool {
        self.pre_keys.contains_key(&id)
    }

    pub fn pre_key_count(&self) -> usize {
        self.pre_keys.len()
    }

    /// Removes the session for `address`. Returns whether one existed.
    pub fn delete_session(&mut self, address: &ProtocolAddress) -> bool {
        self.sessions.remove(address).is_some()
    }
}

impl IdentityKeyStore for InMemoryProtocolStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        Ok(self.identity_key_pair.clone())
    }

    fn get_local_registration_id(&self) -> Result<u32> {
        Ok(self.registration_id)
    }

    fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<bool> {
        match self.identities.insert(address.clone(), *identity) {
            Some(previous) if !previous.ct_equals(identity) => {
                warn!(
                    address = %address,
                    old = %previous.fingerprint(),
                    new = %identity.fingerprint(),
                    "Replaced pinned identity"
                );
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                debug!(address = %address, identity = %identity.fingerprint(), "Pinned identity");
                Ok(false)
            }
        }
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        _direction: Direction,
    ) -> Result<bool> {
        Ok(match self.identities.get(address) {
            None => true,
            Some(pinned) => pinned.ct_equals(identity),
        })
    }

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>> {
        Ok(self.identities.get(address).copied())
    }

    fn remove_identity(&mut self, address: &ProtocolAddress) -> Result<()> {
        if self.identities.remove(address).is_some() {
            debug!(address = %address, "Unpinned identity");
        }
        Ok(())
    }
}

impl PreKeyStore for InMemoryProtocolStore {
    fn get_pre_key(&self, id: PreKeyId) -> Result<PreKeyRecord> {
        self.pre_keys
            .get(&id)
            .cloned()
            .ok_or_else(|| ProtocolError::invalid_key_identifier(format!("No prekey with id {}", id)))
    }

    fn save_pre_key(&mut self, id: PreKeyId, record: &PreKeyRecord) -> Result<()> {
        self.pre_keys.insert(id, record.clone());
        Ok(())
    }

    fn remove_pre_key(&mut self, id: PreKeyId) -> Result<()> {
        self.pre_keys.remove(&id);
        Ok(())
    }

    fn take_pre_key(&mut self, id: PreKeyId) -> Result<PreKeyRecord> {
        self.pre_keys
            .remove(&id)
            .ok_or_else(|| ProtocolError::invalid_key_identifier(format!("No prekey with id {}", id)))
    }
}

impl SignedPreKeyStore for InMemoryProtocolStore {
    fn get_signed_pre_key(&self, id: PreKeyId) -> Result<SignedPreKeyRecord> {
        self.signed_pre_keys.get(&id).cloned().ok_or_else(|| {
            ProtocolError::invalid_key_identifier(format!("No signed prekey with id {}", id))
        })
    }

    fn save_signed_pre_key(&mut self, id: PreKeyId, record: &SignedPreKeyRecord) -> Result<()> {
        self.signed_pre_keys.insert(id, record.clone());
        Ok(())
    }
}

impl SessionStore for InMemoryProtocolStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.get(address).cloned())
    }

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.sessions.insert(address.clone(), record.clone());
        Ok(())
    }
}

impl SenderKeyStore for InMemoryProtocolStore {
    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>> {
        Ok(self.sender_keys.get(name).cloned())
    }

    fn store_sender_key(&mut self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()> {
        self.sender_keys.insert(name.clone(), record.clone());
        Ok(())
    }
}

/// Cloneable handle to one [`InMemoryProtocolStore`].
///
/// Every trait call takes the lock for its own duration only. Sequences of
/// calls on one session must additionally be serialized with
/// [`SessionLocks`](crate::storage::SessionLocks).
#[derive(Debug, Clone)]
pub struct SharedProtocolStore {
    inner: Arc<Mutex<InMemoryProtocolStore>>,
}

impl SharedProtocolStore {
    pub fn new(store: InMemoryProtocolStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Locks the underlying store.
    pub fn lock(&self) -> Result<MutexGuard<'_, InMemoryProtocolStore>> {
        self.inner
            .lock()
            .map_err(|_| ProtocolError::storage("Protocol store lock poisoned"))
    }
}

impl IdentityKeyStore for SharedProtocolStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        self.lock()?.get_identity_key_pair()
    }

    fn get_local_registration_id(&self) -> Result<u32> {
        self.lock()?.get_local_registration_id()
    }

    fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<bool> {
        self.lock()?.save_identity(address, identity)
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool> {
        self.lock()?.is_trusted_identity(address, identity, direction)
    }

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>> {
        self.lock()?.get_identity(address)
    }

    fn remove_identity(&mut self, address: &ProtocolAddress) -> Result<()> {
        self.lock()?.remove_identity(address)
    }
}

impl PreKeyStore for SharedProtocolStore {
    fn get_pre_key(&self, id: PreKeyId) -> Result<PreKeyRecord> {
        self.lock()?.get_pre_key(id)
    }

    fn save_pre_key(&mut self, id: PreKeyId, record: &PreKeyRecord) -> Result<()> {
        self.lock()?.save_pre_key(id, record)
    }

    fn remove_pre_key(&mut self, id: PreKeyId) -> Result<()> {
        self.lock()?.remove_pre_key(id)
    }

    fn take_pre_key(&mut self, id: PreKeyId) -> Result<PreKeyRecord> {
        self.lock()?.take_pre_key(id)
    }
}

impl SignedPreKeyStore for SharedProtocolStore {
    fn get_signed_pre_key(&self, id: PreKeyId) -> Result<SignedPreKeyRecord> {
        self.lock()?.get_signed_pre_key(id)
    }

    fn save_signed_pre_key(&mut self, id: PreKeyId, record: &SignedPreKeyRecord) -> Result<()> {
        self.lock()?.save_signed_pre_key(id, record)
    }
}

impl SessionStore for SharedProtocolStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>> {
        self.lock()?.load_session(address)
    }

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.lock()?.store_session(address, record)
    }
}

impl SenderKeyStore for SharedProtocolStore {
    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>> {
        self.lock()?.load_sender_key(name)
    }

    fn store_sender_key(&mut self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()> {
        self.lock()?.store_sender_key(name, record)
    }
}
