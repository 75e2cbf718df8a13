//! Protocol stores.
//!
//! The session logic reads and writes key material only through these
//! traits, so a persistent implementation can replace the in-memory one
//! without touching protocol code.
//!
//! ## Modules
//!
//! - `memory`: In-memory reference store and its thread-shareable handle
//! - `locks`: Per-address lock registry for serializing session operations

pub mod locks;
pub mod memory;

pub use locks::SessionLocks;
pub use memory::{InMemoryProtocolStore, SharedProtocolStore};

use crate::chat::address::ProtocolAddress;
use crate::chat::identity::{IdentityKey, IdentityKeyPair};
use crate::chat::prekey::{PreKeyId, PreKeyRecord, SignedPreKeyRecord};
use crate::chat::sender_key::{SenderKeyName, SenderKeyRecord};
use crate::chat::state::SessionRecord;
use crate::error::Result;

/// Whether an identity is being checked for an outgoing or incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Sending,
    Receiving,
}

/// Local identity and pinned remote identities.
pub trait IdentityKeyStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair>;

    fn get_local_registration_id(&self) -> Result<u32>;

    /// Pins `identity` for `address`.
    ///
    /// Returns true if a different key was previously pinned and has been
    /// replaced.
    fn save_identity(&mut self, address: &ProtocolAddress, identity: &IdentityKey)
        -> Result<bool>;

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool>;

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>>;

    /// Unpins whatever identity is stored for `address`.
    fn remove_identity(&mut self, address: &ProtocolAddress) -> Result<()>;
}

/// One-time prekeys.
pub trait PreKeyStore {
    /// Fails with `InvalidKeyIdentifier` if `id` is unknown.
    fn get_pre_key(&self, id: PreKeyId) -> Result<PreKeyRecord>;

    fn save_pre_key(&mut self, id: PreKeyId, record: &PreKeyRecord) -> Result<()>;

    fn remove_pre_key(&mut self, id: PreKeyId) -> Result<()>;

    /// Loads and removes a prekey in one step.
    ///
    /// Stores shared between threads must override this so that two
    /// concurrent handshakes cannot both consume the same prekey.
    fn take_pre_key(&mut self, id: PreKeyId) -> Result<PreKeyRecord> {
        let record = self.get_pre_key(id)?;
        self.remove_pre_key(id)?;
        Ok(record)
    }
}

/// Signed prekeys. Rotated by the owner, never removed on use.
pub trait SignedPreKeyStore {
    /// Fails with `InvalidKeyIdentifier` if `id` is unknown.
    fn get_signed_pre_key(&self, id: PreKeyId) -> Result<SignedPreKeyRecord>;

    fn save_signed_pre_key(&mut self, id: PreKeyId, record: &SignedPreKeyRecord) -> Result<()>;
}

/// Session records keyed by remote address.
pub trait SessionStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>>;

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()>;
}

/// Sender key records keyed by group and sender.
pub trait SenderKeyStore {
    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>>;

    fn store_sender_key(&mut self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()>;
}

/// Everything the session cipher needs.
pub trait ProtocolStore:
    IdentityKeyStore + PreKeyStore + SignedPreKeyStore + SessionStore + SenderKeyStore
{
}

impl<T> ProtocolStore for T where
    T: IdentityKeyStore + PreKeyStore + SignedPreKeyStore + SessionStore + SenderKeyStore
{
}
