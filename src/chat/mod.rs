//! Session protocol: X3DH handshake and Double Ratchet.
//!
//! ## Protocol Overview
//!
//! ### Session Establishment (X3DH)
//!
//! 1. Bob publishes a [`PreKeyBundle`] containing his identity key, a signed
//!    prekey and optionally one one-time prekey
//! 2. Alice verifies the bundle, generates an ephemeral base key and combines
//!    three or four Diffie-Hellman agreements into a root key
//! 3. Alice sends PreKey messages carrying her base and identity keys until
//!    Bob answers
//! 4. Bob mirrors the agreements with his private keys, consuming the
//!    one-time prekey
//!
//! ### Message Encryption (Double Ratchet)
//!
//! Each message uses a unique key derived through two ratchets:
//! - **DH Ratchet**: a new agreement whenever the peer's ratchet key changes
//! - **Symmetric Ratchet**: an HMAC chain for consecutive messages
//!
//! ## Example
//!
//! ```rust,no_run
//! use rand::rngs::OsRng;
//! use sealed_ratchet::chat::{
//!     generate_registration_id, IdentityKeyPair, PreKeyBundle, PreKeyRecord,
//!     ProtocolAddress, SessionBuilder, SessionCipher, SignedPreKeyRecord,
//! };
//! use sealed_ratchet::crypto::KeyPair;
//! use sealed_ratchet::storage::{InMemoryProtocolStore, PreKeyStore, SignedPreKeyStore};
//!
//! let mut rng = OsRng;
//! let mut alice = InMemoryProtocolStore::new(
//!     IdentityKeyPair::generate(&mut rng),
//!     generate_registration_id(&mut rng),
//! );
//! let bob_identity = IdentityKeyPair::generate(&mut rng);
//! let mut bob = InMemoryProtocolStore::new(bob_identity.clone(), generate_registration_id(&mut rng));
//!
//! let pre_key = PreKeyRecord::new(1, KeyPair::generate(&mut rng));
//! let signed = SignedPreKeyRecord::generate(2, 0, &bob_identity, &mut rng);
//! bob.save_pre_key(1, &pre_key)?;
//! bob.save_signed_pre_key(2, &signed)?;
//!
//! let bundle = PreKeyBundle::new(
//!     bob.registration_id(),
//!     1,
//!     Some((1, pre_key.public_key())),
//!     2,
//!     signed.public_key(),
//!     signed.signature().to_vec(),
//!     *bob_identity.identity_key(),
//! );
//!
//! let bob_address = ProtocolAddress::new("bob", 1);
//! SessionBuilder::new(bob_address.clone()).process_pre_key_bundle(&bundle, &mut alice, &mut rng)?;
//! let message = SessionCipher::new(bob_address).encrypt(b"Hello Bob!", &mut alice)?;
//! # Ok::<(), sealed_ratchet::error::ProtocolError>(())
//! ```

pub mod address;
pub mod builder;
pub mod cipher;
pub mod identity;
pub mod message;
pub mod prekey;
pub mod ratchet;
pub mod sender_key;
pub mod state;
pub(crate) mod x3dh;

pub use address::{ProtocolAddress, SenderAddress};
pub use builder::SessionBuilder;
pub use cipher::SessionCipher;
pub use identity::{generate_registration_id, IdentityKey, IdentityKeyPair};
pub use message::{CiphertextMessage, CiphertextMessageType, PreKeySignalMessage, SignalMessage};
pub use prekey::{generate_pre_keys, PreKeyBundle, PreKeyId, PreKeyRecord, SignedPreKeyRecord};
pub use ratchet::{ChainKey, MessageKeys, RootKey};
pub use sender_key::{
    SenderChainKey, SenderKeyName, SenderKeyRecord, SenderKeyState, SenderMessageKey,
};
pub use state::{SessionRecord, SessionState};

/// Protocol version written into every message.
pub const CIPHERTEXT_MESSAGE_CURRENT_VERSION: u8 = 3;

/// Length of the truncated MAC trailing every ratchet message.
pub const MAC_LENGTH: usize = 8;

/// Wire sentinel for "no one-time prekey" in PreKey messages.
pub const NO_PRE_KEY_ID: u32 = 0xFFFF_FFFF;

/// HMAC inputs for the symmetric chain step.
pub(crate) const MESSAGE_KEY_SEED: &[u8] = &[0x01];
pub(crate) const CHAIN_KEY_SEED: &[u8] = &[0x02];

/// Domain separation constants for HKDF operations.
pub mod kdf_info {
    /// Root and chain key derivation from the X3DH agreements.
    pub const X3DH: &[u8] = b"WhisperText";
    /// Root key step on a DH ratchet.
    pub const RATCHET: &[u8] = b"WhisperRatchet";
    /// Cipher key, MAC key and nonce from a message seed.
    pub const MESSAGE_KEYS: &[u8] = b"WhisperMessageKeys";
    /// Sender key message keys.
    pub const GROUP: &[u8] = b"WhisperGroup";
    /// Sealed sender envelope salt prefix.
    pub const SEALED_SENDER: &[u8] = b"UnidentifiedDelivery";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version() {
        assert_eq!(CIPHERTEXT_MESSAGE_CURRENT_VERSION, 3);
    }

    #[test]
    fn test_kdf_info_labels_are_unique() {
        let labels: Vec<&[u8]> = vec![
            kdf_info::X3DH,
            kdf_info::RATCHET,
            kdf_info::MESSAGE_KEYS,
            kdf_info::GROUP,
            kdf_info::SEALED_SENDER,
        ];

        for i in 0..labels.len() {
            for j in (i + 1)..labels.len() {
                assert_ne!(labels[i], labels[j], "KDF labels must be unique");
            }
        }
    }

    #[test]
    fn test_chain_seeds_differ() {
        assert_ne!(MESSAGE_KEY_SEED, CHAIN_KEY_SEED);
    }
}
