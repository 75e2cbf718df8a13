//! # sealed-ratchet
//!
//! Session layer of an end-to-end encrypted messaging protocol.
//!
//! ## Features
//!
//! - **Asynchronous key agreement**: X3DH against a published prekey bundle,
//!   so the initiator can send before the responder is online
//! - **Double Ratchet**: a fresh key for every message, a DH step on every
//!   change of speaker, out-of-order delivery within configurable bounds
//! - **Sealed sender**: certificate-backed envelopes that hide the sender
//!   from the transport
//! - **Pluggable stores**: identity, prekey, signed prekey, session and
//!   sender key stores behind traits, with an in-memory implementation
//!
//! ## Cryptographic Algorithms
//!
//! - **Identity signatures**: Ed25519
//! - **Key agreement**: X25519
//! - **Symmetric Encryption**: AES-256-GCM
//! - **KDF / MAC**: HKDF and HMAC over SHA3-256
//!
//! ## Example
//!
//! ```rust,no_run
//! use rand::rngs::OsRng;
//! use sealed_ratchet::chat::{IdentityKeyPair, ProtocolAddress, SenderAddress};
//! use sealed_ratchet::sealed::{
//!     sealed_sender_decrypt, sealed_sender_encrypt, SenderCertificate, ServerCertificate,
//! };
//! use sealed_ratchet::storage::InMemoryProtocolStore;
//! # fn main() -> sealed_ratchet::Result<()> {
//! # let mut rng = OsRng;
//! # let mut alice = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut rng), 1);
//! # let mut bob = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut rng), 2);
//! // Sessions between alice and bob are assumed to exist already.
//! let trust_root = IdentityKeyPair::generate(&mut rng);
//! let server_key = IdentityKeyPair::generate(&mut rng);
//! let server = ServerCertificate::new(1, *server_key.identity_key(), &trust_root)?;
//! let certificate = SenderCertificate::new(
//!     SenderAddress::new("alice", None, 1),
//!     *alice.identity_key_pair().identity_key(),
//!     u64::MAX,
//!     server,
//!     &server_key,
//! )?;
//!
//! let envelope = sealed_sender_encrypt(
//!     &ProtocolAddress::new("bob", 1),
//!     &certificate,
//!     b"hi",
//!     &mut alice,
//!     &mut rng,
//! )?;
//! let opened = sealed_sender_decrypt(&envelope, trust_root.identity_key(), 0, &mut bob, &mut rng)?;
//! assert_eq!(opened.message, b"hi");
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod config;
pub mod crypto;
pub mod error;
pub mod sealed;
pub mod storage;
pub mod validation;

pub use chat::{
    CiphertextMessage, CiphertextMessageType, IdentityKey, IdentityKeyPair, PreKeyBundle,
    ProtocolAddress, SenderAddress, SessionBuilder, SessionCipher, SessionRecord,
};
pub use config::SessionConfig;
pub use error::{ProtocolError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
