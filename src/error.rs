//! Error types for session protocol operations.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Main error type for protocol operations.
///
/// Every variant is terminal for the operation that raised it. Nothing in the
/// crate retries internally, and stores are left untouched when an error is
/// returned.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A prekey or signed prekey id was not found in its store
    #[error("Invalid key identifier: {0}")]
    InvalidKeyIdentifier(String),

    /// The remote identity key does not match the pinned key
    #[error("Untrusted identity for address {0}")]
    UntrustedIdentity(String),

    /// A signed prekey or certificate signature failed verification
    #[error("Signature error: {0}")]
    InvalidSignature(String),

    /// No session exists and no bundle was supplied to build one
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The message counter was already consumed and no cached key remains
    #[error("Duplicate message: chain index {chain_index}, counter {counter}")]
    DuplicateMessage {
        /// Current index of the receiving chain
        chain_index: u32,
        /// Counter carried by the rejected message
        counter: u32,
    },

    /// Authentication/decryption failure or malformed message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Sealed sender certificate chain failure
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Sender certificate used after its expiration
    #[error("Certificate expired at {expiration}, validated at {timestamp}")]
    CertificateExpired {
        /// Expiration carried by the certificate
        expiration: u64,
        /// Reference timestamp used for validation
        timestamp: u64,
    },

    /// Sealed sender envelope structural or decryption failure
    #[error("Invalid sealed sender message: {0}")]
    InvalidSealedSenderMessage(String),

    /// Malformed key material
    #[error("Key error: {0}")]
    InvalidKey(String),

    /// Record serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Session state that cannot serve the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Failures reported by a store implementation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProtocolError {
    /// Creates a new invalid key identifier error.
    pub fn invalid_key_identifier<T: ToString>(msg: T) -> Self {
        Self::InvalidKeyIdentifier(msg.to_string())
    }

    /// Creates a new untrusted identity error.
    pub fn untrusted_identity<T: ToString>(address: T) -> Self {
        Self::UntrustedIdentity(address.to_string())
    }

    /// Creates a new signature error.
    pub fn invalid_signature<T: ToString>(msg: T) -> Self {
        Self::InvalidSignature(msg.to_string())
    }

    /// Creates a new session not found error.
    pub fn session_not_found<T: ToString>(msg: T) -> Self {
        Self::SessionNotFound(msg.to_string())
    }

    /// Creates a new invalid message error.
    pub fn invalid_message<T: ToString>(msg: T) -> Self {
        Self::InvalidMessage(msg.to_string())
    }

    /// Creates a new invalid certificate error.
    pub fn invalid_certificate<T: ToString>(msg: T) -> Self {
        Self::InvalidCertificate(msg.to_string())
    }

    /// Creates a new sealed sender envelope error.
    pub fn invalid_sealed_sender<T: ToString>(msg: T) -> Self {
        Self::InvalidSealedSenderMessage(msg.to_string())
    }

    /// Creates a new key error.
    pub fn invalid_key<T: ToString>(msg: T) -> Self {
        Self::InvalidKey(msg.to_string())
    }

    /// Creates a new serialization error.
    pub fn serialization<T: ToString>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state<T: ToString>(msg: T) -> Self {
        Self::InvalidState(msg.to_string())
    }

    /// Creates a new storage error.
    pub fn storage<T: ToString>(msg: T) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Creates a new configuration error.
    pub fn config<T: ToString>(msg: T) -> Self {
        Self::Config(msg.to_string())
    }
}

impl From<bincode::Error> for ProtocolError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
