//! Sealed sender: hiding the sender from the transport.
//!
//! The sender wraps an ordinary session message together with a sender
//! certificate and encrypts the bundle to the recipient's identity key with a
//! fresh ephemeral key. The recipient validates the certificate chain
//! against an offline trust root and decrypts the inner message as coming
//! from the certified address.

pub mod certificate;
pub mod envelope;

pub use certificate::{SenderCertificate, ServerCertificate};
pub use envelope::{
    sealed_sender_decrypt, sealed_sender_encrypt, SealedSenderDecryptionResult,
    SealedSessionCipher, UnidentifiedSenderMessageContent, SEALED_SENDER_VERSION,
};
