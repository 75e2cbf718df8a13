//! Sealed sender envelopes.
//!
//! ```text
//! 0x11 | ephemeral public key (33) | AES-256-GCM(content)
//! content = type (u8) | u32 len + sender certificate | u32 len + inner message
//! ```
//!
//! The envelope key comes from an agreement between a fresh ephemeral key and
//! the recipient's identity key. The transport sees neither the sender
//! address nor the sender identity.

use crate::chat::address::{ProtocolAddress, SenderAddress};
use crate::chat::cipher::SessionCipher;
use crate::chat::identity::IdentityKey;
use crate::chat::kdf_info;
use crate::chat::message::{CiphertextMessage, CiphertextMessageType};
use crate::config::SessionConfig;
use crate::crypto::{
    aead_decrypt, aead_encrypt, derive_secrets, KeyPair, PublicKey, AEAD_KEY_SIZE,
    AEAD_NONCE_SIZE, AEAD_TAG_SIZE, PUBLIC_KEY_LENGTH,
};
use crate::error::{ProtocolError, Result};
use crate::sealed::certificate::SenderCertificate;
use crate::storage::ProtocolStore;
use crate::validation::{Reader, Validator, Writer, MAX_CERTIFICATE_SIZE, MAX_MESSAGE_SIZE};
use rand::{CryptoRng, RngCore};
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Leading byte of every sealed sender envelope.
pub const SEALED_SENDER_VERSION: u8 = 0x11;

/// Decrypted payload of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnidentifiedSenderMessageContent {
    message_type: CiphertextMessageType,
    sender: SenderCertificate,
    contents: Vec<u8>,
    serialized: Vec<u8>,
}

impl UnidentifiedSenderMessageContent {
    pub fn new(
        message_type: CiphertextMessageType,
        sender: SenderCertificate,
        contents: Vec<u8>,
    ) -> Self {
        let mut writer = Writer::new();
        writer
            .u8(message_type as u8)
            .length_prefixed(sender.serialized())
            .length_prefixed(&contents);
        Self {
            message_type,
            sender,
            contents,
            serialized: writer.into_bytes(),
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::with_error(bytes, ProtocolError::InvalidSealedSenderMessage);
        let message_type = CiphertextMessageType::try_from(reader.u8()?)
            .map_err(ProtocolError::invalid_sealed_sender)?;
        let sender = SenderCertificate::deserialize(reader.length_prefixed(MAX_CERTIFICATE_SIZE)?)?;
        let contents = reader.length_prefixed(MAX_MESSAGE_SIZE)?.to_vec();
        reader.finish()?;

        Ok(Self {
            message_type,
            sender,
            contents,
            serialized: bytes.to_vec(),
        })
    }

    pub fn message_type(&self) -> CiphertextMessageType {
        self.message_type
    }

    pub fn sender(&self) -> &SenderCertificate {
        &self.sender
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

/// Result of opening an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSenderDecryptionResult {
    /// Sender taken from the validated certificate
    pub sender: SenderAddress,
    /// Decrypted inner plaintext
    pub message: Vec<u8>,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct EnvelopeKeys {
    cipher_key: [u8; AEAD_KEY_SIZE],
    nonce: [u8; AEAD_NONCE_SIZE],
}

impl EnvelopeKeys {
    fn derive(
        recipient_identity: &IdentityKey,
        ephemeral_public: &PublicKey,
        shared_secret: &[u8],
    ) -> Result<Self> {
        let mut salt = Vec::with_capacity(kdf_info::SEALED_SENDER.len() + 32 + PUBLIC_KEY_LENGTH);
        salt.extend_from_slice(kdf_info::SEALED_SENDER);
        salt.extend_from_slice(recipient_identity.as_bytes());
        salt.extend_from_slice(&ephemeral_public.serialize());

        let mut okm = derive_secrets(
            Some(&salt),
            shared_secret,
            &[],
            AEAD_KEY_SIZE + AEAD_NONCE_SIZE,
        )?;
        let mut keys = Self {
            cipher_key: [0u8; AEAD_KEY_SIZE],
            nonce: [0u8; AEAD_NONCE_SIZE],
        };
        keys.cipher_key.copy_from_slice(&okm[..AEAD_KEY_SIZE]);
        keys.nonce.copy_from_slice(&okm[AEAD_KEY_SIZE..]);
        okm.zeroize();
        Ok(keys)
    }
}

/// Sealed sender encryption and decryption with a given session config.
#[derive(Debug, Clone, Default)]
pub struct SealedSessionCipher {
    config: SessionConfig,
}

impl SealedSessionCipher {
    /// # Errors
    /// - `Config` if `config` fails [`SessionConfig::validate`]
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Encrypts `plaintext` for `destination` and seals it with
    /// `sender_certificate`.
    ///
    /// # Errors
    /// `SessionNotFound` if no identity is known for `destination`, plus any
    /// error of [`SessionCipher::encrypt`].
    pub fn encrypt<S, R>(
        &self,
        destination: &ProtocolAddress,
        sender_certificate: &SenderCertificate,
        plaintext: &[u8],
        store: &mut S,
        rng: &mut R,
    ) -> Result<Vec<u8>>
    where
        S: ProtocolStore + ?Sized,
        R: CryptoRng + RngCore,
    {
        let their_identity = store.get_identity(destination)?.ok_or_else(|| {
            ProtocolError::session_not_found(format!("No identity for {}", destination))
        })?;

        let message = SessionCipher::new(destination.clone())
            .with_config(self.config.clone())?
            .encrypt(plaintext, store)?;
        let content = UnidentifiedSenderMessageContent::new(
            message.message_type(),
            sender_certificate.clone(),
            message.serialize().to_vec(),
        );

        let ephemeral = KeyPair::generate(rng);
        let mut shared_secret = ephemeral.calculate_agreement(&their_identity.agreement_key()?);
        let keys = EnvelopeKeys::derive(&their_identity, &ephemeral.public_key, &shared_secret);
        shared_secret.zeroize();
        let keys = keys?;

        let ciphertext = aead_encrypt(&keys.cipher_key, &keys.nonce, content.serialized(), &[])?;

        let mut writer = Writer::new();
        writer
            .u8(SEALED_SENDER_VERSION)
            .bytes(&ephemeral.public_key.serialize())
            .bytes(&ciphertext);

        debug!(destination = %destination, "Sealed message");
        Ok(writer.into_bytes())
    }

    /// Opens an envelope, validates the sender certificate against
    /// `trust_root` at `timestamp` (ms) and decrypts the inner message from
    /// the certified sender.
    ///
    /// # Errors
    /// - `InvalidSealedSenderMessage` for malformed or undecryptable
    ///   envelopes, and when the inner message comes from an identity other
    ///   than the certified one
    /// - `InvalidCertificate` or `CertificateExpired` for chain failures
    /// - any error of [`SessionCipher::decrypt`]
    pub fn decrypt<S, R>(
        &self,
        envelope: &[u8],
        trust_root: &IdentityKey,
        timestamp: u64,
        store: &mut S,
        rng: &mut R,
    ) -> Result<SealedSenderDecryptionResult>
    where
        S: ProtocolStore + ?Sized,
        R: CryptoRng + RngCore,
    {
        Validator::validate_message_size(envelope).map_err(ProtocolError::invalid_sealed_sender)?;

        let mut reader = Reader::with_error(envelope, ProtocolError::InvalidSealedSenderMessage);
        let version = reader.u8()?;
        if version != SEALED_SENDER_VERSION {
            return Err(ProtocolError::invalid_sealed_sender(format!(
                "Unknown envelope version {:#04x}",
                version
            )));
        }
        let ephemeral_public = PublicKey::deserialize(reader.bytes(PUBLIC_KEY_LENGTH)?)
            .map_err(ProtocolError::invalid_sealed_sender)?;
        let ciphertext = reader.rest();
        if ciphertext.len() < AEAD_TAG_SIZE {
            return Err(ProtocolError::invalid_sealed_sender("Envelope too short"));
        }

        let our_identity = store.get_identity_key_pair()?;
        let mut shared_secret = our_identity.calculate_agreement(&ephemeral_public);
        let keys = EnvelopeKeys::derive(our_identity.identity_key(), &ephemeral_public, &shared_secret);
        shared_secret.zeroize();
        let keys = keys?;

        let content_bytes = aead_decrypt(&keys.cipher_key, &keys.nonce, ciphertext, &[])
            .map_err(|_| ProtocolError::invalid_sealed_sender("Envelope decryption failed"))?;
        let content = UnidentifiedSenderMessageContent::deserialize(&content_bytes)?;

        let certificate = content.sender();
        certificate.validate(trust_root, timestamp)?;

        let sender = certificate.sender().clone();
        let remote_address = sender.to_protocol_address();
        let message = CiphertextMessage::deserialize(content.message_type(), content.contents())?;

        let inner_identity = match &message {
            CiphertextMessage::PreKeySignalMessage(message) => Some(*message.identity_key()),
            CiphertextMessage::SignalMessage(_) => store
                .load_session(&remote_address)?
                .and_then(|record| record.remote_identity_key().copied()),
        };
        if let Some(identity) = inner_identity {
            if !identity.ct_equals(certificate.key()) {
                warn!(sender = %sender, "Inner message identity does not match certificate");
                return Err(ProtocolError::invalid_sealed_sender(
                    "Sender certificate key does not match session identity",
                ));
            }
        }

        let plaintext = SessionCipher::new(remote_address)
            .with_config(self.config.clone())?
            .decrypt(&message, store, rng)?;

        debug!(sender = %sender, "Opened sealed message");
        Ok(SealedSenderDecryptionResult {
            sender,
            message: plaintext,
        })
    }
}

/// [`SealedSessionCipher::encrypt`] with the default session config.
pub fn sealed_sender_encrypt<S, R>(
    destination: &ProtocolAddress,
    sender_certificate: &SenderCertificate,
    plaintext: &[u8],
    store: &mut S,
    rng: &mut R,
) -> Result<Vec<u8>>
where
    S: ProtocolStore + ?Sized,
    R: CryptoRng + RngCore,
{
    SealedSessionCipher::default().encrypt(destination, sender_certificate, plaintext, store, rng)
}

/// [`SealedSessionCipher::decrypt`] with the default session config.
pub fn sealed_sender_decrypt<S, R>(
    envelope: &[u8],
    trust_root: &IdentityKey,
    timestamp: u64,
    store: &mut S,
    rng: &mut R,
) -> Result<SealedSenderDecryptionResult>
where
    S: ProtocolStore + ?Sized,
    R: CryptoRng + RngCore,
{
    SealedSessionCipher::default().decrypt(envelope, trust_root, timestamp, store, rng)
}
