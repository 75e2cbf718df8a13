//! Wire format of ratchet and PreKey messages.
//!
//! All integers are big-endian. Every message starts with
//! `(version << 4) | CURRENT_VERSION`.
//!
//! Ratchet message:
//!
//! ```text
//! version | ratchet key (33) | previous counter (u32) | counter (u32)
//!         | u32 len + ciphertext | mac (8)
//! ```
//!
//! PreKey message:
//!
//! ```text
//! version | registration id (u32) | one-time prekey id (u32, 0xFFFFFFFF = none)
//!         | signed prekey id (u32) | base key (33) | identity key (32)
//!         | u32 len + ratchet message
//! ```

use crate::chat::identity::IdentityKey;
use crate::chat::prekey::PreKeyId;
use crate::chat::{CIPHERTEXT_MESSAGE_CURRENT_VERSION, MAC_LENGTH, NO_PRE_KEY_ID};
use crate::crypto::signature::SIGNING_KEY_LENGTH;
use crate::crypto::{hmac_sha3, PublicKey, TimingSafe, PUBLIC_KEY_LENGTH};
use crate::error::{ProtocolError, Result};
use crate::validation::{Reader, Validator, Writer, MAX_MESSAGE_SIZE};
use std::fmt;

/// Message kinds produced by the session cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CiphertextMessageType {
    /// A plain ratchet message
    Whisper = 2,
    /// A ratchet message wrapped with handshake data
    PreKey = 3,
}

impl TryFrom<u8> for CiphertextMessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(Self::Whisper),
            3 => Ok(Self::PreKey),
            other => Err(ProtocolError::invalid_message(format!(
                "Unknown message type {}",
                other
            ))),
        }
    }
}

fn version_byte(version: u8) -> u8 {
    (version << 4) | CIPHERTEXT_MESSAGE_CURRENT_VERSION
}

fn check_version(byte: u8) -> Result<u8> {
    let version = byte >> 4;
    if version != CIPHERTEXT_MESSAGE_CURRENT_VERSION {
        return Err(ProtocolError::invalid_message(format!(
            "Unsupported message version {}",
            version
        )));
    }
    Ok(version)
}

/// A Double Ratchet message.
#[derive(Clone, PartialEq, Eq)]
pub struct SignalMessage {
    message_version: u8,
    sender_ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Vec<u8>,
    serialized: Vec<u8>,
}

impl fmt::Debug for SignalMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalMessage")
            .field("sender_ratchet_key", &self.sender_ratchet_key)
            .field("counter", &self.counter)
            .field("previous_counter", &self.previous_counter)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

impl SignalMessage {
    /// Builds and authenticates a ratchet message.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        message_version: u8,
        mac_key: &[u8],
        sender_ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: Vec<u8>,
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
    ) -> Result<Self> {
        let mut writer = Writer::new();
        writer
            .u8(version_byte(message_version))
            .bytes(&sender_ratchet_key.serialize())
            .u32(previous_counter)
            .u32(counter)
            .length_prefixed(&ciphertext);
        let mut serialized = writer.into_bytes();

        let mac = Self::compute_mac(sender_identity, receiver_identity, mac_key, &serialized)?;
        serialized.extend_from_slice(&mac);

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext,
            serialized,
        })
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Validator::validate_message_size(bytes)?;
        if bytes.len() < MAC_LENGTH + 1 {
            return Err(ProtocolError::invalid_message("Message too short"));
        }

        let mut reader = Reader::new(bytes);
        let message_version = check_version(reader.u8()?)?;
        let sender_ratchet_key = PublicKey::deserialize(reader.bytes(PUBLIC_KEY_LENGTH)?)
            .map_err(ProtocolError::invalid_message)?;
        let previous_counter = reader.u32()?;
        let counter = reader.u32()?;
        let ciphertext = reader.length_prefixed(MAX_MESSAGE_SIZE)?.to_vec();
        reader.bytes(MAC_LENGTH)?;
        reader.finish()?;

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext,
            serialized: bytes.to_vec(),
        })
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn sender_ratchet_key(&self) -> &PublicKey {
        &self.sender_ratchet_key
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn body(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    /// Checks the trailing MAC in constant time.
    pub fn verify_mac(
        &self,
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
        mac_key: &[u8],
    ) -> Result<bool> {
        let split = self.serialized.len() - MAC_LENGTH;
        let full_mac =
            Self::full_mac(sender_identity, receiver_identity, mac_key, &self.serialized[..split])?;
        Ok(TimingSafe::mac_equal(&full_mac, &self.serialized[split..]))
    }

    fn compute_mac(
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
        mac_key: &[u8],
        message: &[u8],
    ) -> Result<[u8; MAC_LENGTH]> {
        let full = Self::full_mac(sender_identity, receiver_identity, mac_key, message)?;
        let mut mac = [0u8; MAC_LENGTH];
        mac.copy_from_slice(&full[..MAC_LENGTH]);
        Ok(mac)
    }

    fn full_mac(
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
        mac_key: &[u8],
        message: &[u8],
    ) -> Result<[u8; 32]> {
        hmac_sha3(
            mac_key,
            &[
                &sender_identity.as_bytes()[..],
                &receiver_identity.as_bytes()[..],
                message,
            ],
        )
    }
}

/// A ratchet message carrying the handshake data the receiver needs to
/// build its side of the session.
#[derive(Clone, PartialEq, Eq)]
pub struct PreKeySignalMessage {
    message_version: u8,
    registration_id: u32,
    pre_key_id: Option<PreKeyId>,
    signed_pre_key_id: PreKeyId,
    base_key: PublicKey,
    identity_key: IdentityKey,
    message: SignalMessage,
    serialized: Vec<u8>,
}

impl fmt::Debug for PreKeySignalMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreKeySignalMessage")
            .field("registration_id", &self.registration_id)
            .field("pre_key_id", &self.pre_key_id)
            .field("signed_pre_key_id", &self.signed_pre_key_id)
            .field("base_key", &self.base_key)
            .field("identity_key", &self.identity_key)
            .field("message", &self.message)
            .finish()
    }
}

impl PreKeySignalMessage {
    pub fn new(
        message_version: u8,
        registration_id: u32,
        pre_key_id: Option<PreKeyId>,
        signed_pre_key_id: PreKeyId,
        base_key: PublicKey,
        identity_key: IdentityKey,
        message: SignalMessage,
    ) -> Result<Self> {
        if pre_key_id == Some(NO_PRE_KEY_ID) {
            return Err(ProtocolError::invalid_key_identifier(format!(
                "Prekey id {:#x} is reserved",
                NO_PRE_KEY_ID
            )));
        }

        let mut writer = Writer::new();
        writer
            .u8(version_byte(message_version))
            .u32(registration_id)
            .u32(pre_key_id.unwrap_or(NO_PRE_KEY_ID))
            .u32(signed_pre_key_id)
            .bytes(&base_key.serialize())
            .bytes(&identity_key.serialize())
            .length_prefixed(message.serialized());

        Ok(Self {
            message_version,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized: writer.into_bytes(),
        })
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Validator::validate_message_size(bytes)?;

        let mut reader = Reader::new(bytes);
        let message_version = check_version(reader.u8()?)?;
        let registration_id = reader.u32()?;
        let pre_key_id = match reader.u32()? {
            NO_PRE_KEY_ID => None,
            id => Some(id),
        };
        let signed_pre_key_id = reader.u32()?;
        let base_key = PublicKey::deserialize(reader.bytes(PUBLIC_KEY_LENGTH)?)
            .map_err(ProtocolError::invalid_message)?;
        let identity_key = IdentityKey::from_bytes(reader.bytes(SIGNING_KEY_LENGTH)?)
            .map_err(ProtocolError::invalid_message)?;
        let message = SignalMessage::deserialize(reader.length_prefixed(MAX_MESSAGE_SIZE)?)?;
        reader.finish()?;

        if message.message_version() != message_version {
            return Err(ProtocolError::invalid_message(
                "Embedded message version does not match",
            ));
        }

        Ok(Self {
            message_version,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized: bytes.to_vec(),
        })
    }

    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    pub fn pre_key_id(&self) -> Option<PreKeyId> {
        self.pre_key_id
    }

    pub fn signed_pre_key_id(&self) -> PreKeyId {
        self.signed_pre_key_id
    }

    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn message(&self) -> &SignalMessage {
        &self.message
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

/// Output of the session cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiphertextMessage {
    SignalMessage(SignalMessage),
    PreKeySignalMessage(PreKeySignalMessage),
}

impl CiphertextMessage {
    /// Parses `bytes` as a message of kind `message_type`.
    pub fn deserialize(message_type: CiphertextMessageType, bytes: &[u8]) -> Result<Self> {
        Ok(match message_type {
            CiphertextMessageType::Whisper => Self::SignalMessage(SignalMessage::deserialize(bytes)?),
            CiphertextMessageType::PreKey => {
                Self::PreKeySignalMessage(PreKeySignalMessage::deserialize(bytes)?)
            }
        })
    }

    pub fn message_type(&self) -> CiphertextMessageType {
        match self {
            Self::SignalMessage(_) => CiphertextMessageType::Whisper,
            Self::PreKeySignalMessage(_) => CiphertextMessageType::PreKey,
        }
    }

    pub fn serialize(&self) -> &[u8] {
        match self {
            Self::SignalMessage(message) => message.serialized(),
            Self::PreKeySignalMessage(message) => message.serialized(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::identity::IdentityKeyPair;
    use crate::crypto::KeyPair;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Fixture {
        sender: IdentityKeyPair,
        receiver: IdentityKeyPair,
        message: SignalMessage,
    }

    fn fixture() -> Fixture {
        let mut rng = StdRng::seed_from_u64(40);
        let sender = IdentityKeyPair::generate(&mut rng);
        let receiver = IdentityKeyPair::generate(&mut rng);
        let ratchet = KeyPair::generate(&mut rng);
        let message = SignalMessage::new(
            CIPHERTEXT_MESSAGE_CURRENT_VERSION,
            &[7u8; 32],
            ratchet.public_key,
            5,
            2,
            vec![1, 2, 3, 4],
            sender.identity_key(),
            receiver.identity_key(),
        )
        .unwrap();
        Fixture {
            sender,
            receiver,
            message,
        }
    }

    #[test]
    fn test_signal_message_parse_and_mac() {
        let f = fixture();
        let parsed = SignalMessage::deserialize(f.message.serialized()).unwrap();

        assert_eq!(parsed, f.message);
        assert_eq!(parsed.counter(), 5);
        assert_eq!(parsed.previous_counter(), 2);
        assert_eq!(parsed.body(), &[1, 2, 3, 4]);
        assert!(parsed
            .verify_mac(f.sender.identity_key(), f.receiver.identity_key(), &[7u8; 32])
            .unwrap());
        // Identities are bound in order.
        assert!(!parsed
            .verify_mac(f.receiver.identity_key(), f.sender.identity_key(), &[7u8; 32])
            .unwrap());
    }

    #[test]
    fn test_flipped_mac_byte_rejected() {
        let f = fixture();
        let mut bytes = f.message.serialized().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let parsed = SignalMessage::deserialize(&bytes).unwrap();
        assert!(!parsed
            .verify_mac(f.sender.identity_key(), f.receiver.identity_key(), &[7u8; 32])
            .unwrap());
        assert!(!parsed
            .verify_mac(f.sender.identity_key(), f.receiver.identity_key(), &[8u8; 32])
            .unwrap());
    }

    #[test]
    fn test_signal_message_layout() {
        let f = fixture();
        let bytes = f.message.serialized();

        assert_eq!(bytes[0], 0x33);
        assert_eq!(bytes[1], crate::crypto::DJB_KEY_TYPE);
        assert_eq!(&bytes[34..38], &2u32.to_be_bytes());
        assert_eq!(&bytes[38..42], &5u32.to_be_bytes());
        assert_eq!(bytes.len(), 1 + 33 + 4 + 4 + 4 + 4 + MAC_LENGTH);
    }

    #[test]
    fn test_signal_message_rejects_bad_version_and_truncation() {
        let f = fixture();
        let mut bytes = f.message.serialized().to_vec();

        assert!(SignalMessage::deserialize(&bytes[..bytes.len() - 1]).is_err());

        bytes[0] = 0x23;
        assert!(matches!(
            SignalMessage::deserialize(&bytes),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_pre_key_message_sentinel() {
        let f = fixture();
        let mut rng = StdRng::seed_from_u64(41);
        let base = KeyPair::generate(&mut rng);

        let message = PreKeySignalMessage::new(
            CIPHERTEXT_MESSAGE_CURRENT_VERSION,
            1234,
            None,
            9,
            base.public_key,
            *f.sender.identity_key(),
            f.message.clone(),
        )
        .unwrap();

        assert_eq!(&message.serialized()[5..9], &NO_PRE_KEY_ID.to_be_bytes());

        let parsed = PreKeySignalMessage::deserialize(message.serialized()).unwrap();
        assert_eq!(parsed.pre_key_id(), None);
        assert_eq!(parsed.registration_id(), 1234);
        assert_eq!(parsed.signed_pre_key_id(), 9);
        assert_eq!(parsed.message(), &f.message);

        let with_id = PreKeySignalMessage::new(
            CIPHERTEXT_MESSAGE_CURRENT_VERSION,
            1234,
            Some(17),
            9,
            base.public_key,
            *f.sender.identity_key(),
            f.message,
        )
        .unwrap();
        let parsed = PreKeySignalMessage::deserialize(with_id.serialized()).unwrap();
        assert_eq!(parsed.pre_key_id(), Some(17));
    }

    #[test]
    fn test_message_type_dispatch() {
        let f = fixture();
        let message = CiphertextMessage::deserialize(
            CiphertextMessageType::try_from(2).unwrap(),
            f.message.serialized(),
        )
        .unwrap();

        assert_eq!(message.message_type(), CiphertextMessageType::Whisper);
        assert!(CiphertextMessageType::try_from(7).is_err());
        assert!(CiphertextMessage::deserialize(CiphertextMessageType::PreKey, message.serialize()).is_err());
    }
}
