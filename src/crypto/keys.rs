//! Curve25519 key agreement keys.
//!
//! Ratchet keys, base keys and prekeys are X25519 key pairs. Public keys are
//! serialized with a leading type byte so that the wire format can carry other
//! key types in the future without ambiguity.

use crate::crypto::{fingerprint, TimingSafe};
use crate::error::{ProtocolError, Result};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey as DalekPublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Type byte prefixed to serialized Curve25519 public keys.
pub const DJB_KEY_TYPE: u8 = 0x05;

/// Length of a serialized public key (type byte + 32 key bytes).
pub const PUBLIC_KEY_LENGTH: usize = 33;

/// Length of raw Curve25519 key material.
pub const KEY_LENGTH: usize = 32;

/// An X25519 public key.
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PublicKey {
    key: [u8; KEY_LENGTH],
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("fingerprint", &fingerprint(&self.key))
            .finish()
    }
}

impl PublicKey {
    /// Creates a public key from raw Curve25519 bytes.
    pub fn from_raw(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Parses a serialized public key (`0x05 || key`).
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_LENGTH {
            return Err(ProtocolError::invalid_key(format!(
                "Public key must be {} bytes, got {}",
                PUBLIC_KEY_LENGTH,
                bytes.len()
            )));
        }
        if bytes[0] != DJB_KEY_TYPE {
            return Err(ProtocolError::invalid_key(format!(
                "Unknown public key type {:#04x}",
                bytes[0]
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes[1..]);
        Ok(Self { key })
    }

    /// Serializes the key with its type byte.
    pub fn serialize(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let mut out = [0u8; PUBLIC_KEY_LENGTH];
        out[0] = DJB_KEY_TYPE;
        out[1..].copy_from_slice(&self.key);
        out
    }

    /// Returns the raw key bytes.
    pub fn public_key_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Constant-time equality check.
    pub fn ct_equals(&self, other: &PublicKey) -> bool {
        TimingSafe::bytes_equal(&self.key, &other.key)
    }

    pub(crate) fn as_dalek(&self) -> DalekPublicKey {
        DalekPublicKey::from(self.key)
    }
}

/// An X25519 private key.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    key: [u8; KEY_LENGTH],
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl PrivateKey {
    /// Creates a private key from raw scalar bytes. Clamping happens at use.
    pub fn from_raw(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Parses a serialized private key.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            ProtocolError::invalid_key(format!(
                "Private key must be {} bytes, got {}",
                KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Returns the raw scalar bytes.
    pub fn serialize(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derives the matching public key.
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.key);
        PublicKey::from_raw(DalekPublicKey::from(&secret).to_bytes())
    }

    /// Computes the X25519 shared secret with `their_key`.
    pub fn calculate_agreement(&self, their_key: &PublicKey) -> [u8; KEY_LENGTH] {
        let secret = StaticSecret::from(self.key);
        secret.diffie_hellman(&their_key.as_dalek()).to_bytes()
    }
}

/// An X25519 key pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyPair {
    /// The public half
    pub public_key: PublicKey,
    /// The private half
    pub private_key: PrivateKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generates a fresh key pair from `rng`.
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let mut key = [0u8; KEY_LENGTH];
        rng.fill_bytes(&mut key);
        let private_key = PrivateKey::from_raw(key);
        key.zeroize();
        Self::from_private_key(private_key)
    }

    /// Rebuilds a key pair from its private half.
    pub fn from_private_key(private_key: PrivateKey) -> Self {
        Self {
            public_key: private_key.public_key(),
            private_key,
        }
    }

    /// Computes the shared secret with `their_key`.
    pub fn calculate_agreement(&self, their_key: &PublicKey) -> [u8; KEY_LENGTH] {
        self.private_key.calculate_agreement(their_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_agreement_is_symmetric() {
        let mut rng = StdRng::seed_from_u64(1);
        let alice = KeyPair::generate(&mut rng);
        let bob = KeyPair::generate(&mut rng);

        assert_eq!(
            alice.calculate_agreement(&bob.public_key),
            bob.calculate_agreement(&alice.public_key)
        );
    }

    #[test]
    fn test_public_key_serialization() {
        let mut rng = StdRng::seed_from_u64(2);
        let pair = KeyPair::generate(&mut rng);

        let bytes = pair.public_key.serialize();
        assert_eq!(bytes[0], DJB_KEY_TYPE);
        assert_eq!(PublicKey::deserialize(&bytes).unwrap(), pair.public_key);
    }

    #[test]
    fn test_public_key_rejects_bad_type_and_length() {
        let mut bytes = [7u8; PUBLIC_KEY_LENGTH];
        assert!(PublicKey::deserialize(&bytes).is_err());

        bytes[0] = DJB_KEY_TYPE;
        assert!(PublicKey::deserialize(&bytes[..20]).is_err());
    }

    #[test]
    fn test_from_private_key_matches_generated() {
        let mut rng = StdRng::seed_from_u64(3);
        let pair = KeyPair::generate(&mut rng);
        let rebuilt = KeyPair::from_private_key(pair.private_key.clone());
        assert_eq!(rebuilt.public_key, pair.public_key);
    }

    #[test]
    fn test_private_key_debug_redacted() {
        let key = PrivateKey::from_raw([9u8; KEY_LENGTH]);
        assert!(format!("{:?}", key).contains("REDACTED"));
    }
}
