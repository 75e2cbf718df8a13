//! Ed25519 signatures for identity keys.
//!
//! Identity keys sign prekeys and certificates, and they also take part in
//! the X3DH agreements. For the latter the Ed25519 key is mapped onto its
//! Curve25519 (Montgomery) form, so one long-term key serves both roles.

use crate::crypto::keys::{PrivateKey, PublicKey, KEY_LENGTH};
use crate::error::{ProtocolError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Length of an Ed25519 signature.
pub const SIGNATURE_LENGTH: usize = 64;

/// Length of an Ed25519 public key.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Parses and validates Ed25519 public key bytes.
pub(crate) fn verifying_key(bytes: &[u8; SIGNING_KEY_LENGTH]) -> Result<VerifyingKey> {
    VerifyingKey::from_bytes(bytes)
        .map_err(|_| ProtocolError::invalid_key("Invalid Ed25519 public key"))
}

/// Signs `message` with the Ed25519 key derived from `seed`.
pub(crate) fn sign(seed: &[u8; KEY_LENGTH], message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
    SigningKey::from_bytes(seed).sign(message).to_bytes()
}

/// Verifies an Ed25519 signature. Malformed signatures verify as false.
pub(crate) fn verify(key: &[u8; SIGNING_KEY_LENGTH], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = verifying_key(key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}

/// Ed25519 public key bytes for a signing seed.
pub(crate) fn public_from_seed(seed: &[u8; KEY_LENGTH]) -> [u8; SIGNING_KEY_LENGTH] {
    SigningKey::from_bytes(seed).verifying_key().to_bytes()
}

/// Curve25519 private scalar matching the Ed25519 seed.
pub(crate) fn agreement_private_key(seed: &[u8; KEY_LENGTH]) -> PrivateKey {
    PrivateKey::from_raw(SigningKey::from_bytes(seed).to_scalar_bytes())
}

/// Curve25519 public key matching the Ed25519 public key.
pub(crate) fn agreement_public_key(key: &[u8; SIGNING_KEY_LENGTH]) -> Result<PublicKey> {
    let verifying = verifying_key(key)?;
    Ok(PublicKey::from_raw(verifying.to_montgomery().to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let seed = [11u8; KEY_LENGTH];
        let public = public_from_seed(&seed);
        let signature = sign(&seed, b"prekey bytes");

        assert!(verify(&public, b"prekey bytes", &signature));
        assert!(!verify(&public, b"other bytes", &signature));
        assert!(!verify(&public, b"prekey bytes", &signature[..10]));
    }

    #[test]
    fn test_montgomery_mapping_agrees() {
        let seed = [21u8; KEY_LENGTH];
        let identity_private = agreement_private_key(&seed);
        let identity_public = agreement_public_key(&public_from_seed(&seed)).unwrap();

        assert_eq!(identity_private.public_key(), identity_public);

        let other = PrivateKey::from_raw([5u8; KEY_LENGTH]);
        assert_eq!(
            identity_private.calculate_agreement(&other.public_key()),
            other.calculate_agreement(&identity_public)
        );
    }
}
