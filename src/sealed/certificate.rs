//! Sealed sender certificate chain.
//!
//! ```text
//! trust root ──signs──▶ ServerCertificate ──signs──▶ SenderCertificate
//! ```
//!
//! Both certificates serialize as `u32 len || body || signature (64)` and the
//! signature covers exactly `body`. A sender certificate body embeds the full
//! serialized server certificate, so a recipient only needs the trust root's
//! public key to validate the chain.

use crate::chat::address::SenderAddress;
use crate::chat::identity::{IdentityKey, IdentityKeyPair};
use crate::crypto::signature::{SIGNATURE_LENGTH, SIGNING_KEY_LENGTH};
use crate::error::{ProtocolError, Result};
use crate::validation::{Reader, Validator, Writer, MAX_CERTIFICATE_SIZE};
use tracing::warn;

fn certificate_reader(bytes: &[u8]) -> Reader<'_> {
    Reader::with_error(bytes, ProtocolError::InvalidCertificate)
}

/// Splits `u32 len || body || signature` into body and signature.
fn split_signed(bytes: &[u8]) -> Result<(&[u8], [u8; SIGNATURE_LENGTH])> {
    if bytes.len() > MAX_CERTIFICATE_SIZE {
        return Err(ProtocolError::invalid_certificate(format!(
            "Certificate of {} bytes exceeds maximum of {}",
            bytes.len(),
            MAX_CERTIFICATE_SIZE
        )));
    }
    let mut reader = certificate_reader(bytes);
    let body = reader.length_prefixed(MAX_CERTIFICATE_SIZE)?;
    let signature = reader.array::<SIGNATURE_LENGTH>()?;
    reader.finish()?;
    Ok((body, signature))
}

fn join_signed(body: &[u8], signature: &[u8; SIGNATURE_LENGTH]) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.length_prefixed(body).bytes(signature);
    writer.into_bytes()
}

fn read_identity(reader: &mut Reader<'_>) -> Result<IdentityKey> {
    let bytes = reader.bytes(SIGNING_KEY_LENGTH)?;
    IdentityKey::from_bytes(bytes).map_err(ProtocolError::invalid_certificate)
}

/// A server key delegated by the trust root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCertificate {
    key_id: u32,
    key: IdentityKey,
    signature: [u8; SIGNATURE_LENGTH],
    serialized: Vec<u8>,
}

impl ServerCertificate {
    /// Issues a certificate for `key`, signed by `trust_root`.
    pub fn new(key_id: u32, key: IdentityKey, trust_root: &IdentityKeyPair) -> Result<Self> {
        let body = Self::body(key_id, &key);
        let signature = trust_root.sign(&body);
        Ok(Self {
            key_id,
            key,
            signature,
            serialized: join_signed(&body, &signature),
        })
    }

    fn body(key_id: u32, key: &IdentityKey) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.u32(key_id).bytes(key.as_bytes());
        writer.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (body, signature) = split_signed(bytes)?;

        let mut reader = certificate_reader(body);
        let key_id = reader.u32()?;
        let key = read_identity(&mut reader)?;
        reader.finish()?;

        Ok(Self {
            key_id,
            key,
            signature,
            serialized: bytes.to_vec(),
        })
    }

    /// Whether `trust_root` signed this certificate.
    pub fn validate(&self, trust_root: &IdentityKey) -> bool {
        trust_root.verify_signature(&Self::body(self.key_id, &self.key), &self.signature)
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn public_key(&self) -> &IdentityKey {
        &self.key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

/// Proof, issued by a server, that an identity key belongs to a sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderCertificate {
    sender: SenderAddress,
    key: IdentityKey,
    expiration: u64,
    signer: ServerCertificate,
    signature: [u8; SIGNATURE_LENGTH],
    serialized: Vec<u8>,
}

impl SenderCertificate {
    /// Issues a certificate for `sender` valid until `expiration` (ms).
    ///
    /// `signer_key` must be the private half of `signer.public_key()`.
    pub fn new(
        sender: SenderAddress,
        key: IdentityKey,
        expiration: u64,
        signer: ServerCertificate,
        signer_key: &IdentityKeyPair,
    ) -> Result<Self> {
        Validator::validate_name(sender.name())?;
        if let Some(uuid) = sender.uuid() {
            Validator::validate_name(uuid)?;
        }
        if !signer_key.identity_key().ct_equals(signer.public_key()) {
            return Err(ProtocolError::invalid_certificate(
                "Signing key does not match server certificate",
            ));
        }

        let body = Self::body(&sender, &key, expiration, &signer);
        let signature = signer_key.sign(&body);
        Ok(Self {
            sender,
            key,
            expiration,
            signer,
            signature,
            serialized: join_signed(&body, &signature),
        })
    }

    fn body(
        sender: &SenderAddress,
        key: &IdentityKey,
        expiration: u64,
        signer: &ServerCertificate,
    ) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.string(sender.name());
        match sender.uuid() {
            Some(uuid) => writer.u8(1).string(uuid),
            None => writer.u8(0),
        };
        writer
            .u32(sender.device_id())
            .bytes(key.as_bytes())
            .u64(expiration)
            .length_prefixed(signer.serialized());
        writer.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (body, signature) = split_signed(bytes)?;

        let mut reader = certificate_reader(body);
        let name = reader.string()?;
        let uuid = match reader.u8()? {
            0 => None,
            1 => Some(reader.string()?),
            other => {
                return Err(ProtocolError::invalid_certificate(format!(
                    "Invalid uuid flag {}",
                    other
                )))
            }
        };
        let device_id = reader.u32()?;
        let key = read_identity(&mut reader)?;
        let expiration = reader.u64()?;
        let signer = ServerCertificate::deserialize(reader.length_prefixed(MAX_CERTIFICATE_SIZE)?)?;
        reader.finish()?;

        Ok(Self {
            sender: SenderAddress::new(name, uuid, device_id),
            key,
            expiration,
            signer,
            signature,
            serialized: bytes.to_vec(),
        })
    }

    /// Validates the chain up to `trust_root` and the expiration against
    /// `timestamp` (ms).
    ///
    /// # Errors
    /// - `InvalidCertificate` if either signature does not verify
    /// - `CertificateExpired` if `timestamp` is past the expiration
    pub fn validate(&self, trust_root: &IdentityKey, timestamp: u64) -> Result<()> {
        if !self.signer.validate(trust_root) {
            warn!(
                key_id = self.signer.key_id(),
                "Server certificate not signed by trust root"
            );
            return Err(ProtocolError::invalid_certificate(
                "Server certificate is not signed by the trust root",
            ));
        }

        let body = Self::body(&self.sender, &self.key, self.expiration, &self.signer);
        if !self
            .signer
            .public_key()
            .verify_signature(&body, &self.signature)
        {
            warn!(sender = %self.sender, "Sender certificate not signed by server key");
            return Err(ProtocolError::invalid_certificate(
                "Sender certificate is not signed by the server key",
            ));
        }

        if timestamp > self.expiration {
            warn!(
                sender = %self.sender,
                expiration = self.expiration,
                timestamp,
                "Sender certificate expired"
            );
            return Err(ProtocolError::CertificateExpired {
                expiration: self.expiration,
                timestamp,
            });
        }
        Ok(())
    }

    pub fn sender(&self) -> &SenderAddress {
        &self.sender
    }

    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    pub fn signer(&self) -> &ServerCertificate {
        &self.signer
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}
