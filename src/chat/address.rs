//! Addresses of remote devices.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote device: account name plus device id.
///
/// Used as the key for session and identity storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolAddress {
    name: String,
    device_id: u32,
}

impl ProtocolAddress {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

/// Sender identity carried in a sender certificate.
///
/// `uuid` is a stable account identifier that survives a change of `name`
/// (e.g. a phone number). Sessions are always keyed by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderAddress {
    name: String,
    uuid: Option<String>,
    device_id: u32,
}

impl SenderAddress {
    pub fn new(name: impl Into<String>, uuid: Option<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            uuid,
            device_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// The session address for this sender.
    pub fn to_protocol_address(&self) -> ProtocolAddress {
        ProtocolAddress::new(self.name.clone(), self.device_id)
    }
}

impl fmt::Display for SenderAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}
