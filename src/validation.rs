//! Bounds-checked wire decoding and size limits.
//!
//! Every wire structure in the crate (ratchet messages, PreKey messages,
//! certificates, sealed envelopes) is a fixed sequence of big-endian integers,
//! fixed-width keys and `u32`-length-prefixed blobs. [`Reader`] walks such a
//! buffer without ever indexing past its end, and [`Writer`] produces the
//! same layout.

use crate::error::{ProtocolError, Result};

/// Maximum accepted size of a serialized message or envelope (1MB).
///
/// Length prefixes larger than this are rejected before any allocation.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Maximum accepted size of a serialized certificate (4KB).
pub const MAX_CERTIFICATE_SIZE: usize = 4 * 1024;

/// Maximum accepted length of an address name or sender uuid.
pub const MAX_NAME_LENGTH: usize = 1024;

/// Validation functions for input data
pub struct Validator;

impl Validator {
    /// Validate message size
    pub fn validate_message_size(data: &[u8]) -> Result<()> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::invalid_message(format!(
                "Message too large: {} bytes exceeds maximum of {} bytes",
                data.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        Ok(())
    }

    /// Validate an address name or uuid string
    pub fn validate_name(name: &str) -> Result<()> {
        if name.len() > MAX_NAME_LENGTH {
            return Err(ProtocolError::invalid_message(format!(
                "Name too long: {} bytes exceeds maximum of {} bytes",
                name.len(),
                MAX_NAME_LENGTH
            )));
        }
        if name.contains('\0') {
            return Err(ProtocolError::invalid_message("Name contains null bytes"));
        }
        Ok(())
    }
}

/// Cursor over a wire buffer.
///
/// Errors are built with the constructor supplied at creation, so a
/// certificate parser reports `InvalidCertificate` while a message parser
/// reports `InvalidMessage` from the same code.
pub struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
    make_error: fn(String) -> ProtocolError,
}

impl<'a> Reader<'a> {
    /// Reader reporting failures as [`ProtocolError::InvalidMessage`].
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_error(data, ProtocolError::InvalidMessage)
    }

    /// Reader reporting failures through `make_error`.
    pub fn with_error(data: &'a [u8], make_error: fn(String) -> ProtocolError) -> Self {
        Self {
            data,
            offset: 0,
            make_error,
        }
    }

    /// Builds an error of this reader's kind.
    pub fn error(&self, msg: impl ToString) -> ProtocolError {
        (self.make_error)(msg.to_string())
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Takes the next `len` bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.error(format!(
                "Truncated input: need {} bytes at offset {}, have {}",
                len,
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Takes exactly `N` bytes as an array.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    /// Takes a `u32`-length-prefixed blob of at most `max` bytes.
    pub fn length_prefixed(&mut self, max: usize) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        if len > max {
            return Err(self.error(format!(
                "Length field {} exceeds maximum of {}",
                len, max
            )));
        }
        self.bytes(len)
    }

    /// Takes a `u32`-length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String> {
        let bytes = self.length_prefixed(MAX_NAME_LENGTH)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.error("String is not valid UTF-8"))
    }

    /// Takes everything that is left.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.offset..];
        self.offset = self.data.len();
        slice
    }

    /// Fails unless the whole buffer was consumed.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(self.error(format!("{} trailing bytes", self.remaining())));
        }
        Ok(())
    }
}

/// Builder for the wire layout read by [`Reader`].
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self
    }

    /// Appends `value` with a `u32` length prefix.
    ///
    /// Callers keep payloads well below `u32::MAX`; lengths are checked
    /// against the size limits when read back.
    pub fn length_prefixed(&mut self, value: &[u8]) -> &mut Self {
        self.u32(value.len() as u32);
        self.bytes(value)
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        self.length_prefixed(value.as_bytes())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
