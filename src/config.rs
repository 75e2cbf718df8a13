//! Tunable bounds for session and sender key state.
//!
//! None of these values are protocol invariants: both peers may run with
//! different settings. They bound memory growth when a peer (or an attacker)
//! opens large gaps in the message counters or forces many ratchet steps.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};

/// Default number of skipped message keys kept per receiving chain.
pub const DEFAULT_MAX_SKIPPED_MESSAGE_KEYS: usize = 2000;

/// Default maximum distance a message counter may jump ahead of its chain.
pub const DEFAULT_MAX_FORWARD_JUMPS: u32 = 25_000;

/// Default number of receiving chains retained per session state.
pub const DEFAULT_MAX_RECEIVER_CHAINS: usize = 5;

/// Default number of archived session states retained per record.
pub const DEFAULT_MAX_ARCHIVED_STATES: usize = 40;

/// Default number of sender key states retained per sender key record.
pub const DEFAULT_MAX_SENDER_KEY_STATES: usize = 5;

/// Configuration for session and sender key bookkeeping.
///
/// Missing fields fall back to their defaults when deserializing, so a host
/// can override a single bound from its own configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Skipped message keys cached per receiving chain. The oldest entry is
    /// evicted once the cache is full.
    pub max_skipped_message_keys: usize,
    /// Largest accepted gap between a chain's index and a message counter.
    pub max_forward_jumps: u32,
    /// Receiving chains kept per session state, oldest evicted first.
    pub max_receiver_chains: usize,
    /// Previous session states kept per record, oldest evicted first.
    pub max_archived_states: usize,
    /// Sender key states kept per sender key record, oldest evicted first.
    pub max_sender_key_states: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_skipped_message_keys: DEFAULT_MAX_SKIPPED_MESSAGE_KEYS,
            max_forward_jumps: DEFAULT_MAX_FORWARD_JUMPS,
            max_receiver_chains: DEFAULT_MAX_RECEIVER_CHAINS,
            max_archived_states: DEFAULT_MAX_ARCHIVED_STATES,
            max_sender_key_states: DEFAULT_MAX_SENDER_KEY_STATES,
        }
    }
}

impl SessionConfig {
    /// Checks that every bound can hold at least one entry.
    pub fn validate(&self) -> Result<()> {
        if self.max_receiver_chains == 0 {
            return Err(ProtocolError::config(
                "max_receiver_chains must be at least 1",
            ));
        }
        if self.max_sender_key_states == 0 {
            return Err(ProtocolError::config(
                "max_sender_key_states must be at least 1",
            ));
        }
        if self.max_forward_jumps == 0 {
            return Err(ProtocolError::config("max_forward_jumps must be at least 1"));
        }
        Ok(())
    }
}
