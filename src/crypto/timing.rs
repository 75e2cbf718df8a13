//! Constant-time comparisons.
//!
//! MAC checks and identity pinning compare attacker-influenced bytes against
//! secrets or pinned keys, so they must not exit early on the first mismatch.

use subtle::ConstantTimeEq;

/// Constant-time utilities for security-critical operations
pub struct TimingSafe;

impl TimingSafe {
    /// Constant-time comparison of byte arrays
    ///
    /// Returns true if arrays are equal, false otherwise. Only the length is
    /// allowed to leak; contents are compared without branching.
    pub fn bytes_equal(a: &[u8], b: &[u8]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        a.ct_eq(b).into()
    }

    /// Compares a received truncated MAC against the expected full MAC.
    ///
    /// The comparison covers `received.len()` leading bytes of `expected`;
    /// an empty or over-long `received` never matches.
    pub fn mac_equal(expected: &[u8], received: &[u8]) -> bool {
        if received.is_empty() || received.len() > expected.len() {
            return false;
        }
        expected[..received.len()].ct_eq(received).into()
    }
}
