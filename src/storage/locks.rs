//! Per-address lock registry.
//!
//! A ratchet step is a read-modify-write of one session record, so two
//! operations on the same remote address must not interleave. Operations on
//! different addresses take different locks and run in parallel.

use crate::chat::address::ProtocolAddress;
use crate::error::{ProtocolError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Registry of one mutex per remote address.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<ProtocolAddress, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, address: &ProtocolAddress) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ProtocolError::storage("Session lock registry poisoned"))?;
        Ok(locks
            .entry(address.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Runs `f` while holding the lock for `address`.
    pub fn with_lock<T, F>(&self, address: &ProtocolAddress, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let lock = self.lock_for(address)?;
        let result = match lock.lock() {
            Ok(_guard) => {
                trace!(address = %address, "Acquired session lock");
                f()
            }
            Err(_) => Err(ProtocolError::storage(format!(
                "Session lock for {} poisoned",
                address
            ))),
        };
        self.release(address, lock);
        result
    }

    /// Drops the registry entry for `address` once no caller holds or waits
    /// on its lock.
    fn release(&self, address: &ProtocolAddress, lock: Arc<Mutex<()>>) {
        if let Ok(mut locks) = self.locks.lock() {
            // One reference in the registry, one in `lock`.
            if Arc::strong_count(&lock) == 2 {
                locks.remove(address);
                trace!(address = %address, "Released idle session lock");
            }
        }
    }

    /// Number of addresses currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
