//! Per-key mutual exclusion for read-modify-write sequences.

use crate::domain::CacheKey;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    held: Mutex<HashSet<CacheKey>>,
    released: Condvar,
}

impl KeyLocks {
    fn held(&self) -> MutexGuard<'_, HashSet<CacheKey>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until no other guard holds `key`, then take it.
    pub(crate) fn acquire(&self, key: &CacheKey) -> KeyGuard<'_> {
        let mut held = self.held();
        while held.contains(key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        held.insert(key.clone());
        KeyGuard {
            locks: self,
            key: key.clone(),
        }
    }
}

/// Exclusive hold on one cache key; released on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: CacheKey,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.locks.held().remove(&self.key);
        self.locks.released.notify_all();
    }
}
