// SPDX-License-Identifier: GPL-3.0-only

//! Per-volume exclusive locks, indexed by registry slot.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held for the whole of a state-changing operation on one volume.
pub type VolumeGuard = OwnedMutexGuard<()>;

/// Lock table parallel to the registry arena.
///
/// Slots are never reused, so a slot index identifies the same volume for the
/// lifetime of the table and growing the table never moves an existing lock.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: RwLock<Vec<Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lock for a newly allocated slot and take it immediately.
    pub fn push_locked(&self) -> (usize, VolumeGuard) {
        let lock = Arc::new(Mutex::new(()));
        let guard = lock
            .clone()
            .try_lock_owned()
            .expect("a freshly created lock is never contended");

        let mut locks = self.locks.write().unwrap_or_else(PoisonError::into_inner);
        locks.push(lock);
        (locks.len() - 1, guard)
    }

    pub fn get(&self, slot: usize) -> Option<Arc<Mutex<()>>> {
        self.locks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slot)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.locks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
