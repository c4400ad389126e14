//! Copy-on-write publication of profile sets.
//!
//! Readers clone the current `Arc<ProfileSet>` once per call and keep using it
//! even if a newer set is published meanwhile; the old set is freed when its
//! last reader drops the handle. Recomputations are serialized by a mutex that
//! scoring and detection never touch.

use crate::types::profile::ProfileSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::info;

/// Immutable handle to a published profile set
pub type Snapshot = Arc<ProfileSet>;

pub struct SnapshotStore {
    current: RwLock<Snapshot>,
    recompute_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(initial: ProfileSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            recompute_lock: Mutex::new(()),
        }
    }

    /// Handle to the currently published set.
    pub fn current(&self) -> Snapshot {
        // The guarded value is only ever replaced whole, so a poisoned lock
        // still holds a complete set.
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install `set` as the current snapshot and return the one it replaced.
    pub fn publish(&self, set: ProfileSet) -> Snapshot {
        let next = Arc::new(set);
        let generation = next.generation;
        let subjects = next.subjects.len();

        let previous = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, next)
        };

        info!(
            generation = generation,
            previous_generation = previous.generation,
            subjects = subjects,
            "Published profile snapshot"
        );
        previous
    }

    pub fn generation(&self) -> u64 {
        self.current().generation
    }

    /// Run one recomputation against the current snapshot and publish its
    /// result. At most one runs at a time; a second caller waits until the
    /// first has swapped. Nothing is published if `recompute` fails.
    pub fn recompute_with<F, E>(&self, recompute: F) -> Result<Snapshot, E>
    where
        F: FnOnce(&ProfileSet) -> Result<ProfileSet, E>,
    {
        let _exclusive = self
            .recompute_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let base = self.current();
        let next = recompute(&base)?;
        self.publish(next);
        Ok(self.current())
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(ProfileSet::empty())
    }
}
