//! In-process bead store.

use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;

use crate::core::types::{Bead, BeadId, BeadStatus, NewBead};
use crate::io::store::{BeadFilter, BeadSet, BeadStore, StoreError, StoreResult};

/// Bead store held entirely in memory behind a mutex.
///
/// Used by tests and by callers that load beads from elsewhere and only want
/// the scheduler's bookkeeping.
#[derive(Debug, Default)]
pub struct MemoryStore {
    set: Mutex<BeadSet>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_beads(beads: Vec<Bead>) -> Self {
        Self {
            set: Mutex::new(BeadSet::with_beads(beads)),
        }
    }

    /// Copy of every stored bead in id order.
    pub fn snapshot(&self) -> StoreResult<Vec<Bead>> {
        Ok(self.lock()?.beads.clone())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, BeadSet>> {
        self.set
            .lock()
            .map_err(|_| StoreError::Backend(anyhow!("memory store lock poisoned")))
    }
}

impl BeadStore for MemoryStore {
    fn create(&self, bead: NewBead) -> StoreResult<BeadId> {
        self.lock()?.create(bead)
    }

    fn get(&self, id: &str) -> StoreResult<Bead> {
        self.lock()?.get(id)
    }

    fn list(&self, filter: &BeadFilter) -> StoreResult<Vec<Bead>> {
        Ok(self.lock()?.list(filter))
    }

    fn update_status(
        &self,
        id: &str,
        expected: BeadStatus,
        next: BeadStatus,
        reason: Option<&str>,
    ) -> StoreResult<Bead> {
        self.lock()?.update_status(id, expected, next, reason)
    }

    fn add_dependency(&self, id: &str, depends_on: &str) -> StoreResult<()> {
        self.lock()?.add_dependency(id, depends_on)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::test_support::bead;

    /// Concurrent claims on the same bead: exactly one wins.
    #[test]
    fn concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryStore::with_beads(vec![bead("a", 0)]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .update_status("a", BeadStatus::Pending, BeadStatus::InProgress, None)
                        .is_ok()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn close_requires_in_progress() {
        let store = MemoryStore::with_beads(vec![bead("a", 0)]);
        assert!(matches!(
            store.close("a", "done"),
            Err(StoreError::StatusConflict { .. })
        ));
        store
            .update_status("a", BeadStatus::Pending, BeadStatus::InProgress, None)
            .expect("start");
        let closed = store.close("a", "done").expect("close");
        assert_eq!(closed.status, BeadStatus::Completed);
        assert_eq!(closed.reason.as_deref(), Some("done"));
    }
}
