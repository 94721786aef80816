use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::body::Body;

/// Copy of the bodies published at a step boundary.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    /// Number of publications so far, this one included.
    pub generation: u64,
    /// State of every body.
    pub bodies: Vec<Body>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    bodies: Vec<Body>,
}

/// Latest consistent state of the simulation, shared between the coordinator and the readers.
///
/// The coordinator [`publish`](SnapshotStore::publish)es a copy of the bodies after a step and
/// readers take copies of their own. The lock is only held while copying, so readers never see a
/// partially updated array and never hold up the integration for longer than a copy.
///
/// Generation `0` means nothing was published yet.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    slot: Mutex<Slot>,
}

impl SnapshotStore {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    // The slot is only ever replaced as a whole, so a panic while holding the lock cannot leave
    // it half written.
    #[inline]
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the stored bodies with a copy of `bodies` and returns the new generation.
    pub fn publish(&self, bodies: &[Body]) -> u64 {
        let mut slot = self.lock();

        slot.bodies.clear();
        slot.bodies.extend_from_slice(bodies);
        slot.generation += 1;

        slot.generation
    }

    /// Returns a copy of the latest published bodies.
    pub fn read_copy(&self) -> Vec<Body> {
        self.lock().bodies.clone()
    }

    /// Returns a copy of the latest publication if its generation differs from `seen`.
    pub fn read_since(&self, seen: u64) -> Option<Snapshot> {
        let slot = self.lock();

        (slot.generation != seen).then(|| Snapshot {
            generation: slot.generation,
            bodies: slot.bodies.clone(),
        })
    }

    /// Returns a copy of the latest publication.
    pub fn snapshot(&self) -> Snapshot {
        let slot = self.lock();

        Snapshot {
            generation: slot.generation,
            bodies: slot.bodies.clone(),
        }
    }

    /// Returns the generation of the latest publication.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }
}
