use std::sync::{Mutex, PoisonError};

use sagalab_core::{ActorId, Timestamp};

/// Lamport clock owned by a single actor.
///
/// The counter never decreases: `tick` increments it, `merge` raises it to a
/// remote value when that value is ahead.
#[derive(Debug)]
pub struct LogicalClock {
    actor: ActorId,
    counter: Mutex<u64>,
}

impl LogicalClock {
    #[must_use]
    pub fn new(actor: ActorId) -> Self {
        Self::starting_at(actor, Timestamp::ZERO)
    }

    /// Restores a clock whose actor already issued timestamps up to `last`.
    #[must_use]
    pub fn starting_at(actor: ActorId, last: Timestamp) -> Self {
        Self {
            actor,
            counter: Mutex::new(last.value()),
        }
    }

    #[must_use]
    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// Issue a timestamp greater than everything issued or merged so far.
    pub fn tick(&self) -> Timestamp {
        let mut counter = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
        *counter = counter.saturating_add(1);
        Timestamp::new(*counter)
    }

    /// Catch up with a timestamp observed from another actor or the store.
    pub fn merge(&self, remote: Timestamp) {
        let mut counter = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
        *counter = (*counter).max(remote.value());
    }

    /// Last issued or merged value.
    #[must_use]
    pub fn current(&self) -> Timestamp {
        Timestamp::new(*self.counter.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
