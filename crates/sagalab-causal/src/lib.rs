//! Causal bookkeeping for operations against a replicated store.
//!
//! A [`LogicalClock`] stamps every operation an actor issues. The
//! [`CausalTracker`] keeps a bounded version history per key and compares each
//! read against what the reading [`Session`] has already observed, reporting
//! regressions as [`CausalViolation`]s through a pull list and a push feed.

mod clock;
mod feed;
mod session;
mod tracker;

pub use clock::LogicalClock;
pub use feed::AnomalyFeed;
pub use session::Session;
pub use tracker::{
    CausalTracker, CausalViolation, DEFAULT_HISTORY_DEPTH, DEFAULT_MAX_VIOLATIONS, ReadObservation,
    ReadOutcome, UnsatisfiedDependency, WriteRecord,
};
