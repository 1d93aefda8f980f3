use std::time::Duration;

use sagalab_core::{Operation, ReadConcern, ReadResult, StoreError, WriteAck, WriteConcern};

/// A replicated key-value store that commits each write independently.
///
/// Implementations assign the version timestamp of every accepted write and
/// must keep those timestamps strictly increasing per key. A write carrying an
/// idempotency key that was already applied returns the original ack instead
/// of applying again.
pub trait ReplicatedStore: Send + Sync {
    /// Apply a write once `concern` is satisfied.
    ///
    /// # Errors
    ///
    /// `Timeout` when the store did not answer in time (the write may or may
    /// not have been applied), `Unavailable` when the concern cannot be met and
    /// nothing was applied, `Conflict` when the optimistic precondition failed.
    fn write(
        &self,
        op: &Operation,
        concern: WriteConcern,
        timeout: Duration,
    ) -> Result<WriteAck, StoreError>;

    /// Read the version of `op.key()` visible under `concern`.
    ///
    /// An absent key is [`ReadResult::NotFound`], not an error.
    ///
    /// # Errors
    ///
    /// `Timeout` or `Unavailable` when no suitable member answered.
    fn read(
        &self,
        op: &Operation,
        concern: ReadConcern,
        timeout: Duration,
    ) -> Result<ReadResult, StoreError>;
}
