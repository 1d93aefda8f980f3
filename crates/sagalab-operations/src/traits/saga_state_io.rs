use sagalab_core::SagaId;

use crate::Result;
use crate::types::SagaSnapshot;

/// Reads and writes persisted saga snapshots.
///
/// A snapshot holds the execution state together with the saga's compensation
/// log entries, so a restarted orchestrator can resume or finish rollback.
pub trait SagaStateIO: Send + Sync {
    /// Replaces the stored snapshot for the snapshot's saga.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized or written.
    fn save(&self, snapshot: &SagaSnapshot) -> Result<()>;

    /// Returns `Ok(None)` if no snapshot exists for `saga_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be read or parsed.
    fn load(&self, saga_id: &SagaId) -> Result<Option<SagaSnapshot>>;

    /// All stored snapshots, oldest saga first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be listed or a snapshot is corrupt.
    fn list(&self) -> Result<Vec<SagaSnapshot>>;
}
