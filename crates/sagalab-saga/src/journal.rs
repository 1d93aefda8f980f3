use sagalab_core::SagaId;
use thiserror::Error;

use crate::execution::SagaExecution;
use crate::log::CompensationLogEntry;

/// Failure to persist a saga checkpoint.
#[derive(Debug, Error)]
#[error("failed to persist saga '{saga_id}'")]
pub struct JournalError {
    pub saga_id: SagaId,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

/// Receives a snapshot after every state change of a running saga.
///
/// Implementations make in-flight sagas recoverable and observable; the
/// coordinator aborts the run if a checkpoint cannot be written.
pub trait SagaJournal: Send + Sync {
    /// Persist the execution together with its compensation log entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be stored.
    fn checkpoint(
        &self,
        execution: &SagaExecution,
        entries: &[CompensationLogEntry],
    ) -> Result<(), JournalError>;
}

/// Journal that keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJournal;

impl SagaJournal for NoopJournal {
    fn checkpoint(
        &self,
        _execution: &SagaExecution,
        _entries: &[CompensationLogEntry],
    ) -> Result<(), JournalError> {
        Ok(())
    }
}
