use std::fmt::Debug;
use std::time::Duration;

use sagalab_core::SagaId;
use thiserror::Error;

use crate::execution::SagaStatus;
use crate::journal::JournalError;

/// Error from a failed compensation operation.
#[derive(Debug, Error)]
#[error("compensation failed for step '{step}': {description}")]
pub struct CompensationError<E> {
    /// Name of the step whose compensation failed.
    pub step: String,
    pub step_index: usize,
    /// Description of what the compensation was trying to do.
    pub description: String,
    /// The underlying error.
    #[source]
    pub error: E,
}

/// Why a saga stopped moving forward.
#[derive(Debug, Error)]
pub enum FailureCause<E> {
    #[error("{0}")]
    Step(E),

    #[error("cancelled")]
    Cancelled,

    #[error("step ran for {}ms, limit is {}ms", elapsed.as_millis(), limit.as_millis())]
    DeadlineExceeded { elapsed: Duration, limit: Duration },

    /// Raised when resuming a saga that was interrupted mid-flight.
    #[error("interrupted: {reason}")]
    Interrupted { reason: String },
}

/// Error from saga execution.
///
/// A step failure followed by a clean rollback is not an error; see
/// [`SagaOutcome::Compensated`](crate::SagaOutcome::Compensated).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SagaError<E: Debug> {
    /// A step failed and some compensations also failed.
    #[error("step '{failed_step}' failed, and {} compensation(s) also failed", compensation_errors.len())]
    CompensationFailed {
        saga_id: SagaId,
        /// Name of the step that originally failed.
        failed_step: String,
        cause: FailureCause<E>,
        compensation_errors: Vec<CompensationError<E>>,
    },

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("saga '{saga_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        saga_id: SagaId,
        from: SagaStatus,
        to: SagaStatus,
    },

    #[error("saga '{saga_id}' already finished as {status}")]
    AlreadyTerminal { saga_id: SagaId, status: SagaStatus },

    #[error("saga '{saga_id}' belongs to definition '{found}', not '{expected}'")]
    DefinitionMismatch {
        saga_id: SagaId,
        expected: String,
        found: String,
    },

    #[error("saga '{saga_id}' references unknown step index {index}")]
    UnknownStep { saga_id: SagaId, index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct TestError(String);

    #[test]
    fn compensation_failed_counts_errors() {
        let error: SagaError<TestError> = SagaError::CompensationFailed {
            saga_id: SagaId::from("s"),
            failed_step: "pay".to_string(),
            cause: FailureCause::Step(TestError("declined".to_string())),
            compensation_errors: vec![CompensationError {
                step: "reserve".to_string(),
                step_index: 0,
                description: "release reservation".to_string(),
                error: TestError("unavailable".to_string()),
            }],
        };

        assert_eq!(
            error.to_string(),
            "step 'pay' failed, and 1 compensation(s) also failed"
        );
    }

    #[test]
    fn deadline_cause_reports_both_durations() {
        let cause: FailureCause<TestError> = FailureCause::DeadlineExceeded {
            elapsed: Duration::from_millis(120),
            limit: Duration::from_millis(100),
        };

        assert_eq!(cause.to_string(), "step ran for 120ms, limit is 100ms");
    }
}
