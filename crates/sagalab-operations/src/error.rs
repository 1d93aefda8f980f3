use std::path::PathBuf;

use sagalab_core::{SagaId, StoreError};
use sagalab_saga::{FailureCause, SagaError};
use thiserror::Error;

/// Details about a failed compensation during saga rollback.
#[derive(Debug)]
pub struct CompensationFailure {
    /// Name of the step whose compensation failed.
    pub step: String,
    pub step_index: usize,
    /// Description of what the compensation was trying to do.
    pub description: String,
    /// The error that occurred during compensation.
    pub error: Box<OperationError>,
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] sagalab_core::CoreError),

    #[error("invalid payload for step '{step}'")]
    InvalidPayload {
        step: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed document stored under '{key}'")]
    MalformedDocument {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("step ran past its deadline: {0}")]
    DeadlineExceeded(String),

    #[error("saga was interrupted: {0}")]
    Interrupted(String),

    #[error("saga definition '{0}' is already registered")]
    DuplicateDefinition(String),

    #[error("unknown saga definition '{0}'")]
    UnknownDefinition(String),

    #[error("unknown saga '{0}'")]
    UnknownSaga(SagaId),

    #[error("worker thread for saga '{0}' panicked")]
    WorkerPanicked(SagaId),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("failed to read config file '{path}'")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}'")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for '{field}': {reason}")]
    ConfigValue { field: &'static str, reason: String },

    #[error("failed to read saga state file '{path}'")]
    SagaStateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write saga state file '{path}'")]
    SagaStateWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse saga state file '{path}'")]
    SagaStateParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize saga state for '{path}'")]
    SagaStateSerialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to persist saga '{saga_id}'")]
    Journal {
        saga_id: SagaId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("saga '{saga_id}' failed at step '{step}' and {} compensation(s) also failed", compensation_failures.len())]
    SagaCompensationFailed {
        saga_id: SagaId,
        step: String,
        source: Box<OperationError>,
        compensation_failures: Vec<CompensationFailure>,
    },

    #[error("saga execution error: {0}")]
    Saga(String),
}

pub type Result<T> = std::result::Result<T, OperationError>;

impl OperationError {
    /// The store failure behind this error, if any.
    #[must_use]
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(error) => Some(error),
            _ => None,
        }
    }
}

impl From<FailureCause<OperationError>> for OperationError {
    fn from(cause: FailureCause<OperationError>) -> Self {
        match cause {
            FailureCause::Step(error) => error,
            FailureCause::Cancelled => Self::Cancelled,
            other @ FailureCause::DeadlineExceeded { .. } => {
                Self::DeadlineExceeded(other.to_string())
            }
            FailureCause::Interrupted { reason } => Self::Interrupted(reason),
        }
    }
}

impl From<SagaError<OperationError>> for OperationError {
    fn from(err: SagaError<OperationError>) -> Self {
        match err {
            SagaError::CompensationFailed {
                saga_id,
                failed_step,
                cause,
                compensation_errors,
            } => {
                let compensation_failures = compensation_errors
                    .into_iter()
                    .map(|e| CompensationFailure {
                        step: e.step,
                        step_index: e.step_index,
                        description: e.description,
                        error: Box::new(e.error),
                    })
                    .collect();
                Self::SagaCompensationFailed {
                    saga_id,
                    step: failed_step,
                    source: Box::new(cause.into()),
                    compensation_failures,
                }
            }
            SagaError::Journal(journal) => Self::Journal {
                saga_id: journal.saga_id,
                source: journal.source,
            },
            other => Self::Saga(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use sagalab_saga::CompensationError;

    use super::*;

    #[test]
    fn store_errors_are_transparent() {
        let err = OperationError::from(StoreError::Conflict {
            key: "inventory:mango".to_string(),
            reason: "insufficient stock".to_string(),
        });

        assert_eq!(err.to_string(), "conflict on 'inventory:mango': insufficient stock");
        assert!(err.store_error().is_some());
    }

    #[test]
    fn compensation_failure_converts_with_all_failures() {
        let saga_error = SagaError::CompensationFailed {
            saga_id: SagaId::from("brave-otter-1"),
            failed_step: "process_payment".to_string(),
            cause: FailureCause::Step(OperationError::Cancelled),
            compensation_errors: vec![CompensationError {
                step: "create_order".to_string(),
                step_index: 1,
                description: "cancel order".to_string(),
                error: OperationError::Cancelled,
            }],
        };

        let err = OperationError::from(saga_error);

        match err {
            OperationError::SagaCompensationFailed {
                saga_id,
                step,
                compensation_failures,
                ..
            } => {
                assert_eq!(saga_id.as_str(), "brave-otter-1");
                assert_eq!(step, "process_payment");
                assert_eq!(compensation_failures.len(), 1);
                assert_eq!(compensation_failures[0].step_index, 1);
            }
            other => panic!("expected SagaCompensationFailed, got {other:?}"),
        }
    }

    #[test]
    fn config_parse_error_names_path() {
        let source = toml::from_str::<toml::Table>("not [valid").expect_err("invalid toml");
        let err = OperationError::ConfigParse {
            path: PathBuf::from("/etc/sagalab.toml"),
            source,
        };

        assert!(err.to_string().contains("/etc/sagalab.toml"));
    }
}
