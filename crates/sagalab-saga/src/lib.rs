//! Saga pattern for multi-step operations against independently committing
//! resources.
//!
//! A [`SagaDefinition`] is a fixed, ordered list of steps. The
//! [`SagaCoordinator`] runs them strictly in order; each step's output becomes
//! the next step's input. Every completed step is appended to the
//! [`CompensationLog`] before anything else happens, and on failure the log is
//! unwound in reverse, invoking each step's compensation with its original
//! input and forward result.

mod builder;
mod cancel;
mod coordinator;
mod definition;
mod error;
mod execution;
mod journal;
mod log;
mod step;

pub use builder::{Empty, HasSteps, SagaBuilder};
pub use cancel::CancellationToken;
pub use coordinator::{RunOptions, SagaCoordinator, SagaOutcome};
pub use definition::SagaDefinition;
pub use error::{CompensationError, FailureCause, SagaError};
pub use execution::{ExecutedStep, FailureKind, SagaExecution, SagaStatus, StepFailure};
pub use journal::{JournalError, NoopJournal, SagaJournal};
pub use log::{CompensationLog, CompensationLogEntry};
pub use step::{SagaStep, StepInvocation, StepPhase, StepSpec};
