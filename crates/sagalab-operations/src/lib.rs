//! Saga orchestration over a replicated key-value store.
//!
//! [`orchestrator::SagaOrchestrator`] runs saga definitions against any
//! [`traits::ReplicatedStore`]. Every store call a step makes goes through the
//! [`executor::StepExecutor`], which stamps it with the saga's logical clock,
//! retries ambiguous timeouts of idempotent writes and reports reads and
//! writes to the causal tracker.

pub mod config;
pub mod context;
mod error;
pub mod executor;
pub mod orchestrator;
pub mod order_saga;
pub mod providers;
pub mod report;
pub mod traits;
pub mod types;

#[cfg(test)]
pub mod mocks;

pub use error::{CompensationFailure, OperationError, Result};
