use sagalab_causal::CausalViolation;
use sagalab_core::SagaId;
use sagalab_saga::{CompensationLogEntry, ExecutedStep, SagaExecution, SagaStatus, StepFailure};
use serde::{Deserialize, Serialize};

/// Point-in-time view of one saga, as returned by `query`, `wait` and `run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaReport {
    pub execution: SagaExecution,
    pub entries: Vec<CompensationLogEntry>,
    /// Causal anomalies observed by this saga's session.
    #[serde(default)]
    pub violations: Vec<CausalViolation>,
    /// Last error surfaced by the saga's worker, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SagaReport {
    #[must_use]
    pub fn saga_id(&self) -> &SagaId {
        self.execution.saga_id()
    }

    #[must_use]
    pub fn definition_id(&self) -> &str {
        self.execution.definition_id()
    }

    #[must_use]
    pub fn status(&self) -> SagaStatus {
        self.execution.status()
    }

    #[must_use]
    pub fn executed_steps(&self) -> &[ExecutedStep] {
        self.execution.executed_steps()
    }

    #[must_use]
    pub fn failure(&self) -> Option<&StepFailure> {
        self.execution.failure()
    }

    #[must_use]
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Logged steps whose effects are still in place, most recent first.
    ///
    /// Empty for a `Compensated` saga; for a `Failed` one these are exactly the
    /// steps an operator has to undo by hand.
    #[must_use]
    pub fn uncompensated_steps(&self) -> Vec<&CompensationLogEntry> {
        if self.status() == SagaStatus::Completed {
            return Vec::new();
        }
        self.entries.iter().rev().filter(|e| !e.compensated).collect()
    }

    /// One line per step with a status marker.
    #[must_use]
    pub fn summary(&self) -> String {
        self.execution.summary(&self.entries)
    }
}
