use std::fmt;

use chrono::{DateTime, Utc};
use sagalab_core::SagaId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::log::CompensationLogEntry;

/// Lifecycle of one saga invocation.
///
/// `Pending → Running → {Completed, Compensating} → {Compensated, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Pending,
    Running,
    Completed,
    Compensating,
    /// Rolled back cleanly after a failure.
    Compensated,
    /// A compensation failed; operator action required.
    Failed,
}

impl SagaStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Failed)
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedStep {
    pub index: usize,
    pub name: String,
    pub result: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The step's forward action returned an error.
    StepError,
    /// Cancellation was requested while the saga was running.
    Cancelled,
    /// The step ran longer than the configured step timeout.
    DeadlineExceeded,
    /// The saga was interrupted and could not safely resume forward.
    Interrupted,
}

/// Why a saga left `Running` for `Compensating`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step_index: usize,
    pub step_name: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Snapshot of a saga invocation. Only the coordinator mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaExecution {
    saga_id: SagaId,
    definition_id: String,
    status: SagaStatus,
    initial_payload: Value,
    executed_steps: Vec<ExecutedStep>,
    current_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<StepFailure>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SagaExecution {
    #[must_use]
    pub fn new(saga_id: SagaId, definition_id: impl Into<String>, initial_payload: Value) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            definition_id: definition_id.into(),
            status: SagaStatus::Pending,
            initial_payload,
            executed_steps: Vec::new(),
            current_index: 0,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn saga_id(&self) -> &SagaId {
        &self.saga_id
    }

    #[must_use]
    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }

    #[must_use]
    pub fn status(&self) -> SagaStatus {
        self.status
    }

    #[must_use]
    pub fn initial_payload(&self) -> &Value {
        &self.initial_payload
    }

    #[must_use]
    pub fn executed_steps(&self) -> &[ExecutedStep] {
        &self.executed_steps
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn failure(&self) -> Option<&StepFailure> {
        self.failure.as_ref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Input for the step at `current_index`: the previous result, or the
    /// initial payload before any step ran.
    #[must_use]
    pub fn next_input(&self) -> Value {
        self.executed_steps
            .last()
            .map_or_else(|| self.initial_payload.clone(), |s| s.result.clone())
    }

    pub(crate) fn transition(&mut self, to: SagaStatus) -> Result<(), SagaStatus> {
        use SagaStatus::{Compensated, Compensating, Completed, Failed, Pending, Running};

        let allowed = matches!(
            (self.status, to),
            (Pending, Running)
                | (Running, Completed | Compensating)
                | (Compensating, Compensated | Failed)
        );
        if !allowed {
            return Err(self.status);
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    /// Advances `current_index`; only valid for the step at that index.
    pub(crate) fn record_step(&mut self, index: usize, name: &str, result: Value) -> bool {
        if self.status != SagaStatus::Running || index != self.current_index {
            return false;
        }
        self.executed_steps.push(ExecutedStep {
            index,
            name: name.to_string(),
            result,
        });
        self.current_index += 1;
        self.touch();
        true
    }

    pub(crate) fn set_failure(&mut self, failure: StepFailure) {
        self.failure = Some(failure);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// One line per step with a status marker:
    /// ✓ executed, ✗ failed, ↩ compensated, ⚠ compensation failed.
    #[must_use]
    pub fn summary(&self, entries: &[CompensationLogEntry]) -> String {
        let mut lines: Vec<String> = entries
            .iter()
            .map(|entry| {
                let marker = if entry.compensated {
                    "↩"
                } else if entry.last_error.is_some() {
                    "⚠"
                } else {
                    "✓"
                };
                format!("{marker} {}", entry.step_name)
            })
            .collect();

        if let Some(failure) = &self.failure {
            let already_listed = entries.iter().any(|e| e.step_index == failure.step_index);
            if !already_listed {
                lines.push(format!("✗ {}", failure.step_name));
            }
        }
        lines.join("\n")
    }
}
