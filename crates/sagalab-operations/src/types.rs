use sagalab_causal::Session;
use sagalab_core::Timestamp;
use sagalab_saga::{CompensationLogEntry, SagaExecution};
use serde::{Deserialize, Serialize};

/// Persisted form of one saga: its execution state, compensation log and
/// the causal state of its actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaSnapshot {
    pub execution: SagaExecution,
    #[serde(default)]
    pub entries: Vec<CompensationLogEntry>,
    /// Last value of the saga's logical clock.
    #[serde(default)]
    pub clock: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

impl SagaSnapshot {
    #[must_use]
    pub fn new(execution: SagaExecution, entries: Vec<CompensationLogEntry>) -> Self {
        Self {
            execution,
            entries,
            clock: Timestamp::ZERO,
            session: None,
        }
    }

    #[must_use]
    pub fn with_causal_state(mut self, clock: Timestamp, session: Session) -> Self {
        self.clock = clock;
        self.session = Some(session);
        self
    }
}
