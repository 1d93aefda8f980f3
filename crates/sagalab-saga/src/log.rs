use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use sagalab_core::SagaId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record of a completed forward step and what it takes to undo it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationLogEntry {
    pub saga_id: SagaId,
    pub step_index: usize,
    pub step_name: String,
    /// Input the forward action received.
    pub input: Value,
    pub forward_result: Value,
    pub compensation_description: String,
    /// Set only after the compensation confirmed success.
    pub compensated: bool,
    pub executed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensated_at: Option<DateTime<Utc>>,
    /// Most recent compensation failure, kept for diagnosis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl CompensationLogEntry {
    #[must_use]
    pub fn new(
        saga_id: SagaId,
        step_index: usize,
        step_name: impl Into<String>,
        input: Value,
        forward_result: Value,
        compensation_description: impl Into<String>,
    ) -> Self {
        Self {
            saga_id,
            step_index,
            step_name: step_name.into(),
            input,
            forward_result,
            compensation_description: compensation_description.into(),
            compensated: false,
            executed_at: Utc::now(),
            compensated_at: None,
            last_error: None,
        }
    }
}

/// Append-only log of executed steps, keyed by saga.
///
/// Entries of a running saga are never removed. The only mutations after an
/// append are setting `compensated` (once, after success) and recording
/// compensation errors. A finished saga's entries can be handed off with
/// [`take`](Self::take). Safe to share between concurrently running sagas.
#[derive(Debug, Default)]
pub struct CompensationLog {
    sagas: RwLock<IndexMap<SagaId, Vec<CompensationLogEntry>>>,
}

impl CompensationLog {
    /// Create a new empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Returns false, leaving the log unchanged, when the saga
    /// already has an entry for that step index.
    pub fn append(&self, entry: CompensationLogEntry) -> bool {
        let mut sagas = self.write();
        let entries = sagas.entry(entry.saga_id.clone()).or_default();
        if entries.iter().any(|e| e.step_index == entry.step_index) {
            return false;
        }
        entries.push(entry);
        true
    }

    /// Replace nothing, add what is missing: used when reloading persisted
    /// entries for a saga after a restart.
    pub fn restore(&self, entries: Vec<CompensationLogEntry>) {
        for entry in entries {
            let compensated = entry.compensated;
            let saga_id = entry.saga_id.clone();
            let index = entry.step_index;
            if !self.append(entry) && compensated {
                self.mark_compensated(&saga_id, index);
            }
        }
    }

    /// Flag a step as compensated. Returns false if no such entry exists.
    pub fn mark_compensated(&self, saga_id: &SagaId, step_index: usize) -> bool {
        self.update(saga_id, step_index, |entry| {
            entry.compensated = true;
            entry.compensated_at = Some(Utc::now());
            entry.last_error = None;
        })
    }

    /// Keep the error of a failed compensation; the entry stays uncompensated.
    pub fn record_compensation_failure(
        &self,
        saga_id: &SagaId,
        step_index: usize,
        error: impl Into<String>,
    ) -> bool {
        let error = error.into();
        self.update(saga_id, step_index, move |entry| {
            entry.last_error = Some(error);
        })
    }

    /// Entries of a saga in append order.
    #[must_use]
    pub fn entries(&self, saga_id: &SagaId) -> Vec<CompensationLogEntry> {
        self.read().get(saga_id).cloned().unwrap_or_default()
    }

    /// Entries still awaiting compensation, most recent first.
    #[must_use]
    pub fn pending_compensation(&self, saga_id: &SagaId) -> Vec<CompensationLogEntry> {
        self.read()
            .get(saga_id)
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .filter(|e| !e.compensated)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove and return every entry of a saga that has finished.
    pub fn take(&self, saga_id: &SagaId) -> Vec<CompensationLogEntry> {
        self.write().shift_remove(saga_id).unwrap_or_default()
    }

    /// Sagas with at least one entry, in order of their first append.
    #[must_use]
    pub fn saga_ids(&self) -> Vec<SagaId> {
        self.read().keys().cloned().collect()
    }

    fn update(
        &self,
        saga_id: &SagaId,
        step_index: usize,
        apply: impl FnOnce(&mut CompensationLogEntry),
    ) -> bool {
        let mut sagas = self.write();
        let entry = sagas
            .get_mut(saga_id)
            .and_then(|entries| entries.iter_mut().find(|e| e.step_index == step_index));
        match entry {
            Some(entry) => {
                apply(entry);
                true
            }
            None => false,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<SagaId, Vec<CompensationLogEntry>>> {
        self.sagas.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<SagaId, Vec<CompensationLogEntry>>> {
        self.sagas.write().unwrap_or_else(PoisonError::into_inner)
    }
}
