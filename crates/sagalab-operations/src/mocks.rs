use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use indexmap::IndexMap;
use sagalab_core::{
    Operation, ReadConcern, ReadResult, SagaId, StoreError, Timestamp, WriteAck, WriteConcern,
};
use serde_json::Value;

use crate::Result;
use crate::traits::{ReplicatedStore, SagaStateIO};
use crate::types::SagaSnapshot;

pub struct MockSagaStateIO {
    snapshots: RwLock<IndexMap<SagaId, SagaSnapshot>>,
    saves: Mutex<usize>,
}

impl MockSagaStateIO {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(IndexMap::new()),
            saves: Mutex::new(0),
        }
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn with_snapshot(self, snapshot: SagaSnapshot) -> Self {
        self.snapshots
            .write()
            .expect("lock poisoned")
            .insert(snapshot.execution.saga_id().clone(), snapshot);
        self
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn get(&self, saga_id: &SagaId) -> Option<SagaSnapshot> {
        self.snapshots
            .read()
            .expect("lock poisoned")
            .get(saga_id)
            .cloned()
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn save_count(&self) -> usize {
        *self.saves.lock().expect("lock poisoned")
    }
}

impl Default for MockSagaStateIO {
    fn default() -> Self {
        Self::new()
    }
}

impl SagaStateIO for MockSagaStateIO {
    fn save(&self, snapshot: &SagaSnapshot) -> Result<()> {
        *self.saves.lock().expect("lock poisoned") += 1;
        self.snapshots
            .write()
            .expect("lock poisoned")
            .insert(snapshot.execution.saga_id().clone(), snapshot.clone());
        Ok(())
    }

    fn load(&self, saga_id: &SagaId) -> Result<Option<SagaSnapshot>> {
        Ok(self.get(saga_id))
    }

    fn list(&self) -> Result<Vec<SagaSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect())
    }
}

pub struct FailingSagaStateIO;

impl SagaStateIO for FailingSagaStateIO {
    fn save(&self, snapshot: &SagaSnapshot) -> Result<()> {
        Err(crate::OperationError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("mock write error for {}", snapshot.execution.saga_id()),
        )))
    }

    fn load(&self, _saga_id: &SagaId) -> Result<Option<SagaSnapshot>> {
        Ok(None)
    }

    fn list(&self) -> Result<Vec<SagaSnapshot>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct ScriptState {
    write_failures: VecDeque<StoreError>,
    read_failures: VecDeque<StoreError>,
    values: HashMap<String, (Value, Timestamp)>,
    write_attempts: usize,
    read_attempts: usize,
}

/// Single-node store that replays queued failures before succeeding.
#[derive(Default)]
pub struct ScriptedStore {
    state: Mutex<ScriptState>,
}

impl ScriptedStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn fail_writes(&self, errors: Vec<StoreError>) {
        self.state
            .lock()
            .expect("lock poisoned")
            .write_failures
            .extend(errors);
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn fail_reads(&self, errors: Vec<StoreError>) {
        self.state
            .lock()
            .expect("lock poisoned")
            .read_failures
            .extend(errors);
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn write_attempts(&self) -> usize {
        self.state.lock().expect("lock poisoned").write_attempts
    }

    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn read_attempts(&self) -> usize {
        self.state.lock().expect("lock poisoned").read_attempts
    }
}

impl ReplicatedStore for ScriptedStore {
    fn write(
        &self,
        op: &Operation,
        _concern: WriteConcern,
        _timeout: Duration,
    ) -> std::result::Result<WriteAck, StoreError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.write_attempts += 1;
        if let Some(error) = state.write_failures.pop_front() {
            return Err(error);
        }
        let timestamp = state
            .values
            .get(op.key())
            .map_or(op.timestamp(), |(_, ts)| op.timestamp().max(ts.next()));
        state
            .values
            .insert(op.key().to_string(), (op.payload().clone(), timestamp));
        Ok(WriteAck {
            timestamp,
            acknowledged_by: 1,
        })
    }

    fn read(
        &self,
        op: &Operation,
        _concern: ReadConcern,
        _timeout: Duration,
    ) -> std::result::Result<ReadResult, StoreError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.read_attempts += 1;
        if let Some(error) = state.read_failures.pop_front() {
            return Err(error);
        }
        Ok(state
            .values
            .get(op.key())
            .map_or(ReadResult::NotFound, |(value, timestamp)| ReadResult::Found {
                value: value.clone(),
                timestamp: *timestamp,
            }))
    }
}
