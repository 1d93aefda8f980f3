use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sagalab_core::{
    Operation, OperationKind, ReadConcern, ReadResult, StoreError, Timestamp, WriteAck,
    WriteConcern,
};
use serde_json::Value;
use tracing::debug;

use crate::traits::ReplicatedStore;

/// Members in a replica set built with [`InMemoryReplicaSet::default`].
pub const DEFAULT_MEMBERS: usize = 3;

const PRIMARY: usize = 0;

/// Failure the simulated store reports when a [`FaultRule`] matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Timeout,
    Unavailable,
    Conflict,
}

/// Scripted failure for operations on matching keys.
///
/// Rules are checked in insertion order and the first match fires. A rule with
/// `apply_first` set lets a write go through before reporting the failure,
/// which models a timeout whose request actually landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRule {
    fault: FaultKind,
    key_prefix: Option<String>,
    operation: Option<OperationKind>,
    skip: usize,
    remaining: Option<usize>,
    apply_first: bool,
}

impl FaultRule {
    /// Fails every operation until narrowed down or removed.
    #[must_use]
    pub fn new(fault: FaultKind) -> Self {
        Self {
            fault,
            key_prefix: None,
            operation: None,
            skip: 0,
            remaining: None,
            apply_first: false,
        }
    }

    #[must_use]
    pub fn on_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn on_writes(mut self) -> Self {
        self.operation = Some(OperationKind::Write);
        self
    }

    #[must_use]
    pub fn on_reads(mut self) -> Self {
        self.operation = Some(OperationKind::Read);
        self
    }

    /// Let the first `count` matching operations through untouched.
    #[must_use]
    pub fn skip(mut self, count: usize) -> Self {
        self.skip = count;
        self
    }

    /// Fire at most `count` times, then drop the rule.
    #[must_use]
    pub fn times(mut self, count: usize) -> Self {
        self.remaining = Some(count);
        self
    }

    /// Apply the write before reporting the failure.
    #[must_use]
    pub fn after_apply(mut self) -> Self {
        self.apply_first = true;
        self
    }

    fn matches(&self, key: &str, kind: OperationKind) -> bool {
        self.operation.is_none_or(|op| op == kind)
            && self
                .key_prefix
                .as_deref()
                .is_none_or(|prefix| key.starts_with(prefix))
    }

    fn error(&self, key: &str, timeout: Duration, reachable: usize, required: usize) -> StoreError {
        match self.fault {
            FaultKind::Timeout => StoreError::Timeout {
                key: key.to_string(),
                elapsed_ms: millis(timeout),
            },
            FaultKind::Unavailable => StoreError::Unavailable {
                key: key.to_string(),
                reachable,
                required,
            },
            FaultKind::Conflict => StoreError::Conflict {
                key: key.to_string(),
                reason: "injected conflict".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct OplogEntry {
    key: String,
    value: Value,
    timestamp: Timestamp,
}

#[derive(Debug)]
struct ReplicaState {
    oplog: Vec<OplogEntry>,
    /// Number of oplog entries each member has applied.
    applied: Vec<usize>,
    running: Vec<bool>,
    read_target: usize,
    idempotent_writes: HashMap<String, WriteAck>,
    faults: Vec<FaultRule>,
    latency: Duration,
}

impl ReplicaState {
    fn reachable(&self) -> usize {
        self.running.iter().filter(|r| **r).count()
    }

    fn version_at(&self, key: &str, upto: usize) -> Option<&OplogEntry> {
        self.oplog[..upto].iter().rev().find(|e| e.key == key)
    }

    /// Highest oplog position applied by a majority of members.
    fn commit_index(&self) -> usize {
        let mut applied = self.applied.clone();
        applied.sort_unstable_by(|a, b| b.cmp(a));
        let majority = applied.len() / 2 + 1;
        applied[majority - 1]
    }

    fn take_fault(&mut self, key: &str, kind: OperationKind) -> Option<FaultRule> {
        let index = self.faults.iter().position(|rule| rule.matches(key, kind))?;
        if self.faults[index].skip > 0 {
            self.faults[index].skip -= 1;
            return None;
        }
        let rule = self.faults[index].clone();
        match &mut self.faults[index].remaining {
            Some(remaining) if *remaining <= 1 => {
                self.faults.remove(index);
            }
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        Some(rule)
    }
}

/// Replica set simulated in memory: one primary (member 0) and secondaries
/// that replicate an oplog.
///
/// Acknowledging members are caught up synchronously when a write is
/// accepted; the others lag until [`replicate`](Self::replicate). Members can
/// be stopped and started to reproduce node failures, and [`FaultRule`]s
/// script timeouts, unavailability and conflicts.
#[derive(Debug)]
pub struct InMemoryReplicaSet {
    members: usize,
    state: Mutex<ReplicaState>,
}

impl InMemoryReplicaSet {
    /// A set with `members` nodes; zero is treated as one.
    #[must_use]
    pub fn new(members: usize) -> Self {
        let members = members.max(1);
        Self {
            members,
            state: Mutex::new(ReplicaState {
                oplog: Vec::new(),
                applied: vec![0; members],
                running: vec![true; members],
                read_target: PRIMARY,
                idempotent_writes: HashMap::new(),
                faults: Vec::new(),
                latency: Duration::ZERO,
            }),
        }
    }

    #[must_use]
    pub fn members(&self) -> usize {
        self.members
    }

    /// Returns false for an unknown member.
    pub fn stop_member(&self, member: usize) -> bool {
        self.set_running(member, false)
    }

    /// A restarted member keeps what it had applied and lags until the next
    /// [`replicate`](Self::replicate).
    pub fn start_member(&self, member: usize) -> bool {
        self.set_running(member, true)
    }

    /// Member that serves `local` reads.
    pub fn set_read_target(&self, member: usize) -> bool {
        if member >= self.members {
            return false;
        }
        self.lock().read_target = member;
        true
    }

    /// Simulated round-trip time; requests exceeding their timeout fail with
    /// `Timeout` and are not applied.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Bring every running member up to date with the primary.
    pub fn replicate(&self) {
        let mut state = self.lock();
        let len = state.oplog.len();
        for member in 0..self.members {
            if state.running[member] {
                state.applied[member] = len;
            }
        }
        debug!(oplog = len, "replicated to running members");
    }

    /// Oplog entries each member is behind the primary, indexed by member.
    #[must_use]
    pub fn replication_lag(&self) -> Vec<usize> {
        let state = self.lock();
        let len = state.oplog.len();
        state.applied.iter().map(|applied| len - applied).collect()
    }

    pub fn inject_fault(&self, rule: FaultRule) {
        self.lock().faults.push(rule);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Write `value` to every running member, bypassing concerns and faults.
    pub fn seed(&self, key: &str, value: Value) -> Timestamp {
        let mut state = self.lock();
        let len = state.oplog.len();
        let timestamp = state
            .version_at(key, len)
            .map_or(Timestamp::new(1), |e| e.timestamp.next());
        state.oplog.push(OplogEntry {
            key: key.to_string(),
            value,
            timestamp,
        });
        let len = state.oplog.len();
        for member in 0..self.members {
            if state.running[member] {
                state.applied[member] = len;
            }
        }
        timestamp
    }

    /// Latest version of `key` on the primary.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<(Value, Timestamp)> {
        let state = self.lock();
        state
            .version_at(key, state.applied[PRIMARY])
            .map(|e| (e.value.clone(), e.timestamp))
    }

    /// Every key's latest value on the primary.
    #[must_use]
    pub fn contents(&self) -> BTreeMap<String, Value> {
        let state = self.lock();
        let upto = state.applied[PRIMARY];
        let mut contents = BTreeMap::new();
        for entry in &state.oplog[..upto] {
            contents.insert(entry.key.clone(), entry.value.clone());
        }
        contents
    }

    fn set_running(&self, member: usize, running: bool) -> bool {
        if member >= self.members {
            return false;
        }
        self.lock().running[member] = running;
        debug!(member, running, "member state changed");
        true
    }

    fn lock(&self) -> MutexGuard<'_, ReplicaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn simulate_latency(&self, key: &str, timeout: Duration) -> Result<(), StoreError> {
        let latency = self.lock().latency;
        if latency.is_zero() {
            return Ok(());
        }
        if latency > timeout {
            std::thread::sleep(timeout);
            return Err(StoreError::Timeout {
                key: key.to_string(),
                elapsed_ms: millis(timeout),
            });
        }
        std::thread::sleep(latency);
        Ok(())
    }
}

impl Default for InMemoryReplicaSet {
    fn default() -> Self {
        Self::new(DEFAULT_MEMBERS)
    }
}

impl ReplicatedStore for InMemoryReplicaSet {
    fn write(
        &self,
        op: &Operation,
        concern: WriteConcern,
        timeout: Duration,
    ) -> Result<WriteAck, StoreError> {
        self.simulate_latency(op.key(), timeout)?;

        let mut state = self.lock();
        let key = op.key();

        if let Some(ack) = op
            .idempotency_key()
            .and_then(|k| state.idempotent_writes.get(k))
        {
            debug!(key, idempotency_key = op.idempotency_key(), "duplicate write acknowledged");
            return Ok(*ack);
        }

        let required = concern.required_acks(self.members);
        let reachable = state.reachable();
        let fault = state.take_fault(key, OperationKind::Write);
        if let Some(rule) = fault.as_ref().filter(|rule| !rule.apply_first) {
            return Err(rule.error(key, timeout, reachable, required));
        }

        if !state.running[PRIMARY] || reachable < required {
            return Err(StoreError::Unavailable {
                key: key.to_string(),
                reachable,
                required,
            });
        }

        let len = state.oplog.len();
        let current = state.version_at(key, len).map(|e| e.timestamp);
        if let Some(expected) = op.expected_timestamp() {
            let found = current.unwrap_or(Timestamp::ZERO);
            if expected != found {
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                    reason: format!("expected version {expected}, found {found}"),
                });
            }
        }

        let timestamp = current.map_or(op.timestamp(), |ts| op.timestamp().max(ts.next()));
        let timestamp = timestamp.max(Timestamp::new(1));
        state.oplog.push(OplogEntry {
            key: key.to_string(),
            value: op.payload().clone(),
            timestamp,
        });
        let len = state.oplog.len();
        state.applied[PRIMARY] = len;

        let mut acknowledged_by = 1;
        for member in 1..self.members {
            if acknowledged_by >= required {
                break;
            }
            if state.running[member] {
                state.applied[member] = len;
                acknowledged_by += 1;
            }
        }

        let ack = WriteAck {
            timestamp,
            acknowledged_by,
        };
        if let Some(idempotency_key) = op.idempotency_key() {
            state
                .idempotent_writes
                .insert(idempotency_key.to_string(), ack);
        }
        debug!(key, %timestamp, %concern, acknowledged_by, "write applied");

        match fault {
            Some(rule) => Err(rule.error(key, timeout, reachable, required)),
            None => Ok(ack),
        }
    }

    fn read(
        &self,
        op: &Operation,
        concern: ReadConcern,
        timeout: Duration,
    ) -> Result<ReadResult, StoreError> {
        self.simulate_latency(op.key(), timeout)?;

        let mut state = self.lock();
        let key = op.key();
        let reachable = state.reachable();
        let majority = self.members / 2 + 1;

        if let Some(rule) = state.take_fault(key, OperationKind::Read) {
            return Err(rule.error(key, timeout, reachable, majority));
        }

        let upto = match concern {
            ReadConcern::Local => {
                let member = state.read_target;
                if !state.running[member] {
                    return Err(StoreError::Unavailable {
                        key: key.to_string(),
                        reachable,
                        required: 1,
                    });
                }
                state.applied[member]
            }
            ReadConcern::Majority => {
                if reachable == 0 {
                    return Err(StoreError::Unavailable {
                        key: key.to_string(),
                        reachable,
                        required: 1,
                    });
                }
                state.commit_index()
            }
            ReadConcern::Linearizable => {
                if !state.running[PRIMARY] || reachable < majority {
                    return Err(StoreError::Unavailable {
                        key: key.to_string(),
                        reachable,
                        required: majority,
                    });
                }
                state.applied[PRIMARY]
            }
        };

        let result = match state.version_at(key, upto) {
            Some(entry) => ReadResult::Found {
                value: entry.value.clone(),
                timestamp: entry.timestamp,
            },
            None => ReadResult::NotFound,
        };
        debug!(key, %concern, found = result.is_found(), "read served");
        Ok(result)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
