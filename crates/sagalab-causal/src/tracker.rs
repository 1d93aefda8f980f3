use std::collections::{BTreeSet, VecDeque};
use std::sync::mpsc::Receiver;
use std::sync::{Mutex, PoisonError};

use indexmap::IndexMap;
use sagalab_core::{ActorId, SagaId, SessionId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::feed::AnomalyFeed;
use crate::session::Session;

/// Versions retained per key when no depth is configured.
pub const DEFAULT_HISTORY_DEPTH: usize = 16;

/// Violations retained when no limit is configured.
pub const DEFAULT_MAX_VIOLATIONS: usize = 1024;

/// One logical write as reported by the executor after the store accepted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRecord {
    pub key: String,
    pub value: Value,
    pub timestamp: Timestamp,
    pub writer: ActorId,
    /// Versions the writing session had observed when it issued the write.
    pub causal_dependencies: BTreeSet<Timestamp>,
}

/// What a session saw when it read a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadObservation {
    pub key: String,
    pub session: SessionId,
    /// `Timestamp::ZERO` when the store reported the key absent.
    pub observed_timestamp: Timestamp,
    pub reader_prior_max: Timestamp,
    pub found: bool,
    /// The observed version is older than the newest write the tracker knows of.
    pub stale: bool,
}

/// A read that went backwards relative to the session's own history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalViolation {
    /// Position in the tracker's violation sequence, starting at 1.
    pub sequence: u64,
    pub key: String,
    pub expected_min_timestamp: Timestamp,
    pub observed_timestamp: Timestamp,
    pub session: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saga: Option<SagaId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub observation: ReadObservation,
    /// The tracked write matching the observed version, if still in history.
    pub record: Option<WriteRecord>,
    pub violation: Option<CausalViolation>,
}

impl ReadOutcome {
    #[must_use]
    pub fn is_found(&self) -> bool {
        self.observation.found
    }
}

/// A write whose recorded dependency does not precede it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsatisfiedDependency {
    pub write: Timestamp,
    pub dependency: Timestamp,
}

#[derive(Debug, Default)]
struct TrackerState {
    keys: IndexMap<String, VecDeque<WriteRecord>>,
    violations: VecDeque<CausalViolation>,
    /// Violations ever detected, including those no longer retained.
    detected: u64,
}

/// Per-key write history plus read regression detection.
#[derive(Debug)]
pub struct CausalTracker {
    history_depth: usize,
    max_violations: usize,
    state: Mutex<TrackerState>,
    feed: AnomalyFeed<CausalViolation>,
}

impl CausalTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_depth(DEFAULT_HISTORY_DEPTH)
    }

    /// A depth of zero is treated as one; the latest version is always kept.
    #[must_use]
    pub fn with_history_depth(depth: usize) -> Self {
        Self {
            history_depth: depth.max(1),
            max_violations: DEFAULT_MAX_VIOLATIONS,
            state: Mutex::new(TrackerState::default()),
            feed: AnomalyFeed::new(),
        }
    }

    /// Keep only the newest `max` violations; at least one is kept.
    #[must_use]
    pub fn with_max_violations(mut self, max: usize) -> Self {
        self.max_violations = max.max(1);
        self
    }

    #[must_use]
    pub fn history_depth(&self) -> usize {
        self.history_depth
    }

    #[must_use]
    pub fn max_violations(&self) -> usize {
        self.max_violations
    }

    /// Store a write, superseding the key's previous version.
    ///
    /// Reports may arrive out of timestamp order from concurrent writers; the
    /// history stays sorted by timestamp and a repeated timestamp is ignored.
    pub fn record_write(
        &self,
        key: &str,
        value: Value,
        timestamp: Timestamp,
        writer: &ActorId,
        dependencies: BTreeSet<Timestamp>,
    ) -> WriteRecord {
        let record = WriteRecord {
            key: key.to_string(),
            value,
            timestamp,
            writer: writer.clone(),
            causal_dependencies: dependencies,
        };

        let mut state = self.lock();
        let history = state.keys.entry(key.to_string()).or_default();
        if history.iter().any(|r| r.timestamp == timestamp) {
            debug!(key, %timestamp, "duplicate write report ignored");
            return record;
        }

        let position = history
            .iter()
            .rposition(|r| r.timestamp < timestamp)
            .map_or(0, |i| i + 1);
        history.insert(position, record.clone());
        while history.len() > self.history_depth {
            history.pop_front();
        }

        debug!(key, %timestamp, writer = %writer, "recorded write");
        record
    }

    /// Account for a read whose result the store reported at `observed`
    /// (`None` when the key was absent).
    ///
    /// The observed version is compared with the session's prior max before the
    /// prior max is raised.
    pub fn record_read(
        &self,
        session: &mut Session,
        key: &str,
        observed: Option<Timestamp>,
    ) -> ReadOutcome {
        let prior = session.prior_max(key);
        let observed_timestamp = observed.unwrap_or(Timestamp::ZERO);

        let mut state = self.lock();
        let (record, latest) = match state.keys.get(key) {
            Some(history) => (
                observed.and_then(|ts| history.iter().find(|r| r.timestamp == ts).cloned()),
                history.back().map(|r| r.timestamp),
            ),
            None => (None, None),
        };

        let observation = ReadObservation {
            key: key.to_string(),
            session: session.id().clone(),
            observed_timestamp,
            reader_prior_max: prior,
            found: observed.is_some(),
            stale: latest.is_some_and(|latest| observed_timestamp < latest),
        };

        let violation = if observed_timestamp < prior {
            state.detected += 1;
            let violation = CausalViolation {
                sequence: state.detected,
                key: key.to_string(),
                expected_min_timestamp: prior,
                observed_timestamp,
                session: session.id().clone(),
                saga: session.saga().cloned(),
            };
            warn!(
                key,
                session = %violation.session,
                expected_min = %prior,
                observed = %observed_timestamp,
                "causal violation: read regressed behind session history"
            );
            state.violations.push_back(violation.clone());
            while state.violations.len() > self.max_violations {
                state.violations.pop_front();
            }
            Some(violation)
        } else {
            None
        };
        drop(state);

        if let Some(violation) = &violation {
            self.feed.publish(violation);
        }
        session.observe(key, observed_timestamp);

        ReadOutcome {
            observation,
            record,
            violation,
        }
    }

    /// Newest tracked version of `key`.
    #[must_use]
    pub fn latest(&self, key: &str) -> Option<WriteRecord> {
        self.lock().keys.get(key).and_then(|h| h.back().cloned())
    }

    /// Retained versions of `key`, oldest first.
    #[must_use]
    pub fn history(&self, key: &str) -> Vec<WriteRecord> {
        self.lock()
            .keys
            .get(key)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys in the order they were first written.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys.keys().cloned().collect()
    }

    /// Dependencies of retained versions of `key` that do not strictly precede
    /// the write carrying them. Empty when the history is causally ordered.
    #[must_use]
    pub fn unsatisfied_dependencies(&self, key: &str) -> Vec<UnsatisfiedDependency> {
        let state = self.lock();
        let Some(history) = state.keys.get(key) else {
            return Vec::new();
        };
        history
            .iter()
            .flat_map(|record| {
                record
                    .causal_dependencies
                    .iter()
                    .filter(|dep| **dep >= record.timestamp)
                    .map(|dep| UnsatisfiedDependency {
                        write: record.timestamp,
                        dependency: *dep,
                    })
            })
            .collect()
    }

    /// True when every retained version of `key` only depends on earlier ones.
    #[must_use]
    pub fn dependencies_satisfied(&self, key: &str) -> bool {
        self.unsatisfied_dependencies(key).is_empty()
    }

    /// Retained violations, in detection order.
    #[must_use]
    pub fn violations(&self) -> Vec<CausalViolation> {
        self.lock().violations.iter().cloned().collect()
    }

    /// Number of violations detected, retained or not.
    #[must_use]
    pub fn violation_count(&self) -> u64 {
        self.lock().detected
    }

    #[must_use]
    pub fn violations_for_saga(&self, saga: &SagaId) -> Vec<CausalViolation> {
        self.lock()
            .violations
            .iter()
            .filter(|v| v.saga.as_ref() == Some(saga))
            .cloned()
            .collect()
    }

    /// Receive violations as they are detected.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<CausalViolation> {
        self.feed.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CausalTracker {
    fn default() -> Self {
        Self::new()
    }
}
