use std::sync::Arc;
use std::time::Duration;

use sagalab_causal::{CausalTracker, CausalViolation, LogicalClock, Session};
use sagalab_core::{
    ConsistencyLevel, Operation, OperationKind, ReadConcern, ReadResult, StoreError,
    StoreErrorKind, Timestamp, WriteAck, WriteConcern,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::traits::ReplicatedStore;

/// Bounded exponential backoff for transient store failures.
///
/// Only `Timeout` is retried, and only for operations carrying an idempotency
/// key; a timed-out request may have been applied, so repeating it is safe
/// only when the store can deduplicate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: u32,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: u32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            multiplier: multiplier.max(1),
        }
    }

    /// A single attempt, never retried.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 1)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a failed `attempt` (1-based) should be followed by another.
    #[must_use]
    pub fn should_retry(&self, error: &StoreError, idempotent: bool, attempt: u32) -> bool {
        idempotent && error.kind() == StoreErrorKind::Timeout && attempt < self.max_attempts
    }

    /// Pause after failed `attempt` (1-based): `initial * multiplier^(attempt-1)`,
    /// capped at the maximum.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts(),
            config.initial_backoff(),
            config.max_backoff(),
            config.multiplier(),
        )
    }
}

/// One store call as a step describes it, before stamping.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRequest {
    key: String,
    payload: Value,
    level: ConsistencyLevel,
    idempotency_key: Option<String>,
    expected_timestamp: Option<Timestamp>,
}

impl StoreRequest {
    #[must_use]
    pub fn write(key: impl Into<String>, payload: Value, concern: WriteConcern) -> Self {
        Self {
            key: key.into(),
            payload,
            level: ConsistencyLevel::Write(concern),
            idempotency_key: None,
            expected_timestamp: None,
        }
    }

    #[must_use]
    pub fn read(key: impl Into<String>, concern: ReadConcern) -> Self {
        Self {
            key: key.into(),
            payload: Value::Null,
            level: ConsistencyLevel::Read(concern),
            idempotency_key: None,
            expected_timestamp: None,
        }
    }

    #[must_use]
    pub fn idempotent(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    /// Only apply the write if the key's current version has this timestamp.
    #[must_use]
    pub fn expecting(mut self, timestamp: Option<Timestamp>) -> Self {
        self.expected_timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn level(&self) -> ConsistencyLevel {
        self.level
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self.level {
            ConsistencyLevel::Write(_) => OperationKind::Write,
            ConsistencyLevel::Read(_) => OperationKind::Read,
        }
    }

    fn stamp(&self, clock: &LogicalClock) -> Operation {
        let timestamp = clock.tick();
        let op = match self.level {
            ConsistencyLevel::Write(_) => Operation::write(
                clock.actor().clone(),
                timestamp,
                self.key.clone(),
                self.payload.clone(),
            ),
            ConsistencyLevel::Read(_) => {
                Operation::read(clock.actor().clone(), timestamp, self.key.clone())
            }
        };
        op.with_idempotency_key(self.idempotency_key.clone())
            .with_expected_timestamp(self.expected_timestamp)
    }
}

/// Result of a successful store call.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    Written {
        ack: WriteAck,
    },
    Read {
        result: ReadResult,
        /// Set when this read went backwards relative to the session.
        violation: Option<CausalViolation>,
    },
}

impl StoreOutcome {
    /// Version timestamp written or observed; `None` for an absent key.
    #[must_use]
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Written { ack } => Some(ack.timestamp),
            Self::Read { result, .. } => result.timestamp(),
        }
    }

    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Written { .. } => None,
            Self::Read { result, .. } => result.value(),
        }
    }

    #[must_use]
    pub fn violation(&self) -> Option<&CausalViolation> {
        match self {
            Self::Read { violation, .. } => violation.as_ref(),
            Self::Written { .. } => None,
        }
    }
}

/// Issues store calls on behalf of steps.
///
/// Every dispatch is stamped from the caller's clock, the store's version
/// timestamp is merged back into it, and the accepted write or observed read
/// is reported to the [`CausalTracker`].
pub struct StepExecutor {
    store: Arc<dyn ReplicatedStore>,
    tracker: Arc<CausalTracker>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl StepExecutor {
    #[must_use]
    pub fn new(store: Arc<dyn ReplicatedStore>, tracker: Arc<CausalTracker>) -> Self {
        Self {
            store,
            tracker,
            retry: RetryPolicy::default(),
            timeout: Duration::from_millis(5000),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Timeout handed to every store call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<CausalTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Dispatch `request`, retrying under the policy.
    ///
    /// # Errors
    ///
    /// Returns the store's error once retries are exhausted or the error is not
    /// retryable.
    pub fn execute(
        &self,
        clock: &LogicalClock,
        session: &mut Session,
        request: &StoreRequest,
    ) -> Result<StoreOutcome, StoreError> {
        match request.level() {
            ConsistencyLevel::Write(concern) => {
                let (op, ack) = self.attempt(clock, request, |op| {
                    self.store.write(op, concern, self.timeout)
                })?;
                Ok(self.accept_write(clock, session, &op, ack))
            }
            ConsistencyLevel::Read(concern) => {
                let (op, result) = self.attempt(clock, request, |op| {
                    self.store.read(op, concern, self.timeout)
                })?;
                Ok(self.accept_read(clock, session, &op, result))
            }
        }
    }

    fn attempt<T>(
        &self,
        clock: &LogicalClock,
        request: &StoreRequest,
        call: impl Fn(&Operation) -> Result<T, StoreError>,
    ) -> Result<(Operation, T), StoreError> {
        let mut attempt = 1;
        loop {
            let op = request.stamp(clock);
            debug!(
                key = request.key(),
                actor = %clock.actor(),
                timestamp = %op.timestamp(),
                level = %request.level(),
                attempt,
                "dispatching store operation"
            );

            match call(&op) {
                Ok(value) => return Ok((op, value)),
                Err(error) if self.retry.should_retry(&error, op.is_idempotent(), attempt) => {
                    let pause = self.retry.backoff(attempt);
                    warn!(
                        key = request.key(),
                        attempt,
                        backoff_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "retrying store operation"
                    );
                    std::thread::sleep(pause);
                    attempt += 1;
                }
                Err(error) => {
                    debug!(key = request.key(), error = %error, "store operation failed");
                    return Err(error);
                }
            }
        }
    }

    fn accept_write(
        &self,
        clock: &LogicalClock,
        session: &mut Session,
        op: &Operation,
        ack: WriteAck,
    ) -> StoreOutcome {
        clock.merge(ack.timestamp);
        self.tracker.record_write(
            op.key(),
            op.payload().clone(),
            ack.timestamp,
            op.actor(),
            session.dependencies(),
        );
        session.observe(op.key(), ack.timestamp);
        StoreOutcome::Written { ack }
    }

    fn accept_read(
        &self,
        clock: &LogicalClock,
        session: &mut Session,
        op: &Operation,
        result: ReadResult,
    ) -> StoreOutcome {
        if let Some(timestamp) = result.timestamp() {
            clock.merge(timestamp);
        }
        let outcome = self.tracker.record_read(session, op.key(), result.timestamp());
        StoreOutcome::Read {
            result,
            violation: outcome.violation,
        }
    }
}
