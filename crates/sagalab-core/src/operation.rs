use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ActorId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Write,
    Read,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write => f.write_str("write"),
            Self::Read => f.write_str("read"),
        }
    }
}

/// A single stamped request against the replicated store.
///
/// Operations are immutable once built; the executor creates one per dispatch
/// with a freshly ticked timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    actor: ActorId,
    timestamp: Timestamp,
    key: String,
    payload: Value,
    kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expected_timestamp: Option<Timestamp>,
}

impl Operation {
    #[must_use]
    pub fn write(
        actor: ActorId,
        timestamp: Timestamp,
        key: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            actor,
            timestamp,
            key: key.into(),
            payload,
            kind: OperationKind::Write,
            idempotency_key: None,
            expected_timestamp: None,
        }
    }

    #[must_use]
    pub fn read(actor: ActorId, timestamp: Timestamp, key: impl Into<String>) -> Self {
        Self {
            actor,
            timestamp,
            key: key.into(),
            payload: Value::Null,
            kind: OperationKind::Read,
            idempotency_key: None,
            expected_timestamp: None,
        }
    }

    /// Marks the operation as safe to repeat; the store deduplicates on this key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    /// Optimistic precondition: the key's current version must carry this timestamp.
    /// `Timestamp::ZERO` requires the key to be absent.
    #[must_use]
    pub fn with_expected_timestamp(mut self, expected: Option<Timestamp>) -> Self {
        self.expected_timestamp = expected;
        self
    }

    #[must_use]
    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        self.idempotency_key.is_some()
    }

    #[must_use]
    pub fn expected_timestamp(&self) -> Option<Timestamp> {
        self.expected_timestamp
    }
}
