use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::CoreError;
use crate::ids::Timestamp;

/// Acknowledgement of an accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    /// Version timestamp the store assigned to the write.
    pub timestamp: Timestamp,
    /// Members that had applied the write when it was acknowledged.
    pub acknowledged_by: usize,
}

/// Result of a read that reached the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReadResult {
    Found { value: Value, timestamp: Timestamp },
    NotFound,
}

impl ReadResult {
    #[must_use]
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Found { timestamp, .. } => Some(*timestamp),
            Self::NotFound => None,
        }
    }

    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Found { value, .. } => Some(value),
            Self::NotFound => None,
        }
    }

    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }
}

/// Failure reported by the replicated store.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreError {
    #[error("operation on '{key}' timed out after {elapsed_ms}ms")]
    Timeout { key: String, elapsed_ms: u64 },

    #[error("no quorum for '{key}': {reachable} member(s) reachable, {required} required")]
    Unavailable {
        key: String,
        reachable: usize,
        required: usize,
    },

    #[error("conflict on '{key}': {reason}")]
    Conflict { key: String, reason: String },
}

impl StoreError {
    #[must_use]
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            Self::Timeout { .. } => StoreErrorKind::Timeout,
            Self::Unavailable { .. } => StoreErrorKind::Unavailable,
            Self::Conflict { .. } => StoreErrorKind::Conflict,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Timeout { key, .. }
            | Self::Unavailable { key, .. }
            | Self::Conflict { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// Transient; the request may or may not have been applied.
    Timeout,
    /// No quorum reachable.
    Unavailable,
    /// Optimistic precondition failed.
    Conflict,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

impl FromStr for StoreErrorKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "unavailable" => Ok(Self::Unavailable),
            "conflict" => Ok(Self::Conflict),
            other => Err(CoreError::UnknownErrorKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn error_kind_matches_variant() {
        let timeout = StoreError::Timeout {
            key: "k".to_string(),
            elapsed_ms: 10,
        };
        let unavailable = StoreError::Unavailable {
            key: "k".to_string(),
            reachable: 1,
            required: 2,
        };
        let conflict = StoreError::Conflict {
            key: "k".to_string(),
            reason: "stale version".to_string(),
        };

        assert_eq!(timeout.kind(), StoreErrorKind::Timeout);
        assert_eq!(unavailable.kind(), StoreErrorKind::Unavailable);
        assert_eq!(conflict.kind(), StoreErrorKind::Conflict);
        assert_eq!(conflict.key(), "k");
    }

    #[test]
    fn unavailable_message_names_quorum() {
        let err = StoreError::Unavailable {
            key: "users:1".to_string(),
            reachable: 1,
            required: 2,
        };

        let msg = err.to_string();

        assert!(msg.contains("users:1"));
        assert!(msg.contains("1 member(s) reachable"));
        assert!(msg.contains("2 required"));
    }

    #[test]
    fn read_result_accessors() {
        let found = ReadResult::Found {
            value: json!(3),
            timestamp: Timestamp::new(9),
        };

        assert!(found.is_found());
        assert_eq!(found.timestamp(), Some(Timestamp::new(9)));
        assert_eq!(found.value(), Some(&json!(3)));
        assert_eq!(ReadResult::NotFound.timestamp(), None);
    }

    #[test]
    fn error_kind_round_trips_through_str() {
        for kind in [
            StoreErrorKind::Timeout,
            StoreErrorKind::Unavailable,
            StoreErrorKind::Conflict,
        ] {
            assert_eq!(kind.to_string().parse::<StoreErrorKind>(), Ok(kind));
        }
        assert!("boom".parse::<StoreErrorKind>().is_err());
    }
}
