use std::collections::{BTreeMap, BTreeSet};

use sagalab_core::{SagaId, SessionId, Timestamp};
use serde::{Deserialize, Serialize};

/// Client-side causal state of one reader/writer.
///
/// Holds, per key, the highest version timestamp the session has observed
/// through its own reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saga: Option<SagaId>,
    #[serde(default)]
    prior_max: BTreeMap<String, Timestamp>,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            saga: None,
            prior_max: BTreeMap::new(),
        }
    }

    /// Session whose anomalies are attributed to a saga.
    #[must_use]
    pub fn for_saga(id: SessionId, saga: SagaId) -> Self {
        Self {
            saga: Some(saga),
            ..Self::new(id)
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn saga(&self) -> Option<&SagaId> {
        self.saga.as_ref()
    }

    /// Highest timestamp observed for `key`, `Timestamp::ZERO` if none.
    #[must_use]
    pub fn prior_max(&self, key: &str) -> Timestamp {
        self.prior_max.get(key).copied().unwrap_or(Timestamp::ZERO)
    }

    /// Raise the prior max for `key`; lower values are ignored.
    pub fn observe(&mut self, key: &str, timestamp: Timestamp) {
        let entry = self
            .prior_max
            .entry(key.to_string())
            .or_insert(Timestamp::ZERO);
        *entry = (*entry).max(timestamp);
    }

    /// The set of versions this session has observed, attached to its writes.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<Timestamp> {
        self.prior_max.values().copied().collect()
    }

    /// Highest timestamp observed across all keys.
    #[must_use]
    pub fn high_water_mark(&self) -> Timestamp {
        self.prior_max
            .values()
            .copied()
            .max()
            .unwrap_or(Timestamp::ZERO)
    }
}
