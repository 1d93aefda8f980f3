use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How many replica-set members must acknowledge a write before it counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteConcern {
    AckOne,
    #[default]
    AckMajority,
    AckAll,
}

impl WriteConcern {
    /// Number of acknowledgements required in a set of `members` nodes.
    #[must_use]
    pub fn required_acks(self, members: usize) -> usize {
        match self {
            Self::AckOne => 1.min(members),
            Self::AckMajority => members / 2 + 1,
            Self::AckAll => members,
        }
    }
}

impl fmt::Display for WriteConcern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AckOne => "ack-one",
            Self::AckMajority => "ack-majority",
            Self::AckAll => "ack-all",
        };
        f.write_str(s)
    }
}

impl FromStr for WriteConcern {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ack-one" | "1" => Ok(Self::AckOne),
            "ack-majority" | "majority" => Ok(Self::AckMajority),
            "ack-all" | "all" => Ok(Self::AckAll),
            other => Err(CoreError::UnknownWriteConcern(other.to_string())),
        }
    }
}

/// Which replicated state a read is allowed to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadConcern {
    /// Whatever the contacted member has applied, possibly stale.
    Local,
    /// Only data acknowledged by a majority of members.
    #[default]
    Majority,
    /// The primary's latest state, confirmed against a reachable majority.
    Linearizable,
}

impl fmt::Display for ReadConcern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Local => "local",
            Self::Majority => "majority",
            Self::Linearizable => "linearizable",
        };
        f.write_str(s)
    }
}

impl FromStr for ReadConcern {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "majority" => Ok(Self::Majority),
            "linearizable" => Ok(Self::Linearizable),
            other => Err(CoreError::UnknownReadConcern(other.to_string())),
        }
    }
}

/// Durability requirement for writes or visibility requirement for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "level", rename_all = "lowercase")]
pub enum ConsistencyLevel {
    Write(WriteConcern),
    Read(ReadConcern),
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write(concern) => write!(f, "w:{concern}"),
            Self::Read(concern) => write!(f, "r:{concern}"),
        }
    }
}

impl From<WriteConcern> for ConsistencyLevel {
    fn from(concern: WriteConcern) -> Self {
        Self::Write(concern)
    }
}

impl From<ReadConcern> for ConsistencyLevel {
    fn from(concern: ReadConcern) -> Self {
        Self::Read(concern)
    }
}
