use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sagalab_causal::{DEFAULT_HISTORY_DEPTH, DEFAULT_MAX_VIOLATIONS};
use sagalab_core::{ReadConcern, WriteConcern};
use serde::Deserialize;

use crate::Result;
use crate::error::OperationError;

/// File name looked up by [`load_config_from_dir`].
pub const CONFIG_FILENAME: &str = "sagalab.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1000),
            multiplier: 2,
        }
    }
}

impl RetryConfig {
    /// Total attempts including the first one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    #[must_use]
    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    step_timeout: Duration,
    state_dir: Option<PathBuf>,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_millis(5000),
            state_dir: None,
        }
    }
}

impl SagaConfig {
    /// Budget for one step; also handed to each store call.
    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Directory for saga snapshots; `None` keeps state in memory only.
    #[must_use]
    pub fn state_dir(&self) -> Option<&Path> {
        self.state_dir.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CausalConfig {
    history_depth: usize,
    max_violations: usize,
}

impl Default for CausalConfig {
    fn default() -> Self {
        Self {
            history_depth: DEFAULT_HISTORY_DEPTH,
            max_violations: DEFAULT_MAX_VIOLATIONS,
        }
    }
}

impl CausalConfig {
    #[must_use]
    pub fn history_depth(&self) -> usize {
        self.history_depth
    }

    /// Violations the tracker retains before dropping the oldest.
    #[must_use]
    pub fn max_violations(&self) -> usize {
        self.max_violations
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsistencyConfig {
    write_concern: WriteConcern,
    read_concern: ReadConcern,
}

impl ConsistencyConfig {
    #[must_use]
    pub fn write_concern(&self) -> WriteConcern {
        self.write_concern
    }

    #[must_use]
    pub fn read_concern(&self) -> ReadConcern {
        self.read_concern
    }
}

/// Settings for the orchestrator, its executor and the causal tracker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrchestratorConfig {
    retry: RetryConfig,
    saga: SagaConfig,
    causal: CausalConfig,
    consistency: ConsistencyConfig,
}

impl OrchestratorConfig {
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    #[must_use]
    pub fn saga(&self) -> &SagaConfig {
        &self.saga
    }

    #[must_use]
    pub fn causal(&self) -> &CausalConfig {
        &self.causal
    }

    #[must_use]
    pub fn consistency(&self) -> &ConsistencyConfig {
        &self.consistency
    }

    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.saga.state_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.saga.step_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, initial_backoff: Duration) -> Self {
        self.retry.max_attempts = max_attempts;
        self.retry.initial_backoff = initial_backoff;
        self
    }

    #[must_use]
    pub fn with_consistency(mut self, write: WriteConcern, read: ReadConcern) -> Self {
        self.consistency = ConsistencyConfig {
            write_concern: write,
            read_concern: read,
        };
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    retry: RawRetry,
    #[serde(default)]
    saga: RawSaga,
    #[serde(default)]
    causal: RawCausal,
    #[serde(default)]
    consistency: RawConsistency,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRetry {
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    multiplier: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSaga {
    step_timeout_ms: Option<u64>,
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCausal {
    history_depth: Option<usize>,
    max_violations: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConsistency {
    write_concern: Option<WriteConcern>,
    read_concern: Option<ReadConcern>,
}

fn build_retry_config(raw: RawRetry) -> Result<RetryConfig> {
    let defaults = RetryConfig::default();
    let config = RetryConfig {
        max_attempts: raw.max_attempts.unwrap_or(defaults.max_attempts),
        initial_backoff: raw
            .initial_backoff_ms
            .map_or(defaults.initial_backoff, Duration::from_millis),
        max_backoff: raw
            .max_backoff_ms
            .map_or(defaults.max_backoff, Duration::from_millis),
        multiplier: raw.multiplier.unwrap_or(defaults.multiplier),
    };

    if config.max_attempts == 0 {
        return Err(OperationError::ConfigValue {
            field: "retry.max_attempts",
            reason: "must be at least 1".to_string(),
        });
    }
    if config.multiplier == 0 {
        return Err(OperationError::ConfigValue {
            field: "retry.multiplier",
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(config)
}

fn build_saga_config(raw: RawSaga) -> Result<SagaConfig> {
    let defaults = SagaConfig::default();
    let step_timeout = raw
        .step_timeout_ms
        .map_or(defaults.step_timeout, Duration::from_millis);
    if step_timeout.is_zero() {
        return Err(OperationError::ConfigValue {
            field: "saga.step_timeout_ms",
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(SagaConfig {
        step_timeout,
        state_dir: raw.state_dir,
    })
}

/// Parse configuration from TOML text. Missing sections and keys take their
/// defaults.
///
/// # Errors
///
/// Returns an error if the text is not valid TOML, names unknown keys, or
/// carries out-of-range values. `path` only labels the error.
pub fn parse_config(content: &str, path: &Path) -> Result<OrchestratorConfig> {
    let raw: RawConfig = toml::from_str(content).map_err(|source| OperationError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;

    let consistency_defaults = ConsistencyConfig::default();
    Ok(OrchestratorConfig {
        retry: build_retry_config(raw.retry)?,
        saga: build_saga_config(raw.saga)?,
        causal: CausalConfig {
            history_depth: raw
                .causal
                .history_depth
                .unwrap_or(DEFAULT_HISTORY_DEPTH)
                .max(1),
            max_violations: raw
                .causal
                .max_violations
                .unwrap_or(DEFAULT_MAX_VIOLATIONS)
                .max(1),
        },
        consistency: ConsistencyConfig {
            write_concern: raw
                .consistency
                .write_concern
                .unwrap_or(consistency_defaults.write_concern),
            read_concern: raw
                .consistency
                .read_concern
                .unwrap_or(consistency_defaults.read_concern),
        },
    })
}

/// Load configuration from `path`; a missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        return Ok(OrchestratorConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| OperationError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content, path)
}

/// Load `sagalab.toml` from `dir`.
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_from_dir(dir: &Path) -> Result<OrchestratorConfig> {
    load_config(&dir.join(CONFIG_FILENAME))
}
