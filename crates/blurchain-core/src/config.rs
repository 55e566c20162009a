//! Executor configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! pool_size = 4
//! constraint_poll_interval_ms = 250
//! default_task_timeout_ms = 30000
//! retention_secs = 300
//! retention_interval_ms = 60000
//! evict_on_observe = false
//!
//! [retry]
//! max_retries = 3
//! backoff = { kind = "exponential", base_ms = 500, multiplier = 2.0, max_delay_ms = 10000 }
//! ```
//!
//! Every key except `[retry]` is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::retry::{Backoff, RetryPolicy};

/// Default number of tasks that may run at the same time.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default interval between constraint re-checks of a blocked stage.
pub const DEFAULT_CONSTRAINT_POLL_INTERVAL_MS: u64 = 250;

/// Default time terminal chains are kept before the retention loop prunes them.
pub const DEFAULT_RETENTION_SECS: u64 = 300;

/// Default period of the retention loop. Zero disables the loop.
pub const DEFAULT_RETENTION_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of tasks running at once, across all chains.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_poll_interval")]
    pub constraint_poll_interval_ms: u64,

    /// Per-invocation limit for stages without their own timeout.
    #[serde(default)]
    pub default_task_timeout_ms: Option<u64>,

    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// How often the retention loop runs. It starts with the first chain;
    /// `0` leaves pruning to the host.
    #[serde(default = "default_retention_interval")]
    pub retention_interval_ms: u64,

    /// Evict a chain's records as soon as its result has been read through
    /// `ChainHandle::wait`.
    #[serde(default)]
    pub evict_on_observe: bool,

    pub retry: RetryPolicy,
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_poll_interval() -> u64 {
    DEFAULT_CONSTRAINT_POLL_INTERVAL_MS
}

fn default_retention() -> u64 {
    DEFAULT_RETENTION_SECS
}

fn default_retention_interval() -> u64 {
    DEFAULT_RETENTION_INTERVAL_MS
}

impl ExecutorConfig {
    /// Defaults for everything but the retry policy.
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            constraint_poll_interval_ms: DEFAULT_CONSTRAINT_POLL_INTERVAL_MS,
            default_task_timeout_ms: None,
            retention_secs: DEFAULT_RETENTION_SECS,
            retention_interval_ms: DEFAULT_RETENTION_INTERVAL_MS,
            evict_on_observe: false,
            retry,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        if self.constraint_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "constraint_poll_interval_ms must be positive".into(),
            ));
        }
        if self.default_task_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "default_task_timeout_ms must be positive".into(),
            ));
        }
        if let Backoff::Exponential { multiplier, .. } = self.retry.backoff
            && !(multiplier.is_finite() && multiplier >= 1.0)
        {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff.multiplier must be >= 1.0, got {multiplier}"
            )));
        }
        Ok(())
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_constraint_poll_interval(mut self, interval: Duration) -> Self {
        self.constraint_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_default_task_timeout(mut self, timeout: Duration) -> Self {
        self.default_task_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_secs = retention.as_secs();
        self
    }

    pub fn with_retention_interval(mut self, interval: Duration) -> Self {
        self.retention_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_evict_on_observe(mut self, enabled: bool) -> Self {
        self.evict_on_observe = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn constraint_poll_interval(&self) -> Duration {
        Duration::from_millis(self.constraint_poll_interval_ms)
    }

    pub fn default_task_timeout(&self) -> Option<Duration> {
        self.default_task_timeout_ms.map(Duration::from_millis)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// `None` when the retention loop is disabled.
    pub fn retention_interval(&self) -> Option<Duration> {
        (self.retention_interval_ms > 0).then(|| Duration::from_millis(self.retention_interval_ms))
    }
}
