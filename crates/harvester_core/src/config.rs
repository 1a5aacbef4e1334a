use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("max_consecutive_errors must be at least 1")]
    ZeroErrorCeiling,
    #[error("per_item_timeout_ms must be greater than 0")]
    ZeroItemTimeout,
}

/// Settings for one harvest run. Loaded at start and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub max_concurrency: usize,
    /// Upper bound on a single collection round-trip.
    pub per_item_timeout_ms: u64,
    /// Delay between successful pulls from the work source.
    pub pull_interval_ms: u64,
    pub max_consecutive_errors: u32,
    pub auto_upload: bool,
    pub close_context_after_collect: bool,
    /// Ceiling for the advisory ready-wait.
    pub ready_timeout_ms: u64,
    /// Delay before tearing down a context that collected successfully.
    pub close_grace_ms: u64,
    /// Sleep used while all slots are busy or the queue is momentarily empty.
    pub poll_interval_ms: u64,
    pub error_log_capacity: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            per_item_timeout_ms: 10 * 60 * 1000,
            pull_interval_ms: 2_000,
            max_consecutive_errors: 5,
            auto_upload: true,
            close_context_after_collect: true,
            ready_timeout_ms: 30_000,
            close_grace_ms: 1_500,
            poll_interval_ms: 500,
            error_log_capacity: 50,
        }
    }
}

impl HarvestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_consecutive_errors == 0 {
            return Err(ConfigError::ZeroErrorCeiling);
        }
        if self.per_item_timeout_ms == 0 {
            return Err(ConfigError::ZeroItemTimeout);
        }
        Ok(())
    }

    pub fn per_item_timeout(&self) -> Duration {
        Duration::from_millis(self.per_item_timeout_ms)
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.pull_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
