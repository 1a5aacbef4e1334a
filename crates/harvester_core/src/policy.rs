use std::time::Duration;

use crate::HarvestConfig;

/// Counts back-to-back pull failures and trips once the limit is reached.
///
/// Only failures talking to the work source feed this counter; per-item
/// collection failures are expected and never touch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCeiling {
    limit: u32,
    consecutive: u32,
}

impl FailureCeiling {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            consecutive: 0,
        }
    }

    /// Records one failure and returns `true` when the ceiling is reached.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        self.is_tripped()
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn is_tripped(&self) -> bool {
        self.consecutive >= self.limit
    }
}

/// Backoff applied after a failed pull: twice the regular pull interval.
pub fn pull_backoff(config: &HarvestConfig) -> Duration {
    config.pull_interval().saturating_mul(2)
}
