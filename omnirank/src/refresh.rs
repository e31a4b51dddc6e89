//! Rebuild policy for the cached snapshot.
//!
//! A rebuild is due only when enough writes have accumulated AND enough time
//! has passed since the last one. Either condition alone never triggers.

use crate::config::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Writes reported since the last rebuild before one is considered.
    pub min_writes: u64,
    /// Minimum time between rebuilds.
    pub min_interval_secs: u64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            min_writes: 10,
            min_interval_secs: 5 * 60,
        }
    }
}

impl RefreshPolicy {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn is_due(&self, writes: u64, elapsed: Duration) -> bool {
        writes >= self.min_writes && elapsed >= self.min_interval()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_writes == 0 {
            return Err(ConfigError::ZeroValue { field: "min_writes" });
        }
        Ok(())
    }
}

/// Counters the policy is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct RefreshState {
    pub writes_since_rebuild: u64,
    pub last_rebuild: Instant,
}

impl RefreshState {
    pub fn new(now: Instant) -> Self {
        Self {
            writes_since_rebuild: 0,
            last_rebuild: now,
        }
    }

    pub fn record_writes(&mut self, n: u64) {
        self.writes_since_rebuild = self.writes_since_rebuild.saturating_add(n);
    }

    pub fn is_due(&self, policy: &RefreshPolicy, now: Instant) -> bool {
        policy.is_due(
            self.writes_since_rebuild,
            now.saturating_duration_since(self.last_rebuild),
        )
    }

    /// Called once a rebuild has been swapped in.
    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }
}
