//! Engine configuration.
//!
//! `SimilarityConfig` is the only part callers can replace at runtime (via
//! `HistorySearchEngine::update_config`). Everything else is fixed when the
//! engine is opened.

use crate::refresh::RefreshPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("weight `{name}` must be non-negative, got {value}")]
    NegativeWeight { name: &'static str, value: f64 },
    #[error("min_score_threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),
    #[error("max_results must be greater than zero")]
    ZeroMaxResults,
    #[error("recency_half_life_days must be positive, got {0}")]
    NonPositiveHalfLife(f64),
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// ─────────────────────────────────────────────────────────────────────────────
// SIMILARITY
// ─────────────────────────────────────────────────────────────────────────────

/// Scoring weights and result limits.
///
/// Weights need not sum to 1. They are never renormalized, so the combined
/// score is bounded by their sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub min_score_threshold: f64,
    pub max_results: usize,
    pub url_weight: f64,
    pub title_weight: f64,
    pub recency_weight: f64,
    pub visit_weight: f64,
    pub recency_half_life_days: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            min_score_threshold: 0.2,
            max_results: 50,
            url_weight: 0.4,
            title_weight: 0.3,
            recency_weight: 0.2,
            visit_weight: 0.1,
            recency_half_life_days: 30.0,
        }
    }
}

impl SimilarityConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        for (name, value) in [
            ("url_weight", self.url_weight),
            ("title_weight", self.title_weight),
            ("recency_weight", self.recency_weight),
            ("visit_weight", self.visit_weight),
        ] {
            // NaN fails this comparison too
            if !(value >= 0.0) {
                return Err(ConfigError::NegativeWeight { name, value });
            }
        }
        if !(0.0..=1.0).contains(&self.min_score_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.min_score_threshold));
        }
        if self.max_results == 0 {
            return Err(ConfigError::ZeroMaxResults);
        }
        if !(self.recency_half_life_days > 0.0) {
            return Err(ConfigError::NonPositiveHalfLife(self.recency_half_life_days));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WRITE AGGREGATOR
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Bounded queue capacity. A full queue diverts to a synchronous write.
    pub queue_capacity: usize,
    /// Flush as soon as this many events are pending.
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            batch_size: 50,
            flush_interval_ms: 5_000,
        }
    }
}

impl AggregatorConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroValue { field: "queue_capacity" });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroValue { field: "batch_size" });
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::ZeroValue { field: "flush_interval_ms" });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ENGINE
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub similarity: SimilarityConfig,
    pub refresh: RefreshPolicy,
    pub aggregator: AggregatorConfig,
    /// Where the snapshot is persisted between runs. `None` disables persistence.
    pub snapshot_path: Option<PathBuf>,
    /// Persisted snapshots older than this are rebuilt from the store on startup.
    pub snapshot_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            similarity: SimilarityConfig::default(),
            refresh: RefreshPolicy::default(),
            aggregator: AggregatorConfig::default(),
            snapshot_path: None,
            snapshot_ttl_secs: 30 * 60,
        }
    }
}

impl EngineConfig {
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.similarity.validate()?;
        self.aggregator.validate()?;
        self.refresh.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.similarity.max_results, 50);
        assert_eq!(config.similarity.min_score_threshold, 0.2);
        assert_eq!(config.aggregator.batch_size, 50);
        assert_eq!(config.snapshot_ttl(), Duration::from_secs(1800));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let config = SimilarityConfig {
            title_weight: -0.1,
            ..Default::default()
        };
        match config.validate() {
            Err(ConfigError::NegativeWeight { name, .. }) => assert_eq!(name, "title_weight"),
            other => panic!("expected NegativeWeight, got {:?}", other),
        }
    }

    #[test]
    fn test_nan_weight_rejected() {
        let config = SimilarityConfig {
            visit_weight: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NegativeWeight { .. })));
    }

    #[test]
    fn test_threshold_bounds() {
        for bad in [-0.01, 1.01] {
            let config = SimilarityConfig {
                min_score_threshold: bad,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(ConfigError::ThresholdOutOfRange(_))));
        }
        for ok in [0.0, 1.0] {
            let config = SimilarityConfig {
                min_score_threshold: ok,
                ..Default::default()
            };
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_zero_max_results_and_half_life() {
        let config = SimilarityConfig {
            max_results: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroMaxResults)));

        let config = SimilarityConfig {
            recency_half_life_days: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NonPositiveHalfLife(_))));
    }

    #[test]
    fn test_weights_need_not_sum_to_one() {
        let config = SimilarityConfig {
            url_weight: 2.0,
            title_weight: 2.0,
            recency_weight: 0.0,
            visit_weight: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_aggregator_zero_batch_rejected() {
        let config = AggregatorConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroValue { field: "batch_size" })
        ));
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"similarity": {{"max_results": 10}}, "snapshot_ttl_secs": 60}}"#
        )
        .unwrap();

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.similarity.max_results, 10);
        assert_eq!(config.similarity.url_weight, 0.4);
        assert_eq!(config.snapshot_ttl_secs, 60);
        assert_eq!(config.refresh, RefreshPolicy::default());
    }

    #[test]
    fn test_from_json_file_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"similarity": {{"url_weight": -1.0}}}}"#).unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(file.path()),
            Err(ConfigError::NegativeWeight { .. })
        ));
    }

    #[test]
    fn test_from_json_file_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
