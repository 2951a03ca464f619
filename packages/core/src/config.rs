//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::manager::TierConfigs;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_ENV: &str = "BATCHQ_CONFIG";

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Configuration for the scheduler and batch runners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounds for the `high`, `normal` and `low` tiers.
    pub tiers: TierConfigs,
    /// Item concurrency used when a submission does not set one.
    pub default_batch_size: usize,
    /// Upper bound accepted for a submission's batch size.
    pub max_batch_size: usize,
    /// Upper bound on the number of items in one job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items_per_job: Option<usize>,
    /// Per-item timeout used when a submission does not set one (ms).
    pub default_item_timeout_ms: u64,
    /// Retries per failed item used when a submission does not set them.
    pub default_max_retries: u32,
    /// How often the scheduler polls the tiers for dispatch (ms).
    pub dispatch_interval_ms: u64,
    /// How often housekeeping runs (seconds).
    pub housekeeping_interval_secs: u64,
    /// Entries listed per tier in status views.
    pub preview_limit: usize,
    /// Finished jobs older than this are purged on housekeeping (seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_cleanup_after_secs: Option<u64>,
    /// Directory for queue status snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tiers: TierConfigs::default(),
            default_batch_size: 5,
            max_batch_size: 50,
            max_items_per_job: Some(10_000),
            default_item_timeout_ms: 120_000,
            default_max_retries: 0,
            dispatch_interval_ms: 100,
            housekeeping_interval_secs: 30,
            preview_limit: 10,
            auto_cleanup_after_secs: None,
            snapshot_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file; missing fields use defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `BATCHQ_CONFIG`, or use defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };

        if self.default_batch_size == 0 {
            return Err(invalid("default_batch_size", "must be at least 1"));
        }
        if self.max_batch_size < self.default_batch_size {
            return Err(invalid("max_batch_size", "must not be below default_batch_size"));
        }
        if self.default_item_timeout_ms == 0 {
            return Err(invalid("default_item_timeout_ms", "must be positive"));
        }
        if self.dispatch_interval_ms == 0 {
            return Err(invalid("dispatch_interval_ms", "must be positive"));
        }
        for (name, tier) in [
            ("tiers.high", &self.tiers.high),
            ("tiers.normal", &self.tiers.normal),
            ("tiers.low", &self.tiers.low),
        ] {
            if tier.max_concurrent == 0 {
                return Err(invalid(name, "max_concurrent must be at least 1"));
            }
        }
        Ok(())
    }

    pub fn with_tiers(mut self, tiers: TierConfigs) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    pub fn with_housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    pub fn with_auto_cleanup_after(mut self, age: Duration) -> Self {
        self.auto_cleanup_after_secs = Some(age.as_secs());
        self
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs.max(1))
    }

    pub fn auto_cleanup_after(&self) -> Option<Duration> {
        self.auto_cleanup_after_secs.map(Duration::from_secs)
    }
}
