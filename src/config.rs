//! Configuration types for the ABR, transcoding and distribution engines
//!
//! Every section has sensible defaults and builder-style setters. A full
//! [`Settings`] document can be loaded from JSON; durations are written as
//! integer milliseconds (`*_ms` keys).

use crate::catalog::{BitrateCatalog, BitrateLevel};
use crate::error::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serde helper for `Duration` fields stored as milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

fn default_workers() -> usize {
    num_cpus::get().max(1)
}

/// Tunable policy for the ABR controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbrConfig {
    /// Lowest bitrate (kbps) the controller may recommend
    pub min_bitrate: u32,
    /// Highest bitrate (kbps) the controller may recommend
    pub max_bitrate: u32,
    /// Bandwidth multiplier a level must fit under before it is chosen
    pub threshold_up: f64,
    /// Below `current × threshold_down` measured bandwidth, step down
    pub threshold_down: f64,
    /// Samples kept in each telemetry window
    pub history_size: usize,
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            min_bitrate: 500,
            max_bitrate: 4000,
            threshold_up: 1.5,
            threshold_down: 0.5,
            history_size: 10,
        }
    }
}

impl AbrConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_bitrate(mut self, kbps: u32) -> Self {
        self.min_bitrate = kbps;
        self
    }

    pub fn max_bitrate(mut self, kbps: u32) -> Self {
        self.max_bitrate = kbps;
        self
    }

    pub fn threshold_up(mut self, multiplier: f64) -> Self {
        self.threshold_up = multiplier;
        self
    }

    pub fn threshold_down(mut self, multiplier: f64) -> Self {
        self.threshold_down = multiplier;
        self
    }

    pub fn history_size(mut self, samples: usize) -> Self {
        self.history_size = samples;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_bitrate > self.max_bitrate {
            return Err(ConfigError::Invalid(format!(
                "min_bitrate {} exceeds max_bitrate {}",
                self.min_bitrate, self.max_bitrate
            )));
        }
        if !(self.threshold_up.is_finite() && self.threshold_up > 0.0) {
            return Err(ConfigError::Invalid("threshold_up must be positive".to_string()));
        }
        if !(self.threshold_down.is_finite() && self.threshold_down > 0.0) {
            return Err(ConfigError::Invalid("threshold_down must be positive".to_string()));
        }
        if self.history_size == 0 {
            return Err(ConfigError::Invalid("history_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Transcoding pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodingConfig {
    /// Worker count, which is also the cap on concurrently running jobs
    pub max_concurrent_jobs: usize,
    /// Maximum number of pending jobs
    pub queue_size: usize,
    /// Root directory for rendition output
    pub output_dir: PathBuf,
    /// How often an idle worker re-checks the queue without a wake-up
    #[serde(rename = "idle_poll_interval_ms", with = "duration_ms")]
    pub idle_poll_interval: Duration,
}

impl Default for TranscodingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_workers(),
            queue_size: 100,
            output_dir: PathBuf::from("./transcoded"),
            idle_poll_interval: Duration::from_millis(250),
        }
    }
}

impl TranscodingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs;
        self
    }

    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid("max_concurrent_jobs must be at least 1".to_string()));
        }
        if self.queue_size == 0 {
            return Err(ConfigError::Invalid("queue_size must be at least 1".to_string()));
        }
        if self.idle_poll_interval.is_zero() {
            return Err(ConfigError::Invalid("idle_poll_interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Limits for a single live distributor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    pub max_viewers: usize,
    /// Capacity of the expiring segment queue
    pub max_segments: usize,
    /// Lifetime given to segments built by the distributor
    #[serde(rename = "segment_ttl_ms", with = "duration_ms")]
    pub segment_ttl: Duration,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            max_viewers: 1000,
            max_segments: 500,
            segment_ttl: Duration::from_secs(60),
        }
    }
}

impl DistributorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_viewers(mut self, viewers: usize) -> Self {
        self.max_viewers = viewers;
        self
    }

    pub fn max_segments(mut self, segments: usize) -> Self {
        self.max_segments = segments;
        self
    }

    pub fn segment_ttl(mut self, ttl: Duration) -> Self {
        self.segment_ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_viewers == 0 {
            return Err(ConfigError::Invalid("max_viewers must be at least 1".to_string()));
        }
        if self.max_segments == 0 {
            return Err(ConfigError::Invalid("max_segments must be at least 1".to_string()));
        }
        if self.segment_ttl.is_zero() {
            return Err(ConfigError::Invalid("segment_ttl must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Distribution service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Delivery workers sharing the task queue
    pub worker_count: usize,
    pub task_queue_size: usize,
    /// Interval of the expired-segment sweep
    #[serde(rename = "cleanup_interval_ms", with = "duration_ms")]
    pub cleanup_interval: Duration,
    /// Attempts per delivery task, first try included
    pub max_attempts: u32,
    pub retry_policy: RetryPolicy,
    /// Defaults for distributors opened by the service
    pub distributor: DistributorConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            worker_count: default_workers(),
            task_queue_size: 10_000,
            cleanup_interval: Duration::from_secs(10),
            max_attempts: 3,
            retry_policy: RetryPolicy::default(),
            distributor: DistributorConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    pub fn task_queue_size(mut self, size: usize) -> Self {
        self.task_queue_size = size;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn distributor(mut self, distributor: DistributorConfig) -> Self {
        self.distributor = distributor;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be at least 1".to_string()));
        }
        if self.task_queue_size == 0 {
            return Err(ConfigError::Invalid("task_queue_size must be at least 1".to_string()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::Invalid("cleanup_interval must be non-zero".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        self.distributor.validate()
    }
}

/// Complete configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub abr: AbrConfig,
    pub transcoding: TranscodingConfig,
    pub distribution: ServiceConfig,
    /// Replaces the standard four-level catalog when present
    pub catalog: Option<Vec<BitrateLevel>>,
}

impl Settings {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.abr.validate()?;
        self.transcoding.validate()?;
        self.distribution.validate()?;
        self.catalog().map(|_| ())
    }

    /// The configured catalog, or the standard one
    pub fn catalog(&self) -> Result<BitrateCatalog, ConfigError> {
        match &self.catalog {
            Some(levels) => BitrateCatalog::new(levels.clone()),
            None => Ok(BitrateCatalog::standard()),
        }
    }
}
