//! Statistical bitrate selection over a sliding telemetry window

use super::types::*;
use crate::catalog::{BitrateCatalog, BitrateLevel};
use crate::config::{AbrConfig, ConfigError};

/// Segments needed before scale signals are trusted
pub const MIN_SAMPLES_FOR_SCALING: usize = 3;

/// Window used by [`AbrController::predict_optimal_bitrate`]
pub const PREDICTION_WINDOW: usize = 5;

/// Assumed segment size when turning download time into a bitrate
pub const REFERENCE_SEGMENT_BYTES: f64 = 2_000_000.0;

/// Mean buffer occupancy below which a downscale is signalled
pub const LOW_BUFFER_PERCENT: f64 = 20.0;

/// Per-viewer ABR decision engine
#[derive(Debug, Clone)]
pub struct AbrController {
    config: AbrConfig,
    catalog: BitrateCatalog,
    current_bitrate: u32,
    segments: History<SegmentMetrics>,
    network: History<NetworkStats>,
}

impl AbrController {
    pub fn new(config: AbrConfig, catalog: BitrateCatalog) -> Result<Self, ConfigError> {
        config.validate()?;

        let initial = catalog
            .levels()
            .iter()
            .map(|level| level.bitrate_kbps)
            .find(|bitrate| (config.min_bitrate..=config.max_bitrate).contains(bitrate))
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "no catalog level lies within [{}, {}] kbps",
                    config.min_bitrate, config.max_bitrate
                ))
            })?;

        Ok(Self {
            segments: History::new(config.history_size),
            network: History::new(config.history_size),
            current_bitrate: initial,
            config,
            catalog,
        })
    }

    /// Controller over the standard catalog with default policy
    pub fn with_defaults() -> Self {
        let config = AbrConfig::default();
        Self {
            segments: History::new(config.history_size),
            network: History::new(config.history_size),
            current_bitrate: config.min_bitrate,
            config,
            catalog: BitrateCatalog::standard(),
        }
    }

    pub fn config(&self) -> &AbrConfig {
        &self.config
    }

    pub fn catalog(&self) -> &BitrateCatalog {
        &self.catalog
    }

    pub fn current_bitrate(&self) -> u32 {
        self.current_bitrate
    }

    /// Catalog level for the current bitrate: the highest level within
    /// `[min, max]` not above it, or the lowest level within `[min, max]`
    /// when the current bitrate sits below every such level
    pub fn current_level(&self) -> BitrateLevel {
        let mut bounded = self.catalog.levels().iter().filter(|level| self.in_bounds(level));
        let lowest = bounded.clone().next();
        bounded
            .rfind(|level| level.bitrate_kbps <= self.current_bitrate)
            .or(lowest)
            .unwrap_or_else(|| self.catalog.floor(self.current_bitrate))
            .clone()
    }

    /// Set the current bitrate, clamped into `[min, max]`. Returns the value stored.
    pub fn set_current_bitrate(&mut self, bitrate_kbps: u32) -> u32 {
        self.current_bitrate = self.clamp(bitrate_kbps);
        self.current_bitrate
    }

    fn clamp(&self, bitrate_kbps: u32) -> u32 {
        bitrate_kbps.clamp(self.config.min_bitrate, self.config.max_bitrate)
    }

    fn in_bounds(&self, level: &BitrateLevel) -> bool {
        (self.config.min_bitrate..=self.config.max_bitrate).contains(&level.bitrate_kbps)
    }

    /// Pick the level closest to `bandwidth_kbps` among those that fit under
    /// `bandwidth × threshold_up`. Ties resolve to the higher level. With no
    /// fitting level the (clamped) current level is kept, which never falls
    /// outside `[min, max]`.
    pub fn select_quality(&mut self, bandwidth_kbps: f64) -> BitrateLevel {
        self.current_bitrate = self.clamp(self.current_bitrate);

        let ceiling = bandwidth_kbps * self.config.threshold_up;
        let mut best: Option<(&BitrateLevel, f64)> = None;
        for level in self.catalog.levels() {
            let bitrate = level.bitrate_kbps as f64;
            if ceiling.is_nan() || bitrate > ceiling || !self.in_bounds(level) {
                continue;
            }
            let distance = (bitrate - bandwidth_kbps).abs();
            match best {
                Some((_, best_distance)) if distance > best_distance => {}
                _ => best = Some((level, distance)),
            }
        }

        match best {
            Some((level, _)) => {
                let level = level.clone();
                if level.bitrate_kbps != self.current_bitrate {
                    log::debug!(
                        "ABR: bandwidth {:.0} kbps selects {} (was {} kbps)",
                        bandwidth_kbps,
                        level.label,
                        self.current_bitrate
                    );
                }
                self.current_bitrate = level.bitrate_kbps;
                level
            }
            None => self.current_level(),
        }
    }

    pub fn record_segment_metrics(&mut self, metrics: SegmentMetrics) {
        self.segments.push(metrics);
    }

    pub fn record_network_stats(&mut self, stats: NetworkStats) {
        self.network.push(stats);
    }

    fn mean_of_recent(&self, n: usize, field: impl Fn(&SegmentMetrics) -> f64) -> Option<f64> {
        if self.segments.len() < n {
            return None;
        }
        let sum: f64 = self.segments.recent(n).map(field).sum();
        Some(sum / n as f64)
    }

    /// True when the last three segments averaged more than the next level
    /// up times `threshold_up`
    pub fn should_upscale(&self) -> bool {
        let Some(mean_bitrate) = self.mean_of_recent(MIN_SAMPLES_FOR_SCALING, |m| m.bitrate_kbps) else {
            return false;
        };
        match self.catalog.next_higher(self.current_bitrate) {
            Some(next) if self.in_bounds(next) => {
                mean_bitrate > next.bitrate_kbps as f64 * self.config.threshold_up
            }
            _ => false,
        }
    }

    /// True when the last three segments averaged under 20% buffer and a
    /// lower level exists
    pub fn should_downscale(&self) -> bool {
        let Some(mean_buffer) = self.mean_of_recent(MIN_SAMPLES_FOR_SCALING, |m| m.buffer_level) else {
            return false;
        };
        mean_buffer < LOW_BUFFER_PERCENT && self.lower_level().is_some()
    }

    fn lower_level(&self) -> Option<&BitrateLevel> {
        self.catalog
            .next_lower(self.current_bitrate)
            .filter(|level| self.in_bounds(level))
    }

    fn network_congested(&self) -> bool {
        self.network
            .latest()
            .map(|stats| stats.bandwidth_kbps < self.current_bitrate as f64 * self.config.threshold_down)
            .unwrap_or(false)
    }

    /// Bitrate implied by the mean download time of the last five segments,
    /// assuming 2 MB segments, clamped into `[min, max]`
    pub fn predict_optimal_bitrate(&self) -> u32 {
        let recent: Vec<f64> = self
            .segments
            .recent(PREDICTION_WINDOW)
            .map(|m| m.download_duration.as_secs_f64())
            .collect();
        if recent.is_empty() {
            return self.current_bitrate;
        }

        let mean_secs = recent.iter().sum::<f64>() / recent.len() as f64;
        if mean_secs <= 0.0 {
            return self.config.max_bitrate;
        }

        let implied_kbps = REFERENCE_SEGMENT_BYTES * 8.0 / mean_secs / 1000.0;
        let bounded = implied_kbps.clamp(self.config.min_bitrate as f64, self.config.max_bitrate as f64);
        bounded.round() as u32
    }

    /// Apply the scale signals. Downscaling wins over upscaling, and a
    /// probe showing bandwidth under `current × threshold_down` also
    /// forces a step down.
    pub fn evaluate(&mut self) -> AbrDecision {
        if self.should_downscale() || self.network_congested() {
            if let Some(lower) = self.lower_level().cloned() {
                log::info!(
                    "ABR: stepping down {} -> {} kbps",
                    self.current_bitrate,
                    lower.bitrate_kbps
                );
                self.current_bitrate = lower.bitrate_kbps;
                return AbrDecision::Downscale(lower);
            }
        }

        if self.should_upscale() {
            if let Some(higher) = self.catalog.next_higher(self.current_bitrate).cloned() {
                log::info!(
                    "ABR: stepping up {} -> {} kbps",
                    self.current_bitrate,
                    higher.bitrate_kbps
                );
                self.current_bitrate = higher.bitrate_kbps;
                return AbrDecision::Upscale(higher);
            }
        }

        AbrDecision::Hold
    }

    pub fn statistics(&self) -> AbrStatistics {
        AbrStatistics {
            current_bitrate_kbps: self.current_bitrate,
            min_bitrate_kbps: self.config.min_bitrate,
            max_bitrate_kbps: self.config.max_bitrate,
            available_levels: self.catalog.levels().to_vec(),
            segment_samples: self.segments.len(),
            network_samples: self.network.len(),
            last_segment: self.segments.latest().cloned(),
            last_network: self.network.latest().cloned(),
        }
    }

    /// Forget all telemetry; the current bitrate is kept
    pub fn reset(&mut self) {
        self.segments.clear();
        self.network.clear();
    }
}
