//! Telemetry samples and reports for the ABR controller

use crate::catalog::BitrateLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// One observation per downloaded segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMetrics {
    pub sequence_number: u64,
    pub request_time: DateTime<Utc>,
    pub download_duration: Duration,
    pub bytes_downloaded: u64,
    /// Achieved bitrate in kbps
    pub bitrate_kbps: f64,
    /// Buffer occupancy, percent
    pub buffer_level: f64,
}

impl SegmentMetrics {
    pub fn new(
        sequence_number: u64,
        download_duration: Duration,
        bytes_downloaded: u64,
        bitrate_kbps: f64,
        buffer_level: f64,
    ) -> Self {
        Self {
            sequence_number,
            request_time: Utc::now(),
            download_duration,
            bytes_downloaded,
            bitrate_kbps,
            buffer_level,
        }
    }
}

/// One observation per network probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Estimated bandwidth in kbps
    pub bandwidth_kbps: f64,
    pub latency: Duration,
    /// Packet loss, percent
    pub packet_loss: f64,
    /// Buffer health, percent
    pub buffer_health: f64,
    pub timestamp: DateTime<Utc>,
}

impl NetworkStats {
    pub fn new(bandwidth_kbps: f64, latency: Duration, packet_loss: f64, buffer_health: f64) -> Self {
        Self {
            bandwidth_kbps,
            latency,
            packet_loss,
            buffer_health,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of [`AbrController::evaluate`](super::AbrController::evaluate)
#[derive(Debug, Clone, PartialEq)]
pub enum AbrDecision {
    Hold,
    Upscale(BitrateLevel),
    Downscale(BitrateLevel),
}

/// Snapshot of controller state
#[derive(Debug, Clone, Serialize)]
pub struct AbrStatistics {
    pub current_bitrate_kbps: u32,
    pub min_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub available_levels: Vec<BitrateLevel>,
    pub segment_samples: usize,
    pub network_samples: usize,
    pub last_segment: Option<SegmentMetrics>,
    pub last_network: Option<NetworkStats>,
}

/// Fixed-capacity sliding window; pushing past capacity drops the oldest
#[derive(Debug, Clone)]
pub(crate) struct History<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> History<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, item: T) {
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// The newest `n` entries (fewer if not available)
    pub(crate) fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        self.items.iter().skip(self.items.len().saturating_sub(n))
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }
}
