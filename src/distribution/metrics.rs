//! Distributor statistics and service-wide delivery metrics

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of one distributor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributorStats {
    pub recording_id: String,
    pub active_viewers: usize,
    pub peak_viewers: usize,
    pub segments_served: u64,
    pub bytes_served: u64,
    pub queued_segments: usize,
    /// Segment queue fill level, 0.0 to 1.0
    pub queue_utilization: f64,
    pub started_at: DateTime<Utc>,
    pub is_closed: bool,
}

/// Counters for background deliveries
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl DeliveryCounters {
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }
}

/// Aggregated view over every distributor of a service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub distributors: usize,
    pub active_viewers: usize,
    pub segments_served: u64,
    pub bytes_served: u64,
    pub deliveries_completed: u64,
    /// Deliveries that exhausted their attempts or could not be retried
    pub deliveries_failed: u64,
    pub deliveries_retried: u64,
    pub queued_tasks: usize,
    /// No CDN is attached to the in-process engine
    pub cdn_hit_rate: Option<f64>,
    pub timestamp: DateTime<Utc>,
}
