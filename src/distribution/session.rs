//! Viewer sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Initial buffer health of a new session, percent
pub const INITIAL_BUFFER_HEALTH: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ConnectionQuality {
    /// `>80` excellent, `>60` good, `>40` fair, otherwise poor
    pub fn from_buffer_health(health: f64) -> Self {
        if health > 80.0 {
            ConnectionQuality::Excellent
        } else if health > 60.0 {
            ConnectionQuality::Good
        } else if health > 40.0 {
            ConnectionQuality::Fair
        } else {
            ConnectionQuality::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Excellent => "excellent",
            ConnectionQuality::Good => "good",
            ConnectionQuality::Fair => "fair",
            ConnectionQuality::Poor => "poor",
        }
    }
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerSession {
    pub viewer_id: String,
    pub session_id: String,
    pub recording_id: String,
    pub started_at: DateTime<Utc>,
    pub last_segment_at: Option<DateTime<Utc>>,
    pub segments_received: u64,
    pub bytes_received: u64,
    /// Profile label currently served
    pub current_bitrate: String,
    /// Percent, 0 to 100
    pub buffer_health: f64,
    pub connection_quality: ConnectionQuality,
    pub is_active: bool,
}

impl ViewerSession {
    /// New sessions start half-buffered and are assumed to be on a good link
    /// until the first buffer report arrives.
    pub fn new(viewer_id: &str, recording_id: &str, bitrate: &str) -> Self {
        Self {
            viewer_id: viewer_id.to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            recording_id: recording_id.to_string(),
            started_at: Utc::now(),
            last_segment_at: None,
            segments_received: 0,
            bytes_received: 0,
            current_bitrate: bitrate.to_string(),
            buffer_health: INITIAL_BUFFER_HEALTH,
            connection_quality: ConnectionQuality::Excellent,
            is_active: true,
        }
    }

    pub fn record_delivery(&mut self, bytes: u64) {
        self.segments_received += 1;
        self.bytes_received += bytes;
        self.last_segment_at = Some(Utc::now());
    }

    /// Caller validates the range
    pub fn set_buffer_health(&mut self, health: f64) -> ConnectionQuality {
        self.buffer_health = health;
        self.connection_quality = ConnectionQuality::from_buffer_health(health);
        self.connection_quality
    }

    pub fn watch_time(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}
