//! Expiring video segments and the bounded per-recording segment queue

use super::error::DistributionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSegment {
    pub id: String,
    pub recording_id: String,
    /// Profile label, e.g. "720p"
    pub bitrate: String,
    pub sequence_number: u64,
    #[serde(rename = "duration_ms", with = "crate::config::duration_ms")]
    pub duration: Duration,
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_keyframe: bool,
    pub delivered_count: u64,
    pub failed_count: u64,
}

impl VideoSegment {
    pub fn new(
        recording_id: impl Into<String>,
        bitrate: impl Into<String>,
        sequence_number: u64,
        duration: Duration,
        file_path: impl Into<PathBuf>,
        size_bytes: u64,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recording_id: recording_id.into(),
            bitrate: bitrate.into(),
            sequence_number,
            duration,
            file_path: file_path.into(),
            size_bytes,
            created_at,
            expires_at,
            is_keyframe: false,
            delivered_count: 0,
            failed_count: 0,
        }
    }

    pub fn with_keyframe(mut self, is_keyframe: bool) -> Self {
        self.is_keyframe = is_keyframe;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn validate(&self) -> Result<(), DistributionError> {
        if self.id.trim().is_empty() {
            return Err(DistributionError::InvalidSegment("segment id is empty".to_string()));
        }
        if self.recording_id.trim().is_empty() {
            return Err(DistributionError::InvalidSegment(format!("segment {} has no recording", self.id)));
        }
        if self.bitrate.trim().is_empty() {
            return Err(DistributionError::InvalidSegment(format!("segment {} has no bitrate", self.id)));
        }
        if self.duration.is_zero() {
            return Err(DistributionError::InvalidSegment(format!("segment {} has zero duration", self.id)));
        }
        if self.expires_at <= self.created_at {
            return Err(DistributionError::InvalidSegment(format!("segment {} expires on creation", self.id)));
        }
        Ok(())
    }
}

/// Bounded, insertion-ordered segment store for one recording
#[derive(Debug)]
pub struct SegmentQueue {
    segments: HashMap<String, VideoSegment>,
    order: VecDeque<String>,
    max_size: usize,
}

impl SegmentQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            segments: HashMap::with_capacity(max_size),
            order: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, segment: VideoSegment) -> Result<(), DistributionError> {
        if self.segments.contains_key(&segment.id) {
            return Err(DistributionError::DuplicateSegment(segment.id));
        }
        if self.segments.len() >= self.max_size {
            return Err(DistributionError::SegmentQueueFull {
                capacity: self.max_size,
            });
        }
        if self.segments.is_empty() && !segment.is_keyframe {
            return Err(DistributionError::KeyframeRequired(segment.id));
        }
        self.order.push_back(segment.id.clone());
        self.segments.insert(segment.id.clone(), segment);
        Ok(())
    }

    pub fn get(&self, segment_id: &str) -> Option<&VideoSegment> {
        self.segments.get(segment_id)
    }

    pub fn get_mut(&mut self, segment_id: &str) -> Option<&mut VideoSegment> {
        self.segments.get_mut(segment_id)
    }

    /// Segments in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &VideoSegment> {
        self.order.iter().filter_map(|id| self.segments.get(id))
    }

    /// Drop every segment expired at `now`, returning their ids
    pub fn remove_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .segments
            .values()
            .filter(|segment| segment.is_expired_at(now))
            .map(|segment| segment.id.clone())
            .collect();
        if expired.is_empty() {
            return expired;
        }
        for id in &expired {
            self.segments.remove(id);
        }
        let segments = &self.segments;
        self.order.retain(|id| segments.contains_key(id));
        expired
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Fill level, 0.0 to 1.0
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        self.segments.len() as f64 / self.max_size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(sequence: u64, keyframe: bool, ttl: Duration) -> VideoSegment {
        VideoSegment::new("rec-1", "720p", sequence, Duration::from_secs(4), "/seg.ts", 1024, ttl)
            .with_keyframe(keyframe)
    }

    #[test]
    fn first_segment_must_be_keyframe() {
        let mut queue = SegmentQueue::new(4);
        let err = queue.push(segment(0, false, Duration::from_secs(60))).unwrap_err();
        assert!(matches!(err, DistributionError::KeyframeRequired(_)));

        queue.push(segment(0, true, Duration::from_secs(60))).unwrap();
        queue.push(segment(1, false, Duration::from_secs(60))).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let mut queue = SegmentQueue::new(4);
        let first = segment(0, true, Duration::from_secs(60)).with_id("seg-0");
        queue.push(first.clone()).unwrap();
        assert_eq!(queue.push(first), Err(DistributionError::DuplicateSegment("seg-0".to_string())));
    }

    #[test]
    fn expired_segments_are_swept_in_order() {
        let mut queue = SegmentQueue::new(4);
        queue.push(segment(0, true, Duration::from_secs(60)).with_id("a")).unwrap();
        queue.push(segment(1, false, Duration::from_millis(1)).with_id("b")).unwrap();
        queue.push(segment(2, false, Duration::from_secs(60)).with_id("c")).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(queue.remove_expired(later), vec!["b".to_string()]);

        let remaining: Vec<&str> = queue.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(remaining, vec!["a", "c"]);
        assert!((queue.utilization() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_duration_is_invalid() {
        let mut bad = segment(0, true, Duration::from_secs(60));
        bad.duration = Duration::ZERO;
        assert!(matches!(bad.validate(), Err(DistributionError::InvalidSegment(_))));
    }
}
