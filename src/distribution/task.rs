use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryPriority {
    Low = 1,
    #[default]
    Normal = 2,
    /// Keyframes and first segments after a join
    High = 3,
}

/// One queued delivery of a segment to a viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDeliveryTask {
    pub id: String,
    pub recording_id: String,
    pub viewer_id: String,
    pub segment_id: String,
    pub priority: DeliveryPriority,
    pub created_at: DateTime<Utc>,
    /// Tries made so far
    pub attempts: u32,
    pub max_attempts: u32,
}

impl SegmentDeliveryTask {
    pub fn new(recording_id: &str, viewer_id: &str, segment_id: &str, max_attempts: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recording_id: recording_id.to_string(),
            viewer_id: viewer_id.to_string(),
            segment_id: segment_id.to_string(),
            priority: DeliveryPriority::default(),
            created_at: Utc::now(),
            attempts: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn with_priority(mut self, priority: DeliveryPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_budget() {
        let mut task = SegmentDeliveryTask::new("rec-1", "v1", "seg-1", 2);
        assert!(task.can_retry());
        task.attempts = 1;
        assert!(task.can_retry());
        task.attempts = 2;
        assert!(!task.can_retry());
    }

    #[test]
    fn priority_order() {
        assert!(DeliveryPriority::High > DeliveryPriority::Normal);
        assert!(DeliveryPriority::Normal > DeliveryPriority::Low);
    }
}
