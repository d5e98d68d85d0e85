//! Distributor events and their fan-out to subscribers

use super::session::ConnectionQuality;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DistributionEvent {
    ViewerJoined {
        recording_id: String,
        viewer_id: String,
        session_id: String,
        bitrate: String,
        timestamp: DateTime<Utc>,
    },
    ViewerLeft {
        recording_id: String,
        viewer_id: String,
        segments_received: u64,
        bytes_received: u64,
        timestamp: DateTime<Utc>,
    },
    SegmentDelivered {
        recording_id: String,
        viewer_id: String,
        segment_id: String,
        bytes: u64,
        timestamp: DateTime<Utc>,
    },
    QualitySwitched {
        recording_id: String,
        viewer_id: String,
        old_bitrate: String,
        new_bitrate: String,
        timestamp: DateTime<Utc>,
    },
    BufferUpdated {
        recording_id: String,
        viewer_id: String,
        buffer_health: f64,
        connection_quality: ConnectionQuality,
        timestamp: DateTime<Utc>,
    },
    SegmentsExpired {
        recording_id: String,
        count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl DistributionEvent {
    pub fn recording_id(&self) -> &str {
        match self {
            DistributionEvent::ViewerJoined { recording_id, .. } => recording_id,
            DistributionEvent::ViewerLeft { recording_id, .. } => recording_id,
            DistributionEvent::SegmentDelivered { recording_id, .. } => recording_id,
            DistributionEvent::QualitySwitched { recording_id, .. } => recording_id,
            DistributionEvent::BufferUpdated { recording_id, .. } => recording_id,
            DistributionEvent::SegmentsExpired { recording_id, .. } => recording_id,
        }
    }

    /// The viewer the event concerns, if any
    pub fn viewer_id(&self) -> Option<&str> {
        match self {
            DistributionEvent::ViewerJoined { viewer_id, .. }
            | DistributionEvent::ViewerLeft { viewer_id, .. }
            | DistributionEvent::SegmentDelivered { viewer_id, .. }
            | DistributionEvent::QualitySwitched { viewer_id, .. }
            | DistributionEvent::BufferUpdated { viewer_id, .. } => Some(viewer_id),
            DistributionEvent::SegmentsExpired { .. } => None,
        }
    }
}

/// Unbounded fan-out; subscribers whose stream was dropped are pruned on
/// the next publish
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<mpsc::UnboundedSender<DistributionEvent>>,
}

impl EventBus {
    pub fn subscribe(&mut self) -> UnboundedReceiverStream<DistributionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        UnboundedReceiverStream::new(rx)
    }

    pub fn publish(&mut self, event: DistributionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// End every subscriber stream
    pub fn close(&mut self) {
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let mut bus = EventBus::default();
        let mut kept = bus.subscribe();
        let dropped = bus.subscribe();
        drop(dropped);

        bus.publish(DistributionEvent::SegmentsExpired {
            recording_id: "rec-1".to_string(),
            count: 2,
            timestamp: Utc::now(),
        });

        assert_eq!(bus.subscriber_count(), 1);
        let event = kept.next().await.unwrap();
        assert_eq!(event.recording_id(), "rec-1");
        assert_eq!(event.viewer_id(), None);

        bus.close();
        assert!(kept.next().await.is_none());
    }
}
