//! Per-recording live distributor

use super::error::DistributionError;
use super::events::{DistributionEvent, EventBus};
use super::metrics::DistributorStats;
use super::segment::{SegmentQueue, VideoSegment};
use super::session::{ConnectionQuality, ViewerSession};
use crate::catalog::{BitrateCatalog, BitrateLevel};
use crate::config::{ConfigError, DistributorConfig};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Sessions plus the counters that summarize them
#[derive(Debug, Default)]
struct ViewerRegistry {
    sessions: HashMap<String, ViewerSession>,
    peak_viewers: usize,
    segments_served: u64,
    bytes_served: u64,
}

struct Inner {
    recording_id: String,
    config: DistributorConfig,
    catalog: BitrateCatalog,
    started_at: DateTime<Utc>,
    closed: AtomicBool,
    // Lock order: viewers -> segments -> events
    viewers: RwLock<ViewerRegistry>,
    segments: RwLock<SegmentQueue>,
    events: Mutex<EventBus>,
}

/// Fans one recording's segments out to its viewers.
///
/// Clones share state. Once [`LiveDistributor::close`] has run every
/// mutating call fails with [`DistributionError::Closed`].
#[derive(Clone)]
pub struct LiveDistributor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LiveDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveDistributor")
            .field("recording_id", &self.inner.recording_id)
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LiveDistributor {
    pub fn new(recording_id: &str, config: DistributorConfig, catalog: BitrateCatalog) -> Result<Self, ConfigError> {
        config.validate()?;
        if recording_id.trim().is_empty() {
            return Err(ConfigError::Invalid("recording id is empty".to_string()));
        }
        let segments = SegmentQueue::new(config.max_segments);
        log::info!(
            "Opened distributor for recording {} (max {} viewers, {} segments)",
            recording_id,
            config.max_viewers,
            config.max_segments
        );
        Ok(Self {
            inner: Arc::new(Inner {
                recording_id: recording_id.to_string(),
                config,
                catalog,
                started_at: Utc::now(),
                closed: AtomicBool::new(false),
                viewers: RwLock::new(ViewerRegistry::default()),
                segments: RwLock::new(segments),
                events: Mutex::new(EventBus::default()),
            }),
        })
    }

    pub fn recording_id(&self) -> &str {
        &self.inner.recording_id
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.inner.config
    }

    /// Delivery profiles, ascending by bitrate
    pub fn profiles(&self) -> &[BitrateLevel] {
        self.inner.catalog.levels()
    }

    pub fn catalog(&self) -> &BitrateCatalog {
        &self.inner.catalog
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), DistributionError> {
        if self.is_closed() {
            return Err(DistributionError::Closed(self.inner.recording_id.clone()));
        }
        Ok(())
    }

    fn ensure_profile(&self, label: &str) -> Result<(), DistributionError> {
        if !self.inner.catalog.contains_label(label) {
            return Err(DistributionError::UnknownProfile(label.to_string()));
        }
        Ok(())
    }

    async fn publish(&self, event: DistributionEvent) {
        self.inner.events.lock().await.publish(event);
    }

    /// Segment for this recording using the configured lifetime
    pub fn new_segment(
        &self,
        bitrate: &str,
        sequence_number: u64,
        duration: Duration,
        file_path: impl Into<PathBuf>,
        size_bytes: u64,
    ) -> VideoSegment {
        VideoSegment::new(
            self.inner.recording_id.clone(),
            bitrate,
            sequence_number,
            duration,
            file_path,
            size_bytes,
            self.inner.config.segment_ttl,
        )
    }

    pub async fn enqueue_segment(&self, segment: VideoSegment) -> Result<(), DistributionError> {
        self.ensure_open()?;
        segment.validate()?;
        if segment.recording_id != self.inner.recording_id {
            return Err(DistributionError::InvalidSegment(format!(
                "segment {} belongs to recording {}",
                segment.id, segment.recording_id
            )));
        }
        self.ensure_profile(&segment.bitrate)?;

        let mut segments = self.inner.segments.write().await;
        // Re-check under the lock so a concurrent close cannot be raced
        self.ensure_open()?;
        let segment_id = segment.id.clone();
        segments.push(segment)?;
        log::debug!(
            "Queued segment {} for recording {} ({}/{})",
            segment_id,
            self.inner.recording_id,
            segments.len(),
            segments.capacity()
        );
        Ok(())
    }

    pub async fn join_viewer(&self, viewer_id: &str, bitrate: &str) -> Result<ViewerSession, DistributionError> {
        self.ensure_open()?;
        if viewer_id.trim().is_empty() {
            return Err(DistributionError::InvalidArgument("viewer id is empty".to_string()));
        }
        self.ensure_profile(bitrate)?;

        let mut viewers = self.inner.viewers.write().await;
        self.ensure_open()?;
        if viewers.sessions.contains_key(viewer_id) {
            return Err(DistributionError::DuplicateViewer(viewer_id.to_string()));
        }
        if viewers.sessions.len() >= self.inner.config.max_viewers {
            return Err(DistributionError::MaxViewersReached {
                max: self.inner.config.max_viewers,
            });
        }

        let session = ViewerSession::new(viewer_id, &self.inner.recording_id, bitrate);
        viewers.sessions.insert(viewer_id.to_string(), session.clone());
        viewers.peak_viewers = viewers.peak_viewers.max(viewers.sessions.len());

        self.publish(DistributionEvent::ViewerJoined {
            recording_id: self.inner.recording_id.clone(),
            viewer_id: viewer_id.to_string(),
            session_id: session.session_id.clone(),
            bitrate: bitrate.to_string(),
            timestamp: Utc::now(),
        })
        .await;
        log::info!(
            "Viewer {} joined recording {} at {} ({} watching)",
            viewer_id,
            self.inner.recording_id,
            bitrate,
            viewers.sessions.len()
        );
        Ok(session)
    }

    /// Remove a viewer, returning the final state of its session
    pub async fn leave_viewer(&self, viewer_id: &str) -> Result<ViewerSession, DistributionError> {
        self.ensure_open()?;
        let mut viewers = self.inner.viewers.write().await;
        let mut session = viewers
            .sessions
            .remove(viewer_id)
            .ok_or_else(|| DistributionError::ViewerNotFound(viewer_id.to_string()))?;
        session.is_active = false;

        self.publish(DistributionEvent::ViewerLeft {
            recording_id: self.inner.recording_id.clone(),
            viewer_id: viewer_id.to_string(),
            segments_received: session.segments_received,
            bytes_received: session.bytes_received,
            timestamp: Utc::now(),
        })
        .await;
        log::info!("Viewer {} left recording {}", viewer_id, self.inner.recording_id);
        Ok(session)
    }

    /// Hand a queued segment to a viewer. Either every counter moves or
    /// none does.
    pub async fn deliver_segment(&self, viewer_id: &str, segment_id: &str) -> Result<VideoSegment, DistributionError> {
        self.ensure_open()?;
        let mut viewers = self.inner.viewers.write().await;
        let mut segments = self.inner.segments.write().await;

        let session = viewers
            .sessions
            .get(viewer_id)
            .ok_or_else(|| DistributionError::ViewerNotFound(viewer_id.to_string()))?;
        let segment = segments
            .get(segment_id)
            .filter(|segment| !segment.is_expired())
            .ok_or_else(|| DistributionError::SegmentNotFound(segment_id.to_string()))?;
        if segment.bitrate != session.current_bitrate {
            return Err(DistributionError::BitrateMismatch {
                viewer_id: viewer_id.to_string(),
                session_bitrate: session.current_bitrate.clone(),
                segment_bitrate: segment.bitrate.clone(),
            });
        }
        let bytes = segment.size_bytes;

        if let Some(session) = viewers.sessions.get_mut(viewer_id) {
            session.record_delivery(bytes);
        }
        viewers.segments_served += 1;
        viewers.bytes_served += bytes;

        let delivered = match segments.get_mut(segment_id) {
            Some(segment) => {
                segment.delivered_count += 1;
                segment.clone()
            }
            None => return Err(DistributionError::SegmentNotFound(segment_id.to_string())),
        };

        self.publish(DistributionEvent::SegmentDelivered {
            recording_id: self.inner.recording_id.clone(),
            viewer_id: viewer_id.to_string(),
            segment_id: segment_id.to_string(),
            bytes,
            timestamp: Utc::now(),
        })
        .await;
        Ok(delivered)
    }

    /// Count a delivery that will not be retried against its segment
    pub async fn record_delivery_failure(&self, segment_id: &str) {
        if let Some(segment) = self.inner.segments.write().await.get_mut(segment_id) {
            segment.failed_count += 1;
        }
    }

    pub async fn switch_bitrate(&self, viewer_id: &str, bitrate: &str) -> Result<(), DistributionError> {
        self.ensure_open()?;
        self.ensure_profile(bitrate)?;

        let mut viewers = self.inner.viewers.write().await;
        let session = viewers
            .sessions
            .get_mut(viewer_id)
            .ok_or_else(|| DistributionError::ViewerNotFound(viewer_id.to_string()))?;
        if session.current_bitrate == bitrate {
            return Ok(());
        }
        let old_bitrate = std::mem::replace(&mut session.current_bitrate, bitrate.to_string());

        log::info!(
            "Viewer {} on recording {} switched {} -> {}",
            viewer_id,
            self.inner.recording_id,
            old_bitrate,
            bitrate
        );
        self.publish(DistributionEvent::QualitySwitched {
            recording_id: self.inner.recording_id.clone(),
            viewer_id: viewer_id.to_string(),
            old_bitrate,
            new_bitrate: bitrate.to_string(),
            timestamp: Utc::now(),
        })
        .await;
        Ok(())
    }

    pub async fn update_viewer_buffer(
        &self,
        viewer_id: &str,
        buffer_health: f64,
    ) -> Result<ConnectionQuality, DistributionError> {
        self.ensure_open()?;
        if !(0.0..=100.0).contains(&buffer_health) {
            return Err(DistributionError::InvalidBufferHealth(buffer_health));
        }

        let mut viewers = self.inner.viewers.write().await;
        let session = viewers
            .sessions
            .get_mut(viewer_id)
            .ok_or_else(|| DistributionError::ViewerNotFound(viewer_id.to_string()))?;
        let quality = session.set_buffer_health(buffer_health);

        self.publish(DistributionEvent::BufferUpdated {
            recording_id: self.inner.recording_id.clone(),
            viewer_id: viewer_id.to_string(),
            buffer_health,
            connection_quality: quality,
            timestamp: Utc::now(),
        })
        .await;
        Ok(quality)
    }

    pub async fn session(&self, viewer_id: &str) -> Option<ViewerSession> {
        self.inner.viewers.read().await.sessions.get(viewer_id).cloned()
    }

    pub async fn sessions(&self) -> Vec<ViewerSession> {
        let viewers = self.inner.viewers.read().await;
        let mut sessions: Vec<ViewerSession> = viewers.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    pub async fn viewer_count(&self) -> usize {
        self.inner.viewers.read().await.sessions.len()
    }

    pub async fn segment(&self, segment_id: &str) -> Option<VideoSegment> {
        self.inner.segments.read().await.get(segment_id).cloned()
    }

    pub async fn segment_count(&self) -> usize {
        self.inner.segments.read().await.len()
    }

    /// Evict expired segments, returning how many were removed
    pub async fn cleanup_expired_segments(&self) -> usize {
        let removed = self.inner.segments.write().await.remove_expired(Utc::now());
        if !removed.is_empty() {
            log::debug!(
                "Evicted {} expired segments from recording {}",
                removed.len(),
                self.inner.recording_id
            );
            self.publish(DistributionEvent::SegmentsExpired {
                recording_id: self.inner.recording_id.clone(),
                count: removed.len(),
                timestamp: Utc::now(),
            })
            .await;
        }
        removed.len()
    }

    pub async fn stats(&self) -> DistributorStats {
        let viewers = self.inner.viewers.read().await;
        let segments = self.inner.segments.read().await;
        DistributorStats {
            recording_id: self.inner.recording_id.clone(),
            active_viewers: viewers.sessions.len(),
            peak_viewers: viewers.peak_viewers,
            segments_served: viewers.segments_served,
            bytes_served: viewers.bytes_served,
            queued_segments: segments.len(),
            queue_utilization: segments.utilization(),
            started_at: self.inner.started_at,
            is_closed: self.is_closed(),
        }
    }

    /// Event stream for this distributor; it ends when the distributor closes
    pub async fn subscribe(&self) -> UnboundedReceiverStream<DistributionEvent> {
        self.inner.events.lock().await.subscribe()
    }

    /// Drop every session and segment. Terminal; later calls are no-ops.
    pub async fn close(&self) {
        let mut viewers = self.inner.viewers.write().await;
        let mut segments = self.inner.segments.write().await;
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped_viewers = viewers.sessions.len();
        viewers.sessions.clear();
        segments.clear();
        self.inner.events.lock().await.close();
        log::info!(
            "Closed distributor for recording {} ({} viewers dropped)",
            self.inner.recording_id,
            dropped_viewers
        );
    }
}
