//! Multi-recording distribution service with a shared delivery worker pool

use super::adaptation::target_level;
use super::distributor::LiveDistributor;
use super::error::DistributionError;
use super::metrics::{DeliveryCounters, DistributorStats, ServiceMetrics};
use super::segment::VideoSegment;
use super::session::ViewerSession;
use super::task::{DeliveryPriority, SegmentDeliveryTask};
use crate::catalog::{BitrateCatalog, BitrateLevel};
use crate::config::{ConfigError, DistributorConfig, ServiceConfig};
use crate::queue::{QueueError, TaskQueue};
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

struct ServiceInner {
    config: ServiceConfig,
    catalog: BitrateCatalog,
    distributors: RwLock<HashMap<String, LiveDistributor>>,
    tasks: TaskQueue<SegmentDeliveryTask>,
    counters: DeliveryCounters,
    stopped: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

/// Owns every live distributor and the workers that deliver queued
/// segments to viewers.
#[derive(Clone)]
pub struct DistributionService {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for DistributionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionService")
            .field("config", &self.inner.config)
            .field("queued_tasks", &self.inner.tasks.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl DistributionService {
    pub fn new(config: ServiceConfig, catalog: BitrateCatalog) -> Result<Self, ConfigError> {
        config.validate()?;
        let tasks = TaskQueue::bounded(config.task_queue_size);
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                catalog,
                distributors: RwLock::new(HashMap::new()),
                tasks,
                counters: DeliveryCounters::default(),
                stopped: AtomicBool::new(false),
                background: Mutex::new(Vec::new()),
                shutdown,
            }),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &BitrateCatalog {
        &self.inner.catalog
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), DistributionError> {
        if self.is_stopped() {
            return Err(DistributionError::ServiceStopped);
        }
        Ok(())
    }

    /// Spawn the delivery workers and the expired-segment sweep. Calling it
    /// again is a no-op.
    pub async fn start(&self) -> Result<(), DistributionError> {
        self.ensure_running()?;
        let mut background = self.inner.background.lock().await;
        if !background.is_empty() {
            return Ok(());
        }

        for worker_id in 0..self.inner.config.worker_count {
            let service = self.clone();
            background.push(tokio::spawn(async move { service.run_worker(worker_id).await }));
        }
        let service = self.clone();
        let shutdown = self.inner.shutdown.subscribe();
        background.push(tokio::spawn(async move { service.run_cleanup(shutdown).await }));

        log::info!(
            "Distribution service started with {} delivery workers, sweeping every {:?}",
            self.inner.config.worker_count,
            self.inner.config.cleanup_interval
        );
        Ok(())
    }

    /// Stop accepting work, let the workers drain the task queue, then close
    /// every distributor
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Stopping distribution service ({} queued tasks)", self.inner.tasks.len());
        self.inner.shutdown.send_replace(true);
        self.inner.tasks.close();

        let handles: Vec<JoinHandle<()>> = self.inner.background.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Distribution worker panicked: {}", e);
            }
        }

        let distributors: Vec<LiveDistributor> = self.inner.distributors.write().await.drain().map(|(_, d)| d).collect();
        for distributor in distributors {
            distributor.close().await;
        }
        log::info!("Distribution service stopped");
    }

    /// Open a distributor for `recording_id` with the service defaults
    pub async fn start_distribution(&self, recording_id: &str) -> Result<LiveDistributor, DistributionError> {
        self.start_distribution_with(recording_id, self.inner.config.distributor.clone())
            .await
    }

    /// Open a distributor admitting at most `max_viewers`; other settings
    /// come from the service defaults
    pub async fn start_distribution_with_limit(
        &self,
        recording_id: &str,
        max_viewers: usize,
    ) -> Result<LiveDistributor, DistributionError> {
        let config = self.inner.config.distributor.clone().max_viewers(max_viewers);
        self.start_distribution_with(recording_id, config).await
    }

    /// Open a distributor for `recording_id` with its own settings
    pub async fn start_distribution_with(
        &self,
        recording_id: &str,
        config: DistributorConfig,
    ) -> Result<LiveDistributor, DistributionError> {
        self.ensure_running()?;
        let mut distributors = self.inner.distributors.write().await;
        if distributors.contains_key(recording_id) {
            return Err(DistributionError::DuplicateRecording(recording_id.to_string()));
        }
        let distributor = LiveDistributor::new(recording_id, config, self.inner.catalog.clone())
            .map_err(|e| DistributionError::InvalidArgument(e.to_string()))?;
        log::info!(
            "Started distribution for {} (max {} viewers)",
            recording_id,
            distributor.config().max_viewers
        );
        distributors.insert(recording_id.to_string(), distributor.clone());
        Ok(distributor)
    }

    /// Close and forget a distributor, returning its final stats
    pub async fn stop_distribution(&self, recording_id: &str) -> Result<DistributorStats, DistributionError> {
        let distributor = self
            .inner
            .distributors
            .write()
            .await
            .remove(recording_id)
            .ok_or_else(|| DistributionError::DistributorNotFound(recording_id.to_string()))?;
        let stats = distributor.stats().await;
        distributor.close().await;
        Ok(stats)
    }

    pub async fn distributor(&self, recording_id: &str) -> Option<LiveDistributor> {
        self.inner.distributors.read().await.get(recording_id).cloned()
    }

    async fn require(&self, recording_id: &str) -> Result<LiveDistributor, DistributionError> {
        self.distributor(recording_id)
            .await
            .ok_or_else(|| DistributionError::DistributorNotFound(recording_id.to_string()))
    }

    pub async fn recording_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.distributors.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn enqueue_segment(&self, recording_id: &str, segment: VideoSegment) -> Result<(), DistributionError> {
        self.require(recording_id).await?.enqueue_segment(segment).await
    }

    pub async fn join_viewer(
        &self,
        recording_id: &str,
        viewer_id: &str,
        bitrate: &str,
    ) -> Result<ViewerSession, DistributionError> {
        self.ensure_running()?;
        self.require(recording_id).await?.join_viewer(viewer_id, bitrate).await
    }

    pub async fn leave_viewer(&self, recording_id: &str, viewer_id: &str) -> Result<ViewerSession, DistributionError> {
        self.require(recording_id).await?.leave_viewer(viewer_id).await
    }

    /// Deliver immediately on the caller's task
    pub async fn deliver_segment(
        &self,
        recording_id: &str,
        viewer_id: &str,
        segment_id: &str,
    ) -> Result<VideoSegment, DistributionError> {
        self.require(recording_id).await?.deliver_segment(viewer_id, segment_id).await
    }

    /// Queue a delivery for the worker pool without waiting. Returns the
    /// task id.
    pub async fn submit_delivery(
        &self,
        recording_id: &str,
        viewer_id: &str,
        segment_id: &str,
        priority: DeliveryPriority,
    ) -> Result<String, DistributionError> {
        self.ensure_running()?;
        self.require(recording_id).await?;

        let task = SegmentDeliveryTask::new(recording_id, viewer_id, segment_id, self.inner.config.max_attempts)
            .with_priority(priority);
        let task_id = task.id.clone();
        self.inner.tasks.try_enqueue(task).map_err(|e| match e {
            QueueError::QueueFull => DistributionError::TaskQueueFull,
            QueueError::QueueClosed | QueueError::ChannelDisconnected => DistributionError::ServiceStopped,
        })?;
        Ok(task_id)
    }

    /// Apply the buffer-health ladder to one viewer and return the level it
    /// is now served at
    pub async fn adapt_viewer_quality(
        &self,
        recording_id: &str,
        viewer_id: &str,
        buffer_health: f64,
    ) -> Result<BitrateLevel, DistributionError> {
        if !(0.0..=100.0).contains(&buffer_health) {
            return Err(DistributionError::InvalidBufferHealth(buffer_health));
        }
        let distributor = self.require(recording_id).await?;
        distributor.update_viewer_buffer(viewer_id, buffer_health).await?;

        let session = distributor
            .session(viewer_id)
            .await
            .ok_or_else(|| DistributionError::ViewerNotFound(viewer_id.to_string()))?;
        let target = target_level(distributor.catalog(), &session.current_bitrate, buffer_health)
            .ok_or_else(|| DistributionError::UnknownProfile(session.current_bitrate.clone()))?
            .clone();
        if target.label != session.current_bitrate {
            distributor.switch_bitrate(viewer_id, &target.label).await?;
        }
        Ok(target)
    }

    /// Sweep every distributor, returning the number of segments evicted
    pub async fn cleanup_expired_segments(&self) -> usize {
        let distributors: Vec<LiveDistributor> = self.inner.distributors.read().await.values().cloned().collect();
        let mut removed = 0;
        for distributor in distributors {
            removed += distributor.cleanup_expired_segments().await;
        }
        removed
    }

    pub async fn metrics(&self) -> ServiceMetrics {
        let distributors: Vec<LiveDistributor> = self.inner.distributors.read().await.values().cloned().collect();
        let mut active_viewers = 0;
        let mut segments_served = 0;
        let mut bytes_served = 0;
        for distributor in &distributors {
            let stats = distributor.stats().await;
            active_viewers += stats.active_viewers;
            segments_served += stats.segments_served;
            bytes_served += stats.bytes_served;
        }

        ServiceMetrics {
            distributors: distributors.len(),
            active_viewers,
            segments_served,
            bytes_served,
            deliveries_completed: self.inner.counters.completed(),
            deliveries_failed: self.inner.counters.failed(),
            deliveries_retried: self.inner.counters.retried(),
            queued_tasks: self.inner.tasks.len(),
            cdn_hit_rate: None,
            timestamp: Utc::now(),
        }
    }

    async fn run_worker(self, worker_id: usize) {
        log::debug!("Delivery worker {} started", worker_id);
        let mut tasks = self.inner.tasks.dequeue();
        while let Some(task) = tasks.next().await {
            self.process_task(task).await;
        }
        log::debug!("Delivery worker {} stopped", worker_id);
    }

    async fn run_cleanup(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.inner.config.cleanup_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        if *shutdown.borrow_and_update() {
            return;
        }
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.cleanup_expired_segments().await;
                    if removed > 0 {
                        log::info!("Cleanup sweep evicted {} expired segments", removed);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn process_task(&self, mut task: SegmentDeliveryTask) {
        task.attempts += 1;
        let distributor = self.distributor(&task.recording_id).await;
        let result = match &distributor {
            Some(distributor) => distributor
                .deliver_segment(&task.viewer_id, &task.segment_id)
                .await
                .map(|_| ()),
            None => Err(DistributionError::DistributorNotFound(task.recording_id.clone())),
        };

        match result {
            Ok(()) => self.inner.counters.record_completed(),
            Err(e) if e.is_retryable() && task.can_retry() => match self.inner.config.retry_policy.delay_for(task.attempts) {
                Some(delay) => self.retry(task, delay, e),
                None => self.fail(task, e, distributor.as_ref()).await,
            },
            Err(e) => self.fail(task, e, distributor.as_ref()).await,
        }
    }

    fn retry(&self, task: SegmentDeliveryTask, delay: Duration, error: DistributionError) {
        log::warn!(
            "Delivery of segment {} to viewer {} failed (attempt {}/{}): {}; retrying in {:?}",
            task.segment_id,
            task.viewer_id,
            task.attempts,
            task.max_attempts,
            error,
            delay
        );
        self.inner.counters.record_retried();

        let service = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let recording_id = task.recording_id.clone();
            let segment_id = task.segment_id.clone();
            if let Err(e) = service.inner.tasks.try_enqueue(task) {
                log::error!("Could not re-queue delivery of segment {}: {}", segment_id, e);
                if let Some(distributor) = service.distributor(&recording_id).await {
                    distributor.record_delivery_failure(&segment_id).await;
                }
                service.inner.counters.record_failed();
            }
        });
    }

    async fn fail(&self, task: SegmentDeliveryTask, error: DistributionError, distributor: Option<&LiveDistributor>) {
        log::error!(
            "Delivery of segment {} to viewer {} on recording {} failed permanently after {} attempts: {}",
            task.segment_id,
            task.viewer_id,
            task.recording_id,
            task.attempts,
            error
        );
        if let Some(distributor) = distributor {
            distributor.record_delivery_failure(&task.segment_id).await;
        }
        self.inner.counters.record_failed();
    }
}
