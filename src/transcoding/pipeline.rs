//! Job table, worker pool and playlist generation

use super::encoder::{EncodeRequest, Encoder, EncoderError};
use super::error::TranscodingError;
use super::job::{JobStatus, TranscodingJob};
use super::playlist::{master_playlist, variant_playlist};
use super::progress::{JobProgress, RecordingProgress};
use super::queue::{TranscodingQueue, TranscodingQueueStats};
use crate::catalog::{BitrateCatalog, BitrateLevel};
use crate::config::{ConfigError, TranscodingConfig};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Cooperative cancellation flag shared between the pipeline and an encoder
#[derive(Debug, Default)]
struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct JobEntry {
    job: TranscodingJob,
    cancel: Arc<CancelSignal>,
}

#[derive(Default)]
struct Observers {
    by_job: HashMap<String, Vec<mpsc::UnboundedSender<JobProgress>>>,
    all: Vec<mpsc::UnboundedSender<JobProgress>>,
}

impl Observers {
    fn publish(&mut self, event: &JobProgress) {
        if let Some(senders) = self.by_job.get_mut(&event.job_id) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
        if event.status.is_terminal() {
            // Dropping the senders ends the per-job streams
            self.by_job.remove(&event.job_id);
        }
        self.all.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

struct Shared {
    config: TranscodingConfig,
    catalog: BitrateCatalog,
    encoder: Arc<dyn Encoder>,
    // Lock order: queue -> jobs -> observers
    queue: Mutex<TranscodingQueue>,
    jobs: RwLock<HashMap<String, JobEntry>>,
    observers: Mutex<Observers>,
    work_ready: Notify,
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Multi-bitrate transcoding pipeline.
///
/// Cheap to clone; every clone drives the same job table and worker pool.
/// Jobs stay queued until [`TranscodingPipeline::start`] spawns the workers.
#[derive(Clone)]
pub struct TranscodingPipeline {
    shared: Arc<Shared>,
}

/// Given to the encoder for the duration of one job
#[derive(Clone)]
pub struct JobHandle {
    job_id: String,
    cancel: Arc<CancelSignal>,
    pipeline: TranscodingPipeline,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the job has been cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.cancel.notify.notified();
            if self.cancel.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    pub async fn report_progress(&self, percent: f64, speed: f64) -> Result<(), TranscodingError> {
        self.pipeline.update_job_progress(&self.job_id, percent, speed).await
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl fmt::Debug for TranscodingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscodingPipeline")
            .field("config", &self.shared.config)
            .field("profiles", &self.shared.catalog.labels())
            .finish()
    }
}

impl TranscodingPipeline {
    pub fn new(
        config: TranscodingConfig,
        catalog: BitrateCatalog,
        encoder: Arc<dyn Encoder>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let queue = TranscodingQueue::new(config.queue_size, config.max_concurrent_jobs);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                catalog,
                encoder,
                queue: Mutex::new(queue),
                jobs: RwLock::new(HashMap::new()),
                observers: Mutex::new(Observers::default()),
                work_ready: Notify::new(),
                shutdown: AtomicBool::new(false),
                workers: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &TranscodingConfig {
        &self.shared.config
    }

    /// Profiles every recording is transcoded into
    pub fn profiles(&self) -> &[BitrateLevel] {
        self.shared.catalog.levels()
    }

    fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Spawn `max_concurrent_jobs` workers. Calling it again is a no-op.
    pub async fn start(&self) -> Result<(), TranscodingError> {
        if self.is_shut_down() {
            return Err(TranscodingError::ShutDown);
        }
        let mut workers = self.shared.workers.lock().await;
        if !workers.is_empty() {
            return Ok(());
        }
        for worker_id in 0..self.shared.config.max_concurrent_jobs {
            let pipeline = self.clone();
            workers.push(tokio::spawn(async move { pipeline.run_worker(worker_id).await }));
        }
        log::info!(
            "Transcoding pipeline started with {} workers",
            self.shared.config.max_concurrent_jobs
        );
        Ok(())
    }

    /// Stop accepting jobs, cancel everything unfinished and wait for the
    /// workers to exit
    pub async fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let unfinished: Vec<String> = {
            let jobs = self.shared.jobs.read().await;
            jobs.values()
                .filter(|entry| !entry.job.is_terminal())
                .map(|entry| entry.job.id.clone())
                .collect()
        };
        for job_id in unfinished {
            if let Err(e) = self.cancel_job(&job_id).await {
                log::warn!("Failed to cancel job {} during shutdown: {}", job_id, e);
            }
        }
        self.shared.work_ready.notify_waiters();

        let workers: Vec<JoinHandle<()>> = self.shared.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                log::error!("Transcoding worker panicked: {}", e);
            }
        }
        log::info!("Transcoding pipeline shut down");
    }

    /// Queue one job per catalog profile for `recording_id`.
    ///
    /// Admission is all-or-nothing: either every profile is queued or none
    /// is. Finished jobs from an earlier run of the same recording are
    /// replaced; a recording with unfinished jobs is rejected.
    pub async fn queue_multi_bitrate_job(
        &self,
        recording_id: &str,
        input_path: impl AsRef<Path>,
    ) -> Result<Vec<String>, TranscodingError> {
        if self.is_shut_down() {
            return Err(TranscodingError::ShutDown);
        }
        let input_path = input_path.as_ref();
        if recording_id.trim().is_empty() {
            return Err(TranscodingError::InvalidInput("recording id is empty".to_string()));
        }
        if input_path.as_os_str().is_empty() {
            return Err(TranscodingError::InvalidInput("input path is empty".to_string()));
        }

        let new_jobs: Vec<TranscodingJob> = self
            .profiles()
            .iter()
            .map(|profile| {
                TranscodingJob::new(recording_id, profile.clone(), input_path, &self.shared.config.output_dir)
            })
            .collect();

        let mut queue = self.shared.queue.lock().await;
        if !queue.has_capacity_for(new_jobs.len()) {
            log::warn!(
                "Rejecting recording {}: queue holds {}/{}",
                recording_id,
                queue.len(),
                self.shared.config.queue_size
            );
            return Err(TranscodingError::QueueFull {
                capacity: self.shared.config.queue_size,
                pending: queue.len(),
                requested: new_jobs.len(),
            });
        }

        let mut jobs = self.shared.jobs.write().await;
        let previous: Vec<String> = jobs
            .values()
            .filter(|entry| entry.job.recording_id == recording_id)
            .map(|entry| {
                if entry.job.is_terminal() {
                    Ok(entry.job.id.clone())
                } else {
                    Err(TranscodingError::RecordingInProgress(recording_id.to_string()))
                }
            })
            .collect::<Result<_, _>>()?;
        for job_id in previous {
            jobs.remove(&job_id);
        }

        let mut observers = self.shared.observers.lock().await;
        let mut job_ids = Vec::with_capacity(new_jobs.len());
        for job in new_jobs {
            queue.push(job.id.clone())?;
            observers.publish(&JobProgress::from_job(&job));
            job_ids.push(job.id.clone());
            jobs.insert(
                job.id.clone(),
                JobEntry {
                    job,
                    cancel: Arc::new(CancelSignal::default()),
                },
            );
        }
        drop(observers);
        drop(jobs);
        drop(queue);

        self.shared.work_ready.notify_waiters();
        log::info!("Queued {} renditions for recording {}", job_ids.len(), recording_id);
        Ok(job_ids)
    }

    pub async fn job(&self, job_id: &str) -> Option<TranscodingJob> {
        self.shared.jobs.read().await.get(job_id).map(|entry| entry.job.clone())
    }

    /// Jobs of one recording, ordered by bitrate
    pub async fn jobs_for_recording(&self, recording_id: &str) -> Vec<TranscodingJob> {
        let jobs = self.shared.jobs.read().await;
        let mut found: Vec<TranscodingJob> = jobs
            .values()
            .filter(|entry| entry.job.recording_id == recording_id)
            .map(|entry| entry.job.clone())
            .collect();
        found.sort_by_key(|job| job.profile.bitrate_kbps);
        found
    }

    /// Record a progress report; the latest report wins. Reports for jobs
    /// that already finished are ignored.
    pub async fn update_job_progress(&self, job_id: &str, percent: f64, speed: f64) -> Result<(), TranscodingError> {
        if !percent.is_finite() {
            return Err(TranscodingError::InvalidInput(format!("progress {} is not a number", percent)));
        }
        let mut jobs = self.shared.jobs.write().await;
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| TranscodingError::JobNotFound(job_id.to_string()))?;
        if entry.job.is_terminal() {
            return Ok(());
        }
        entry.job.set_progress(percent, speed);
        self.shared.observers.lock().await.publish(&JobProgress::from_job(&entry.job));
        Ok(())
    }

    /// Cancel a queued or running job. Already finished jobs are left as
    /// they are and the call still succeeds. Returns whether this call
    /// moved the job to `cancelled`.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool, TranscodingError> {
        let was_queued = {
            let mut jobs = self.shared.jobs.write().await;
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| TranscodingError::JobNotFound(job_id.to_string()))?;
            if entry.job.is_terminal() {
                return Ok(false);
            }
            let was_queued = entry.job.status == JobStatus::Queued;
            entry.job.mark_cancelled()?;
            entry.cancel.cancel();
            self.shared.observers.lock().await.publish(&JobProgress::from_job(&entry.job));
            was_queued
        };

        if was_queued {
            self.shared.queue.lock().await.remove(job_id);
        }
        log::info!("Cancelled job {}", job_id);
        Ok(true)
    }

    /// Cancel every unfinished job of a recording, returning how many were
    /// cancelled. Jobs that finish on their own meanwhile are not counted.
    pub async fn cancel_recording(&self, recording_id: &str) -> Result<usize, TranscodingError> {
        let jobs = self.jobs_for_recording(recording_id).await;
        if jobs.is_empty() {
            return Err(TranscodingError::RecordingNotFound(recording_id.to_string()));
        }
        let mut cancelled = 0;
        for job in jobs.iter().filter(|job| !job.is_terminal()) {
            if self.cancel_job(&job.id).await? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// True when the recording has at least one job and all of them completed
    pub async fn is_recording_completed(&self, recording_id: &str) -> bool {
        let jobs = self.shared.jobs.read().await;
        let mut any = false;
        for entry in jobs.values().filter(|entry| entry.job.recording_id == recording_id) {
            if entry.job.status != JobStatus::Completed {
                return false;
            }
            any = true;
        }
        any
    }

    pub async fn recording_progress(&self, recording_id: &str) -> Result<RecordingProgress, TranscodingError> {
        let jobs = self.jobs_for_recording(recording_id).await;
        if jobs.is_empty() {
            return Err(TranscodingError::RecordingNotFound(recording_id.to_string()));
        }
        Ok(RecordingProgress::from_jobs(recording_id, jobs))
    }

    /// Progress events for one job. The current state is sent first; the
    /// stream ends once the job reaches a terminal state.
    pub async fn subscribe_job(&self, job_id: &str) -> Result<UnboundedReceiverStream<JobProgress>, TranscodingError> {
        let jobs = self.shared.jobs.read().await;
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| TranscodingError::JobNotFound(job_id.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, so the snapshot send cannot fail
        let _ = tx.send(JobProgress::from_job(&entry.job));
        if !entry.job.is_terminal() {
            self.shared
                .observers
                .lock()
                .await
                .by_job
                .entry(job_id.to_string())
                .or_default()
                .push(tx);
        }
        Ok(UnboundedReceiverStream::new(rx))
    }

    /// Progress events for every job
    pub async fn subscribe_all(&self) -> UnboundedReceiverStream<JobProgress> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.observers.lock().await.all.push(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Master playlist over the recording's renditions. Does not check that
    /// transcoding finished; see [`TranscodingPipeline::ready_master_playlist`].
    pub async fn generate_master_playlist(&self, recording_id: &str) -> Result<String, TranscodingError> {
        let jobs = self.jobs_for_recording(recording_id).await;
        if jobs.is_empty() {
            return Err(TranscodingError::RecordingNotFound(recording_id.to_string()));
        }
        let mut profiles: Vec<BitrateLevel> = jobs.into_iter().map(|job| job.profile).collect();
        profiles.dedup_by_key(|profile| profile.bitrate_kbps);
        Ok(master_playlist(recording_id, &profiles))
    }

    pub async fn generate_variant_playlist(
        &self,
        recording_id: &str,
        bitrate_kbps: u32,
    ) -> Result<String, TranscodingError> {
        let jobs = self.jobs_for_recording(recording_id).await;
        if jobs.is_empty() {
            return Err(TranscodingError::RecordingNotFound(recording_id.to_string()));
        }
        if !jobs.iter().any(|job| job.profile.bitrate_kbps == bitrate_kbps) {
            return Err(TranscodingError::RenditionNotFound {
                recording_id: recording_id.to_string(),
                bitrate_kbps,
            });
        }
        Ok(variant_playlist(recording_id, bitrate_kbps))
    }

    /// Master playlist, only once every rendition completed
    pub async fn ready_master_playlist(&self, recording_id: &str) -> Result<String, TranscodingError> {
        if !self.is_recording_completed(recording_id).await {
            if self.jobs_for_recording(recording_id).await.is_empty() {
                return Err(TranscodingError::RecordingNotFound(recording_id.to_string()));
            }
            return Err(TranscodingError::RecordingNotReady(recording_id.to_string()));
        }
        self.generate_master_playlist(recording_id).await
    }

    pub async fn queue_stats(&self) -> TranscodingQueueStats {
        self.shared.queue.lock().await.stats()
    }

    async fn run_worker(self, worker_id: usize) {
        log::debug!("Transcoding worker {} started", worker_id);
        loop {
            let notified = self.shared.work_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_shut_down() {
                break;
            }

            let next = self.shared.queue.lock().await.try_start();
            match next {
                Some(job_id) => self.process_job(worker_id, &job_id).await,
                None => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(self.shared.config.idle_poll_interval) => {}
                    }
                }
            }
        }
        log::debug!("Transcoding worker {} stopped", worker_id);
    }

    async fn process_job(&self, worker_id: usize, job_id: &str) {
        let started = {
            let mut jobs = self.shared.jobs.write().await;
            // Missing or already cancelled between dequeue and start
            match jobs.get_mut(job_id) {
                Some(entry) if !entry.job.is_terminal() => match entry.job.mark_running() {
                    Ok(()) => {
                        self.shared.observers.lock().await.publish(&JobProgress::from_job(&entry.job));
                        let request = EncodeRequest {
                            job_id: entry.job.id.clone(),
                            recording_id: entry.job.recording_id.clone(),
                            profile: entry.job.profile.clone(),
                            input_path: entry.job.input_path.clone(),
                            output_path: entry.job.output_path.clone(),
                        };
                        Some((request, Arc::clone(&entry.cancel)))
                    }
                    Err(e) => {
                        log::warn!("Job {} could not start: {}", job_id, e);
                        None
                    }
                },
                _ => None,
            }
        };

        if let Some((request, cancel)) = started {
            log::info!(
                "Worker {} running job {} ({} kbps) for recording {}",
                worker_id,
                job_id,
                request.profile.bitrate_kbps,
                request.recording_id
            );
            let handle = JobHandle {
                job_id: job_id.to_string(),
                cancel,
                pipeline: self.clone(),
            };
            let encoder = Arc::clone(&self.shared.encoder);
            let result = match tokio::spawn(async move { encoder.encode(request, handle).await }).await {
                Ok(result) => result,
                Err(e) => Err(EncoderError::Failed(format!("encoder task failed: {}", e))),
            };
            self.finish_job(job_id, result).await;
        }

        self.shared.queue.lock().await.finish();
        self.shared.work_ready.notify_waiters();
    }

    async fn finish_job(&self, job_id: &str, result: Result<(), EncoderError>) {
        let mut jobs = self.shared.jobs.write().await;
        let Some(entry) = jobs.get_mut(job_id) else {
            return;
        };
        if entry.job.is_terminal() {
            // Cancelled while the encoder was running
            return;
        }

        let transition = match result {
            Ok(()) => {
                log::info!("Job {} completed", job_id);
                entry.job.mark_completed()
            }
            Err(EncoderError::Cancelled) => entry.job.mark_cancelled(),
            Err(e) => {
                log::error!("Job {} failed: {}", job_id, e);
                entry.job.mark_failed(e.to_string())
            }
        };
        match transition {
            Ok(()) => self.shared.observers.lock().await.publish(&JobProgress::from_job(&entry.job)),
            Err(e) => log::warn!("Job {} could not finish: {}", job_id, e),
        }
    }
}
