use abr_cast::catalog::BitrateCatalog;
use abr_cast::config::TranscodingConfig;
use abr_cast::transcoding::{
    EncodeRequest, Encoder, EncoderError, JobHandle, JobStatus, TranscodingError, TranscodingPipeline,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Reports halfway progress, then succeeds
struct InstantEncoder;

#[async_trait]
impl Encoder for InstantEncoder {
    async fn encode(&self, _request: EncodeRequest, handle: JobHandle) -> Result<(), EncoderError> {
        handle.report_progress(50.0, 2.0).await.ok();
        Ok(())
    }
}

struct FailingEncoder;

#[async_trait]
impl Encoder for FailingEncoder {
    async fn encode(&self, request: EncodeRequest, _handle: JobHandle) -> Result<(), EncoderError> {
        Err(EncoderError::Failed(format!("cannot encode {} kbps", request.profile.bitrate_kbps)))
    }
}

/// Runs until cancelled
struct BlockingEncoder;

#[async_trait]
impl Encoder for BlockingEncoder {
    async fn encode(&self, _request: EncodeRequest, handle: JobHandle) -> Result<(), EncoderError> {
        handle.cancelled().await;
        Err(EncoderError::Cancelled)
    }
}

/// Records the highest number of encodes running at once
#[derive(Default)]
struct CountingEncoder {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Encoder for CountingEncoder {
    async fn encode(&self, _request: EncodeRequest, _handle: JobHandle) -> Result<(), EncoderError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config(workers: usize, queue_size: usize) -> TranscodingConfig {
    TranscodingConfig::new()
        .max_concurrent_jobs(workers)
        .queue_size(queue_size)
        .output_dir("/out")
        .idle_poll_interval(Duration::from_millis(10))
}

fn pipeline(encoder: Arc<dyn Encoder>, workers: usize, queue_size: usize) -> TranscodingPipeline {
    TranscodingPipeline::new(config(workers, queue_size), BitrateCatalog::standard(), encoder).unwrap()
}

async fn wait_until_finished(pipeline: &TranscodingPipeline, recording_id: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(progress) = pipeline.recording_progress(recording_id).await {
                if progress.is_finished() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("recording should finish");
}

#[tokio::test]
async fn test_queue_multi_bitrate_job_creates_one_job_per_profile() {
    let pipeline = pipeline(Arc::new(InstantEncoder), 2, 100);
    let ids = pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();
    assert_eq!(ids.len(), 4);

    let mut bitrates = Vec::new();
    for id in &ids {
        let job = pipeline.job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.recording_id, "rec-1");
        bitrates.push(job.profile.bitrate_kbps);
    }
    bitrates.sort();
    assert_eq!(bitrates, vec![500, 1000, 2000, 4000]);

    let first = pipeline.jobs_for_recording("rec-1").await;
    assert_eq!(
        first[0].output_path.to_string_lossy(),
        "/out/rec-1/rec-1_500.m3u8"
    );
    assert_eq!(pipeline.queue_stats().await.pending, 4);
}

#[tokio::test]
async fn test_queue_full_is_all_or_nothing() {
    let pipeline = pipeline(Arc::new(InstantEncoder), 1, 6);
    pipeline.queue_multi_bitrate_job("rec-1", "/a.mp4").await.unwrap();

    let err = pipeline.queue_multi_bitrate_job("rec-2", "/b.mp4").await.unwrap_err();
    assert_eq!(
        err,
        TranscodingError::QueueFull {
            capacity: 6,
            pending: 4,
            requested: 4
        }
    );
    assert!(pipeline.jobs_for_recording("rec-2").await.is_empty());
    assert_eq!(pipeline.queue_stats().await.pending, 4);
}

#[tokio::test]
async fn test_invalid_input_rejected() {
    let pipeline = pipeline(Arc::new(InstantEncoder), 1, 10);
    assert!(matches!(
        pipeline.queue_multi_bitrate_job("", "/in.mp4").await,
        Err(TranscodingError::InvalidInput(_))
    ));
    assert!(matches!(
        pipeline.queue_multi_bitrate_job("rec-1", "").await,
        Err(TranscodingError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_workers_complete_jobs() {
    let pipeline = pipeline(Arc::new(InstantEncoder), 2, 100);
    pipeline.start().await.unwrap();
    pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();

    wait_until_finished(&pipeline, "rec-1").await;
    assert!(pipeline.is_recording_completed("rec-1").await);

    let progress = pipeline.recording_progress("rec-1").await.unwrap();
    assert_eq!(progress.total, 4);
    assert_eq!(progress.completed, 4);
    assert_eq!(progress.average_progress, 100.0);
    for job in &progress.jobs {
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_some());
        assert_eq!(job.speed, 2.0);
    }

    let master = pipeline.ready_master_playlist("rec-1").await.unwrap();
    assert_eq!(master.matches("#EXT-X-STREAM-INF").count(), 4);
    assert!(master.contains("rec-1_2000.m3u8"));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_encoder_failure_marks_jobs_failed() {
    let pipeline = pipeline(Arc::new(FailingEncoder), 2, 100);
    pipeline.start().await.unwrap();
    pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();

    wait_until_finished(&pipeline, "rec-1").await;
    let progress = pipeline.recording_progress("rec-1").await.unwrap();
    assert_eq!(progress.failed, 4);
    assert!(!pipeline.is_recording_completed("rec-1").await);

    let job = &progress.jobs[0];
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("cannot encode 500 kbps"));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_cancel_queued_job() {
    let pipeline = pipeline(Arc::new(InstantEncoder), 1, 10);
    let ids = pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();

    assert!(pipeline.cancel_job(&ids[0]).await.unwrap());
    let job = pipeline.job(&ids[0]).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.finished_at.is_some());
    assert_eq!(pipeline.queue_stats().await.pending, 3);

    // Idempotent, and progress for a finished job is ignored
    assert!(!pipeline.cancel_job(&ids[0]).await.unwrap());
    pipeline.update_job_progress(&ids[0], 70.0, 1.0).await.unwrap();
    assert_eq!(pipeline.job(&ids[0]).await.unwrap().progress, 0.0);

    assert!(matches!(
        pipeline.cancel_job("missing").await,
        Err(TranscodingError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_running_jobs() {
    let pipeline = pipeline(Arc::new(BlockingEncoder), 1, 10);
    pipeline.start().await.unwrap();
    pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let progress = pipeline.recording_progress("rec-1").await.unwrap();
            if progress.running == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("one job should start");

    assert_eq!(pipeline.cancel_recording("rec-1").await.unwrap(), 4);
    wait_until_finished(&pipeline, "rec-1").await;

    let progress = pipeline.recording_progress("rec-1").await.unwrap();
    assert_eq!(progress.cancelled, 4);
    assert_eq!(pipeline.queue_stats().await.pending, 0);

    // The worker slot is released once the encoder returns
    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.queue_stats().await.running != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("running slot should be released");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_cancel_recording_counts_only_jobs_it_cancelled() {
    let pipeline = pipeline(Arc::new(InstantEncoder), 1, 10);
    let ids = pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();
    assert!(pipeline.cancel_job(&ids[2]).await.unwrap());

    // Both callers see three unfinished jobs, but each job is cancelled once
    let (first, second) = tokio::join!(pipeline.cancel_recording("rec-1"), pipeline.cancel_recording("rec-1"));
    assert_eq!(first.unwrap() + second.unwrap(), 3);

    let progress = pipeline.recording_progress("rec-1").await.unwrap();
    assert_eq!(progress.cancelled, 4);
    assert_eq!(pipeline.cancel_recording("rec-1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_terminal_jobs_never_transition() {
    let pipeline = pipeline(Arc::new(InstantEncoder), 1, 10);
    pipeline.start().await.unwrap();
    let ids = pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();
    wait_until_finished(&pipeline, "rec-1").await;

    assert!(!pipeline.cancel_job(&ids[1]).await.unwrap());
    assert_eq!(pipeline.job(&ids[1]).await.unwrap().status, JobStatus::Completed);
    assert_eq!(pipeline.cancel_recording("rec-1").await.unwrap(), 0);
    assert!(pipeline.is_recording_completed("rec-1").await);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_concurrency_cap() {
    let encoder = Arc::new(CountingEncoder::default());
    let pipeline = pipeline(encoder.clone(), 2, 8);
    pipeline.start().await.unwrap();
    pipeline.queue_multi_bitrate_job("rec-1", "/a.mp4").await.unwrap();
    pipeline.queue_multi_bitrate_job("rec-2", "/b.mp4").await.unwrap();

    wait_until_finished(&pipeline, "rec-1").await;
    wait_until_finished(&pipeline, "rec-2").await;

    assert!(encoder.peak.load(Ordering::SeqCst) <= 2);
    assert!(pipeline.queue_stats().await.running <= 2);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_progress_updates_and_subscription() {
    let pipeline = pipeline(Arc::new(InstantEncoder), 1, 10);
    let ids = pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();
    let job_id = ids[0].clone();

    let mut events = pipeline.subscribe_job(&job_id).await.unwrap();
    let snapshot = events.next().await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Queued);

    pipeline.update_job_progress(&job_id, 30.0, 1.0).await.unwrap();
    pipeline.update_job_progress(&job_id, 60.0, 1.5).await.unwrap();
    pipeline.update_job_progress(&job_id, 250.0, 1.5).await.unwrap();

    let updates: Vec<f64> = vec![
        events.next().await.unwrap().progress,
        events.next().await.unwrap().progress,
        events.next().await.unwrap().progress,
    ];
    assert_eq!(updates, vec![30.0, 60.0, 100.0]);

    pipeline.cancel_job(&job_id).await.unwrap();
    assert_eq!(events.next().await.unwrap().status, JobStatus::Cancelled);
    assert!(events.next().await.is_none());

    assert!(matches!(
        pipeline.update_job_progress(&ids[1], f64::NAN, 1.0).await,
        Err(TranscodingError::InvalidInput(_))
    ));
    assert!(matches!(
        pipeline.update_job_progress("missing", 10.0, 1.0).await,
        Err(TranscodingError::JobNotFound(_))
    ));
    assert!(matches!(
        pipeline.subscribe_job("missing").await,
        Err(TranscodingError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_subscribe_all_sees_every_job() {
    let pipeline = pipeline(Arc::new(InstantEncoder), 2, 10);
    let mut events = pipeline.subscribe_all().await;
    pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();

    let mut queued = 0;
    for _ in 0..4 {
        if events.next().await.unwrap().status == JobStatus::Queued {
            queued += 1;
        }
    }
    assert_eq!(queued, 4);
}

#[tokio::test]
async fn test_recording_completion_rules() {
    let pipeline = pipeline(Arc::new(InstantEncoder), 1, 10);
    assert!(!pipeline.is_recording_completed("nothing").await);

    pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();
    assert!(!pipeline.is_recording_completed("rec-1").await);
}

#[tokio::test]
async fn test_playlists_require_jobs() {
    let pipeline = pipeline(Arc::new(InstantEncoder), 1, 10);
    assert!(matches!(
        pipeline.generate_master_playlist("rec-1").await,
        Err(TranscodingError::RecordingNotFound(_))
    ));
    assert!(matches!(
        pipeline.ready_master_playlist("rec-1").await,
        Err(TranscodingError::RecordingNotFound(_))
    ));

    pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();

    // Generation itself does not check completion
    let master = pipeline.generate_master_playlist("rec-1").await.unwrap();
    assert!(master.starts_with("#EXTM3U"));
    assert!(matches!(
        pipeline.ready_master_playlist("rec-1").await,
        Err(TranscodingError::RecordingNotReady(_))
    ));

    let variant = pipeline.generate_variant_playlist("rec-1", 1000).await.unwrap();
    assert_eq!(variant.matches("#EXTINF:10.0,").count(), 10);
    assert!(variant.trim_end().ends_with("#EXT-X-ENDLIST"));
    assert!(matches!(
        pipeline.generate_variant_playlist("rec-1", 1234).await,
        Err(TranscodingError::RenditionNotFound { bitrate_kbps: 1234, .. })
    ));
}

#[tokio::test]
async fn test_requeue_replaces_finished_jobs() {
    let pipeline = pipeline(Arc::new(InstantEncoder), 1, 10);
    let first = pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();

    assert_eq!(
        pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await,
        Err(TranscodingError::RecordingInProgress("rec-1".to_string()))
    );

    pipeline.cancel_recording("rec-1").await.unwrap();
    let second = pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();

    assert!(pipeline.job(&first[0]).await.is_none());
    let jobs = pipeline.jobs_for_recording("rec-1").await;
    assert_eq!(jobs.len(), 4);
    assert!(jobs.iter().all(|job| second.contains(&job.id)));
}

#[tokio::test]
async fn test_shutdown_cancels_pending_work() {
    let pipeline = pipeline(Arc::new(BlockingEncoder), 1, 10);
    pipeline.start().await.unwrap();
    pipeline.queue_multi_bitrate_job("rec-1", "/in.mp4").await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown())
        .await
        .expect("shutdown should not hang");

    let progress = pipeline.recording_progress("rec-1").await.unwrap();
    assert_eq!(progress.cancelled, 4);
    assert_eq!(
        pipeline.queue_multi_bitrate_job("rec-2", "/in.mp4").await,
        Err(TranscodingError::ShutDown)
    );
    assert_eq!(pipeline.start().await, Err(TranscodingError::ShutDown));
}
