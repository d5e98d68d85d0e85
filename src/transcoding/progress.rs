//! Progress notifications and per-recording rollups

use super::job::{JobStatus, TranscodingJob};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Published to subscribers on every progress report and state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub job_id: String,
    pub recording_id: String,
    pub bitrate_kbps: u32,
    pub status: JobStatus,
    pub progress: f64,
    pub speed: f64,
    pub timestamp: DateTime<Utc>,
}

impl JobProgress {
    pub fn from_job(job: &TranscodingJob) -> Self {
        Self {
            job_id: job.id.clone(),
            recording_id: job.recording_id.clone(),
            bitrate_kbps: job.profile.bitrate_kbps,
            status: job.status,
            progress: job.progress,
            speed: job.speed,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregate view over every job of one recording
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingProgress {
    pub recording_id: String,
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean progress across all jobs
    pub average_progress: f64,
    /// Jobs ordered by bitrate
    pub jobs: Vec<TranscodingJob>,
}

impl RecordingProgress {
    pub fn from_jobs(recording_id: &str, mut jobs: Vec<TranscodingJob>) -> Self {
        jobs.sort_by_key(|job| job.profile.bitrate_kbps);

        let count = |status: JobStatus| jobs.iter().filter(|job| job.status == status).count();
        let average_progress = if jobs.is_empty() {
            0.0
        } else {
            jobs.iter().map(|job| job.progress).sum::<f64>() / jobs.len() as f64
        };

        Self {
            recording_id: recording_id.to_string(),
            total: jobs.len(),
            queued: count(JobStatus::Queued),
            running: count(JobStatus::Running),
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
            cancelled: count(JobStatus::Cancelled),
            average_progress,
            jobs,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }

    /// Every job has reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.jobs.iter().all(TranscodingJob::is_terminal)
    }
}
