//! Transcoding job record and its state machine

use super::error::TranscodingError;
use super::playlist::variant_playlist_name;
use crate::catalog::BitrateLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, failed and cancelled jobs never change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (recording, profile) transcode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodingJob {
    pub id: String,
    pub recording_id: String,
    pub profile: BitrateLevel,
    pub status: JobStatus,
    /// Percent complete, 0 to 100
    pub progress: f64,
    /// Encoder speed relative to realtime, as last reported
    pub speed: f64,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TranscodingJob {
    pub fn new(recording_id: &str, profile: BitrateLevel, input_path: &Path, output_dir: &Path) -> Self {
        let output_path = Self::output_path_for(output_dir, recording_id, profile.bitrate_kbps);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recording_id: recording_id.to_string(),
            profile,
            status: JobStatus::Queued,
            progress: 0.0,
            speed: 0.0,
            input_path: input_path.to_path_buf(),
            output_path,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// `{output_dir}/{recording_id}/{recording_id}_{bitrate}.m3u8`
    pub fn output_path_for(output_dir: &Path, recording_id: &str, bitrate_kbps: u32) -> PathBuf {
        output_dir
            .join(recording_id)
            .join(variant_playlist_name(recording_id, bitrate_kbps))
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), TranscodingError> {
        if !self.status.can_transition_to(next) {
            return Err(TranscodingError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        log::debug!("Job {} ({}): {} -> {}", self.id, self.profile.label, self.status, next);
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<(), TranscodingError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), TranscodingError> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100.0;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), TranscodingError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<(), TranscodingError> {
        self.transition(JobStatus::Cancelled)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Record a progress report. Values are clamped to 0..=100.
    pub fn set_progress(&mut self, percent: f64, speed: f64) {
        self.progress = percent.clamp(0.0, 100.0);
        if speed.is_finite() && speed >= 0.0 {
            self.speed = speed;
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall time between start and finish (or now, while running)
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.finished_at.unwrap_or_else(Utc::now) - started)
    }
}
