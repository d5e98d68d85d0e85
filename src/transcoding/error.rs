use super::job::JobStatus;
use crate::error::ErrorClass;

/// Errors raised by the transcoding pipeline
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranscodingError {
    #[error("Transcoding queue is full ({pending}/{capacity} pending, {requested} requested)")]
    QueueFull {
        capacity: usize,
        pending: usize,
        requested: usize,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("No transcoding jobs for recording {0}")]
    RecordingNotFound(String),

    #[error("No {bitrate_kbps} kbps rendition for recording {recording_id}")]
    RenditionNotFound { recording_id: String, bitrate_kbps: u32 },

    #[error("Recording {0} has not finished transcoding")]
    RecordingNotReady(String),

    #[error("Recording {0} already has active transcoding jobs")]
    RecordingInProgress(String),

    #[error("Invalid job transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transcoding pipeline is shut down")]
    ShutDown,
}

impl TranscodingError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TranscodingError::QueueFull { .. }
            | TranscodingError::RecordingNotReady(_)
            | TranscodingError::RecordingInProgress(_) => ErrorClass::Admission,
            TranscodingError::JobNotFound(_)
            | TranscodingError::RecordingNotFound(_)
            | TranscodingError::RenditionNotFound { .. } => ErrorClass::NotFound,
            TranscodingError::InvalidTransition { .. } | TranscodingError::InvalidInput(_) => {
                ErrorClass::InvalidInput
            }
            TranscodingError::ShutDown => ErrorClass::Closed,
        }
    }
}
