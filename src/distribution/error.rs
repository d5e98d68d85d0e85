use crate::error::ErrorClass;

/// Errors raised by distributors and the distribution service
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DistributionError {
    #[error("Distributor for recording {0} is closed")]
    Closed(String),

    #[error("Invalid segment: {0}")]
    InvalidSegment(String),

    #[error("Segment queue is full ({capacity} segments)")]
    SegmentQueueFull { capacity: usize },

    #[error("First segment {0} of an empty queue must be a keyframe")]
    KeyframeRequired(String),

    #[error("Segment {0} is already queued")]
    DuplicateSegment(String),

    #[error("Maximum viewers reached ({max})")]
    MaxViewersReached { max: usize },

    #[error("Viewer {0} already joined")]
    DuplicateViewer(String),

    #[error("Unknown bitrate profile: {0}")]
    UnknownProfile(String),

    #[error("Viewer not found: {0}")]
    ViewerNotFound(String),

    #[error("Segment not found: {0}")]
    SegmentNotFound(String),

    #[error("Segment bitrate {segment_bitrate} does not match viewer {viewer_id} at {session_bitrate}")]
    BitrateMismatch {
        viewer_id: String,
        session_bitrate: String,
        segment_bitrate: String,
    },

    #[error("Buffer health {0} is outside 0..=100")]
    InvalidBufferHealth(f64),

    #[error("No distributor for recording {0}")]
    DistributorNotFound(String),

    #[error("Recording {0} is already being distributed")]
    DuplicateRecording(String),

    #[error("Delivery task queue is full")]
    TaskQueueFull,

    #[error("Distribution service is stopped")]
    ServiceStopped,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl DistributionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DistributionError::Closed(_) | DistributionError::ServiceStopped => ErrorClass::Closed,
            DistributionError::SegmentQueueFull { .. }
            | DistributionError::KeyframeRequired(_)
            | DistributionError::DuplicateSegment(_)
            | DistributionError::MaxViewersReached { .. }
            | DistributionError::DuplicateViewer(_)
            | DistributionError::UnknownProfile(_)
            | DistributionError::DuplicateRecording(_)
            | DistributionError::TaskQueueFull => ErrorClass::Admission,
            DistributionError::ViewerNotFound(_)
            | DistributionError::SegmentNotFound(_)
            | DistributionError::DistributorNotFound(_) => ErrorClass::NotFound,
            DistributionError::InvalidSegment(_)
            | DistributionError::BitrateMismatch { .. }
            | DistributionError::InvalidBufferHealth(_)
            | DistributionError::InvalidArgument(_) => ErrorClass::InvalidInput,
        }
    }

    /// Whether a background delivery that hit this error may succeed later
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            DistributionError::Closed(_)
                | DistributionError::ServiceStopped
                | DistributionError::DistributorNotFound(_)
                | DistributionError::ViewerNotFound(_)
        )
    }
}
