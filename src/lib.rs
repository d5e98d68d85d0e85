pub mod abr;
pub mod catalog;
pub mod config;
pub mod distribution;
pub mod error;
pub mod queue;
pub mod transcoding;

pub use abr::{AbrController, AbrDecision, AbrStatistics, NetworkStats, SegmentMetrics};
pub use catalog::{BitrateCatalog, BitrateLevel, Resolution};
pub use config::{AbrConfig, ConfigError, DistributorConfig, ServiceConfig, Settings, TranscodingConfig};
pub use distribution::{
    ConnectionQuality, DeliveryPriority, DistributionError, DistributionEvent, DistributionService,
    LiveDistributor, ServiceMetrics, VideoSegment, ViewerSession,
};
pub use error::{Error, ErrorClass, Result, RetryPolicy};
pub use queue::{QueueError, QueueStats, TaskQueue};
pub use transcoding::{
    CommandEncoder, EncodeRequest, Encoder, EncoderError, JobHandle, JobStatus, TranscodingError,
    TranscodingJob, TranscodingPipeline,
};
