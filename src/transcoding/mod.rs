//! Multi-bitrate transcoding pipeline
//!
//! One source video becomes one job per catalog rendition. Jobs wait in a
//! bounded queue, a fixed pool of workers runs them through an external
//! [`Encoder`], and progress is published to subscribers. Playlists for
//! finished recordings are generated from the job table.

pub mod encoder;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod playlist;
pub mod progress;
pub mod queue;

pub use encoder::{CommandEncoder, EncodeRequest, Encoder, EncoderError};
pub use error::TranscodingError;
pub use job::{JobStatus, TranscodingJob};
pub use pipeline::{JobHandle, TranscodingPipeline};
pub use progress::{JobProgress, RecordingProgress};
pub use queue::{TranscodingQueue, TranscodingQueueStats};
