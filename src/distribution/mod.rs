//! Live distribution engine
//!
//! A [`LiveDistributor`] holds one recording's expiring segment queue and
//! its viewer sessions. The [`DistributionService`] multiplexes many
//! distributors, delivers queued segments through a shared worker pool with
//! retries, and sweeps expired segments on a timer.

pub mod adaptation;
pub mod distributor;
pub mod error;
pub mod events;
pub mod metrics;
pub mod segment;
pub mod service;
pub mod session;
pub mod task;

pub use distributor::LiveDistributor;
pub use error::DistributionError;
pub use events::{DistributionEvent, EventBus};
pub use metrics::{DeliveryCounters, DistributorStats, ServiceMetrics};
pub use segment::{SegmentQueue, VideoSegment};
pub use service::DistributionService;
pub use session::{ConnectionQuality, ViewerSession};
pub use task::{DeliveryPriority, SegmentDeliveryTask};
