//! Adaptive bitrate controller
//!
//! Turns per-segment download telemetry and network probes into a
//! recommended rendition plus scale-up / scale-down signals. A controller
//! belongs to one viewer context and is driven through `&mut self`.

pub mod controller;
pub mod types;

pub use controller::*;
pub use types::*;
