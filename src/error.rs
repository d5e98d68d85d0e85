//! Error types and retry handling for abr-cast
//!
//! Each engine owns a focused error enum; this module ties them together
//! into one crate-level [`Error`] and classifies every failure so the
//! transport layer can decide between client and server responses.

use crate::config::{duration_ms, ConfigError};
use crate::distribution::DistributionError;
use crate::queue::QueueError;
use crate::transcoding::TranscodingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Broad category of a failure, independent of which engine raised it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// A capacity bound or uniqueness rule rejected the operation
    Admission,
    /// The referenced job, segment, viewer or distributor does not exist
    NotFound,
    /// Arguments were malformed or out of range
    InvalidInput,
    /// The target has been closed or stopped
    Closed,
    /// A background delivery failed and may succeed on retry
    Transient,
    /// The external encoder reported a failure
    Encoder,
}

impl ErrorClass {
    /// Whether the caller, rather than the system, is responsible
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorClass::Admission | ErrorClass::NotFound | ErrorClass::InvalidInput | ErrorClass::Closed
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Admission => "admission",
            ErrorClass::NotFound => "not_found",
            ErrorClass::InvalidInput => "invalid_input",
            ErrorClass::Closed => "closed",
            ErrorClass::Transient => "transient",
            ErrorClass::Encoder => "encoder",
        };
        f.write_str(name)
    }
}

/// Crate-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transcoding(#[from] TranscodingError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config(_) => ErrorClass::InvalidInput,
            Error::Transcoding(e) => e.class(),
            Error::Distribution(e) => e.class(),
            Error::Queue(e) => e.class(),
        }
    }
}

/// Result type for abr-cast operations
pub type Result<T> = std::result::Result<T, Error>;

/// How a failed delivery task is put back on the work queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Never retry; the first failure is permanent
    None,
    /// Re-enqueue right away
    Immediate,
    /// Wait a fixed delay before re-enqueueing
    Fixed {
        #[serde(rename = "delay_ms", with = "duration_ms")]
        delay: Duration,
    },
    /// Exponential backoff capped at `max_delay`
    Exponential {
        #[serde(rename = "initial_delay_ms", with = "duration_ms")]
        initial_delay: Duration,
        multiplier: f64,
        #[serde(rename = "max_delay_ms", with = "duration_ms")]
        max_delay: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed {
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), or `None` when
    /// retries are disabled.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Immediate => Some(Duration::ZERO),
            RetryPolicy::Fixed { delay } => Some(*delay),
            RetryPolicy::Exponential {
                initial_delay,
                multiplier,
                max_delay,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let factor = multiplier.max(1.0).powi(exponent);
                let scaled = initial_delay.as_secs_f64() * factor;
                if !scaled.is_finite() || scaled >= max_delay.as_secs_f64() {
                    Some(*max_delay)
                } else {
                    Some(initial_delay.mul_f64(factor))
                }
            }
        }
    }
}
