//! ==============================================================================
//! error.rs - error taxonomy of the telemetry core
//! ==============================================================================
//!
//! purpose:
//!     one error type per failure class. none of them is fatal: the sampling
//!     loop logs every one of these and keeps running.
//!
//!     - DecodeError:   no usable payload this cycle (routine)
//!     - RangeRejected: a decoded value outside its plausible bounds (dropped)
//!     - StorageError:  readings log / alert state persistence failed
//!     - NotifyError:   the operator channel did not accept the message
//!     - ConfigError:   an alert configuration patch was rejected
//!
//! ==============================================================================

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("decoder did not answer within {0:?}")]
    Timeout(Duration),

    #[error("failed to run decoder: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("decoder exited with {status}: {stderr}")]
    Process { status: String, stderr: String },

    #[error("unparseable payload: {0}")]
    Payload(String),
}

/// A single field that was outside its plausible range.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field} = {value} outside plausible range {min}..={max}")]
pub struct RangeRejected {
    pub field: &'static str,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage call did not complete within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("bot token or chat id not configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("rejected with {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed patch: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{metric}: min {min} is greater than max {max}")]
    InvertedBounds { metric: &'static str, min: f64, max: f64 },

    #[error("{metric}: {field} must be a finite number")]
    NonFinite { metric: &'static str, field: &'static str },

    #[error("{0}: cooldown must be at least one minute when enabled")]
    ZeroCooldown(&'static str),

    #[error("failed to persist configuration: {0}")]
    Storage(#[from] StorageError),
}
