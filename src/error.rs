//! Error types for Posture Watch

use thiserror::Error;

use crate::types::StreamKind;

/// Errors that can occur while configuring or running the monitor
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Camera intrinsics unavailable: {0}")]
    IntrinsicsUnavailable(String),

    #[error("{stream} detector unavailable: {reason}")]
    DetectorUnavailable { stream: StreamKind, reason: String },

    #[error("{stream} detection failed: {reason}")]
    DetectionFailed { stream: StreamKind, reason: String },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Monitoring session is not running")]
    SessionStopped,
}

impl MonitorError {
    /// Stable numeric code reported alongside the message to `on_error`
    pub fn code(&self) -> i32 {
        match self {
            MonitorError::InvalidConfig(_) => 1,
            MonitorError::IntrinsicsUnavailable(_) => 2,
            MonitorError::DetectorUnavailable { .. } => 3,
            MonitorError::DetectionFailed { .. } => 4,
            MonitorError::JsonError(_) => 5,
            MonitorError::Io(_) => 6,
            MonitorError::ParseError(_) => 7,
            MonitorError::SessionStopped => 8,
        }
    }

    pub(crate) fn detection_failed(stream: StreamKind, reason: impl Into<String>) -> Self {
        MonitorError::DetectionFailed {
            stream,
            reason: reason.into(),
        }
    }

    pub(crate) fn detector_unavailable(stream: StreamKind, reason: impl Into<String>) -> Self {
        MonitorError::DetectorUnavailable {
            stream,
            reason: reason.into(),
        }
    }
}
