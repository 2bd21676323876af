//! Terminal results of a scan session.

use crate::capture::CaptureError;
use crate::detect::DetectorError;
use serde::Serialize;
use thiserror::Error;

/// Why a session ended without a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("camera access denied: {0}")]
    PermissionDenied(String),
    #[error("no matching camera: {0}")]
    DeviceUnavailable(String),
    #[error("code detector unavailable: {0}")]
    DetectorUnavailable(String),
    #[error("camera stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl FailureReason {
    /// Stable short name, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::PermissionDenied(_) => "permission_denied",
            FailureReason::DeviceUnavailable(_) => "device_unavailable",
            FailureReason::DetectorUnavailable(_) => "detector_unavailable",
            FailureReason::StreamInterrupted(_) => "stream_interrupted",
        }
    }

    /// Classifies a capture error. `HandleClosed` is a cancellation, not a
    /// failure, and yields `None`.
    pub fn from_capture(error: CaptureError) -> Option<Self> {
        match error {
            CaptureError::PermissionDenied(msg) => Some(FailureReason::PermissionDenied(msg)),
            CaptureError::DeviceUnavailable(msg) => Some(FailureReason::DeviceUnavailable(msg)),
            CaptureError::StreamFailed(msg) => Some(FailureReason::StreamInterrupted(msg)),
            CaptureError::HandleClosed => None,
        }
    }
}

impl From<DetectorError> for FailureReason {
    fn from(error: DetectorError) -> Self {
        match error {
            DetectorError::Unavailable(msg) => FailureReason::DetectorUnavailable(msg),
        }
    }
}

/// The single terminal result of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// A code was decoded.
    Success {
        /// The decoded payload, uninterpreted.
        payload: String,
    },
    /// The session ended on an error.
    Failure {
        /// What went wrong.
        reason: FailureReason,
    },
    /// The session was stopped before it produced a result.
    Cancelled,
}

impl ScanOutcome {
    /// Short name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanOutcome::Success { .. } => "success",
            ScanOutcome::Failure { .. } => "failure",
            ScanOutcome::Cancelled => "cancelled",
        }
    }

    /// Returns the payload of a successful scan.
    pub fn payload(&self) -> Option<&str> {
        match self {
            ScanOutcome::Success { payload } => Some(payload),
            _ => None,
        }
    }
}
