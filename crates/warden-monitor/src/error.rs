//! Monitoring error types.

use thiserror::Error;

/// Result type for monitoring operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors produced by the security monitoring manager.
#[derive(Error, Debug, Clone)]
pub enum MonitorError {
    #[error("Compliance requirement '{0}' already exists")]
    DuplicateRequirement(String),

    #[error("Unknown compliance requirement: {0}")]
    UnknownRequirement(String),

    #[error("Compliance check '{0}' already exists")]
    DuplicateCheck(String),

    #[error("Unknown compliance check: {0}")]
    UnknownCheck(String),

    #[error("Anomaly detector '{0}' already exists")]
    DuplicateDetector(String),

    #[error("Unknown anomaly detector: {0}")]
    UnknownDetector(String),

    #[error("Detector '{detector_id}' does not accept {input} input")]
    DetectorInputMismatch {
        detector_id: String,
        input: &'static str,
    },
}

impl MonitorError {
    /// Error category for metrics and logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DuplicateRequirement(_) => "duplicate_requirement",
            Self::UnknownRequirement(_) => "unknown_requirement",
            Self::DuplicateCheck(_) => "duplicate_check",
            Self::UnknownCheck(_) => "unknown_check",
            Self::DuplicateDetector(_) => "duplicate_detector",
            Self::UnknownDetector(_) => "unknown_detector",
            Self::DetectorInputMismatch { .. } => "detector_input_mismatch",
        }
    }
}
