//! Security-control error types.

use thiserror::Error;

/// Result type for control-plane configuration operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors produced when configuring security controls. Runtime denials are
/// structured decisions, never errors.
#[derive(Error, Debug, Clone)]
pub enum ControlError {
    #[error("Invalid CIDR '{cidr}': {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("Invalid resource pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Rule '{0}' already exists")]
    DuplicateRule(String),

    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    #[error("Unknown device fingerprint")]
    UnknownFingerprint,

    #[error("A rule needs at least one CIDR range")]
    EmptyRule,
}

impl ControlError {
    /// Error category for metrics and logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidCidr { .. } => "invalid_cidr",
            Self::InvalidPattern { .. } => "invalid_pattern",
            Self::DuplicateRule(_) => "duplicate_rule",
            Self::UnknownRule(_) => "unknown_rule",
            Self::UnknownFingerprint => "unknown_fingerprint",
            Self::EmptyRule => "empty_rule",
        }
    }
}
