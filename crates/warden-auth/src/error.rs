//! Authentication error types.

use thiserror::Error;

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors produced by the authentication and MFA subsystems.
///
/// Display strings for credential failures are intentionally uniform so the
/// caller cannot distinguish "unknown user" from "wrong password".
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Username '{0}' is already taken")]
    DuplicateUsername(String),

    #[error("Email '{0}' is already registered")]
    DuplicateEmail(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Too many failed login attempts. Please try again later.")]
    RateLimited,

    #[error("MFA provider '{0}' is not registered")]
    UnknownMfaProvider(String),

    #[error("MFA method '{0}' is not configured for this user")]
    MfaNotConfigured(String),

    #[error("Challenge not found")]
    UnknownChallenge,

    #[error("Challenge has expired")]
    ChallengeExpired,

    #[error("Invalid setup parameters: {0}")]
    InvalidSetup(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Message delivery failed: {0}")]
    Delivery(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Error category for metrics and logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DuplicateUsername(_) => "duplicate_username",
            Self::DuplicateEmail(_) => "duplicate_email",
            Self::UserNotFound(_) => "user_not_found",
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountDisabled => "account_disabled",
            Self::RateLimited => "rate_limited",
            Self::UnknownMfaProvider(_) => "unknown_mfa_provider",
            Self::MfaNotConfigured(_) => "mfa_not_configured",
            Self::UnknownChallenge => "unknown_challenge",
            Self::ChallengeExpired => "challenge_expired",
            Self::InvalidSetup(_) => "invalid_setup",
            Self::Hashing(_) => "hashing",
            Self::Delivery(_) => "delivery",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether this error indicates an internal fault rather than a caller
    /// mistake.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Hashing(_) | Self::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_share_a_uniform_message() {
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "Invalid username or password"
        );
        assert_eq!(
            AuthError::RateLimited.to_string(),
            "Too many failed login attempts. Please try again later."
        );
        assert_eq!(AuthError::AccountDisabled.to_string(), "Account is disabled");
    }

    #[test]
    fn categorization() {
        assert_eq!(AuthError::RateLimited.category(), "rate_limited");
        assert!(!AuthError::RateLimited.is_critical());
        assert!(AuthError::Hashing("oom".into()).is_critical());
    }
}
