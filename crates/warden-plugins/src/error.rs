//! Plugin security error types.

use thiserror::Error;

/// Result type for plugin security operations.
pub type PluginSecurityResult<T> = Result<T, PluginSecurityError>;

/// Errors produced by the plugin security manager.
#[derive(Error, Debug, Clone)]
pub enum PluginSecurityError {
    #[error("Plugin permission '{0}' is already registered")]
    DuplicatePermission(String),

    #[error("Unknown plugin permission: {0}")]
    UnknownPermission(String),

    #[error("Plugin '{0}' not found")]
    UnknownPlugin(String),

    #[error("Permission '{0}' not declared in plugin manifest")]
    PermissionNotRequested(String),

    #[error("Unknown consent request")]
    UnknownConsentRequest,

    #[error("Consent request has expired")]
    ConsentRequestExpired,

    #[error("Consent response does not match the request")]
    ConsentRequestMismatch,

    #[error("Permission '{0}' appears as both granted and denied")]
    OverlappingConsent(String),

    #[error("Plugin '{plugin_id}' lacks permission '{permission}'")]
    PluginLacksPermission {
        plugin_id: String,
        permission: String,
    },

    #[error("No active consent from the user for plugin '{0}'")]
    NoActiveConsent(String),
}

impl PluginSecurityError {
    /// Error category for metrics and logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DuplicatePermission(_) => "duplicate_permission",
            Self::UnknownPermission(_) => "unknown_permission",
            Self::UnknownPlugin(_) => "unknown_plugin",
            Self::PermissionNotRequested(_) => "permission_not_requested",
            Self::UnknownConsentRequest => "unknown_consent_request",
            Self::ConsentRequestExpired => "consent_request_expired",
            Self::ConsentRequestMismatch => "consent_request_mismatch",
            Self::OverlappingConsent(_) => "overlapping_consent",
            Self::PluginLacksPermission { .. } => "plugin_lacks_permission",
            Self::NoActiveConsent(_) => "no_active_consent",
        }
    }
}

/// Why a security token failed validation. The display strings are part of
/// the audit surface.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    #[error("Invalid token")]
    Invalid,

    #[error("Token not found")]
    NotFound,

    #[error("Token is inactive")]
    Inactive,

    #[error("Token has expired")]
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_strings_are_auditable() {
        assert_eq!(TokenRejection::Invalid.to_string(), "Invalid token");
        assert_eq!(TokenRejection::NotFound.to_string(), "Token not found");
        assert_eq!(TokenRejection::Inactive.to_string(), "Token is inactive");
        assert_eq!(TokenRejection::Expired.to_string(), "Token has expired");
    }
}
