//! Identity and federation error types.

use thiserror::Error;

use warden_auth::AuthError;

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors produced by the identity manager, the OAuth authorization
/// server, and the federation providers.
#[derive(Error, Debug)]
pub enum IdentityError {
    // -- configuration ---------------------------------------------------
    #[error("Provider '{0}' is already registered")]
    DuplicateProvider(String),

    #[error("Unknown identity provider: {0}")]
    UnknownProvider(String),

    #[error("OAuth client '{0}' is already registered")]
    DuplicateClient(String),

    #[error("Client with ID '{0}' not found")]
    UnknownClient(String),

    #[error("External identity is already linked to another user")]
    IdentityAlreadyLinked,

    // -- OAuth authorization server ---------------------------------------
    #[error("Client '{0}' is not active")]
    InactiveClient(String),

    #[error("Redirect URI '{0}' not allowed for this client")]
    RedirectUriNotAllowed(String),

    #[error("Scope '{0}' not allowed for this client")]
    ScopeNotAllowed(String),

    #[error("Invalid authorization code")]
    InvalidAuthorizationCode,

    #[error("Authorization code expired")]
    AuthorizationCodeExpired,

    #[error("Authorization code already used")]
    AuthorizationCodeUsed,

    #[error("Client ID mismatch")]
    ClientMismatch,

    #[error("Redirect URI mismatch")]
    RedirectUriMismatch,

    #[error("Invalid client secret")]
    InvalidClientSecret,

    #[error("Code verifier required")]
    VerifierRequired,

    #[error("Invalid code verifier")]
    VerifierMismatch,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    // -- federation flows --------------------------------------------------
    #[error("This provider does not support a browser login flow")]
    LoginFlowUnsupported,

    #[error("This provider does not support direct authentication")]
    DirectAuthUnsupported,

    #[error("No pending login matches the returned state")]
    StateMismatch,

    #[error("The pending login has expired")]
    StateExpired,

    #[error("SAML authentication failed: {0}")]
    SamlStatus(String),

    #[error("Invalid SAML response: no matching request found")]
    SamlReplay,

    #[error("SAML request has expired")]
    SamlRequestExpired,

    #[error("Assertion is not signed")]
    UnsignedAssertion,

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Invalid directory credentials")]
    InvalidDirectoryCredentials,

    #[error("External user info carries no stable id")]
    MissingExternalId,

    #[error("No local user is linked to this external identity")]
    NoLinkedUser,

    // -- upstream / local failures ----------------------------------------
    /// Upstream HTTP/LDAP failure. Always recoverable, never fatal.
    #[error("Upstream request failed: {0}")]
    Transport(String),

    #[error("Identity provider rejected the request: {0}")]
    Upstream(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl IdentityError {
    /// Error category for metrics and logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DuplicateProvider(_)
            | Self::UnknownProvider(_)
            | Self::DuplicateClient(_)
            | Self::UnknownClient(_)
            | Self::IdentityAlreadyLinked => "configuration",
            Self::InactiveClient(_)
            | Self::RedirectUriNotAllowed(_)
            | Self::ScopeNotAllowed(_)
            | Self::InvalidAuthorizationCode
            | Self::AuthorizationCodeExpired
            | Self::AuthorizationCodeUsed
            | Self::ClientMismatch
            | Self::RedirectUriMismatch
            | Self::InvalidClientSecret
            | Self::VerifierRequired
            | Self::VerifierMismatch
            | Self::InvalidRefreshToken => "oauth_protocol",
            Self::LoginFlowUnsupported
            | Self::DirectAuthUnsupported
            | Self::StateMismatch
            | Self::StateExpired
            | Self::SamlStatus(_)
            | Self::SamlReplay
            | Self::SamlRequestExpired
            | Self::UnsignedAssertion
            | Self::MalformedResponse(_)
            | Self::InvalidDirectoryCredentials
            | Self::MissingExternalId
            | Self::NoLinkedUser => "federation",
            Self::Transport(_) | Self::Upstream(_) => "transport",
            Self::Auth(_) => "auth",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_messages_are_stable() {
        assert_eq!(
            IdentityError::AuthorizationCodeUsed.to_string(),
            "Authorization code already used"
        );
        assert_eq!(IdentityError::VerifierMismatch.to_string(), "Invalid code verifier");
        assert_eq!(
            IdentityError::SamlReplay.to_string(),
            "Invalid SAML response: no matching request found"
        );
    }
}
