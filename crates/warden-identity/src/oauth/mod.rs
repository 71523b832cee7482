//! OAuth 2.0 authorization-server types.

mod server;

pub use server::{OAuthServer, compute_challenge};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifetime of an authorization code.
pub(crate) const CODE_TTL_MINUTES: i64 = 10;
/// Default lifetime of an access token.
pub(crate) const ACCESS_TOKEN_TTL_HOURS: i64 = 1;

/// Client confidentiality class (RFC 6749 §2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// Can keep a secret; must present it at the token endpoint
    Confidential,
    /// Cannot keep a secret (native/SPA); relies on PKCE
    Public,
}

/// A registered OAuth client of this authorization server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub name: String,
    pub secret: Option<String>,
    pub redirect_uris: Vec<String>,
    /// Allowed scopes; the literal `"*"` allows any scope
    pub allowed_scopes: Vec<String>,
    pub client_type: ClientType,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for registering an OAuth client.
#[derive(Debug, Clone)]
pub struct OAuthClientDef {
    pub client_id: String,
    pub name: String,
    pub secret: Option<String>,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub client_type: ClientType,
}

impl OAuthClientDef {
    pub fn confidential(
        client_id: impl Into<String>,
        name: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            name: name.into(),
            secret: Some(secret.into()),
            redirect_uris: Vec::new(),
            allowed_scopes: Vec::new(),
            client_type: ClientType::Confidential,
        }
    }

    pub fn public(client_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            name: name.into(),
            secret: None,
            redirect_uris: Vec::new(),
            allowed_scopes: Vec::new(),
            client_type: ClientType::Public,
        }
    }

    #[must_use]
    pub fn with_redirect_uris(mut self, uris: &[&str]) -> Self {
        self.redirect_uris = uris.iter().map(|u| (*u).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.allowed_scopes = scopes.iter().map(|s| (*s).to_string()).collect();
        self
    }
}

/// PKCE challenge method (RFC 7636).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    S256,
    Plain,
}

impl CodeChallengeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

/// A PKCE challenge attached to an authorization code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: CodeChallengeMethod,
}

/// A single-use authorization code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub pkce: Option<PkceChallenge>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl AuthorizationCode {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// An issued access token (with its refresh counterpart).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub client_id: String,
    pub user_id: Option<Uuid>,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

impl OAuthToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// The standard token endpoint response (RFC 6749 §5.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub(crate) fn from_token(token: &OAuthToken) -> Self {
        Self {
            access_token: token.access_token.clone(),
            token_type: "bearer".to_string(),
            expires_in: Duration::hours(ACCESS_TOKEN_TTL_HOURS).num_seconds() as u64,
            refresh_token: token.refresh_token.clone(),
            scope: if token.scopes.is_empty() {
                None
            } else {
                Some(token.scopes.join(" "))
            },
        }
    }
}
