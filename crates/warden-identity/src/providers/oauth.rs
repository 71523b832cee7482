//! External OAuth 2.0 / OIDC provider client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use warden_core::token;

use super::{
    ExternalIdentity, IdentityProvider, LoginInitiation, LoginResponse, ProviderKind,
    ProviderOptions, identity_from_userinfo,
};
use crate::error::{IdentityError, IdentityResult};
use crate::http::{DEFAULT_TIMEOUT, HttpClient};
use crate::oauth::{CodeChallengeMethod, compute_challenge};

/// Pending logins expire after fifteen minutes.
const STATE_TTL_MINUTES: i64 = 15;

/// Configuration for an upstream OAuth provider.
#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub id: String,
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// `prompt` parameter (none, login, consent, select_account)
    pub prompt: Option<String>,
    pub use_pkce: bool,
    pub auto_provision_users: bool,
    pub sync_profile: bool,
}

struct PendingLogin {
    expires_at: DateTime<Utc>,
    code_verifier: Option<String>,
}

/// Authorization-code client for an upstream OAuth/OIDC identity provider.
pub struct OAuthClientProvider {
    config: OAuthProviderConfig,
    http: Arc<dyn HttpClient>,
    pending: RwLock<HashMap<String, PendingLogin>>,
}

impl OAuthClientProvider {
    pub fn new(config: OAuthProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http,
            pending: RwLock::new(HashMap::new()),
        }
    }

    fn authorization_url(&self, state: &str, code_challenge: Option<&str>) -> String {
        let mut params: Vec<(&str, String)> = vec![
            ("client_id", self.config.client_id.clone()),
            ("redirect_uri", self.config.redirect_uri.clone()),
            ("response_type", "code".to_string()),
            ("state", state.to_string()),
        ];
        if !self.config.scopes.is_empty() {
            params.push(("scope", self.config.scopes.join(" ")));
        }
        if let Some(prompt) = &self.config.prompt {
            params.push(("prompt", prompt.clone()));
        }
        if let Some(challenge) = code_challenge {
            params.push(("code_challenge", challenge.to_string()));
            params.push(("code_challenge_method", "S256".to_string()));
        }

        let query = params
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.config.authorization_endpoint)
    }
}

#[async_trait]
impl IdentityProvider for OAuthClientProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OAuth
    }

    fn options(&self) -> ProviderOptions {
        ProviderOptions {
            auto_provision_users: self.config.auto_provision_users,
            sync_profile: self.config.sync_profile,
        }
    }

    async fn begin_login(&self) -> IdentityResult<LoginInitiation> {
        let state = token::urlsafe(16);
        let code_verifier = self.config.use_pkce.then(|| token::urlsafe(32));
        let challenge = code_verifier
            .as_deref()
            .map(|verifier| compute_challenge(verifier, CodeChallengeMethod::S256));

        let expires_at = Utc::now() + Duration::minutes(STATE_TTL_MINUTES);
        {
            let mut pending = self.pending.write().await;
            pending.retain(|_, login| login.expires_at > Utc::now());
            pending.insert(
                state.clone(),
                PendingLogin {
                    expires_at,
                    code_verifier,
                },
            );
        }

        Ok(LoginInitiation {
            login_url: self.authorization_url(&state, challenge.as_deref()),
            state,
            expires_at,
        })
    }

    async fn complete_login(&self, response: &LoginResponse) -> IdentityResult<ExternalIdentity> {
        let code = response.require("code")?;
        let state = response.require("state")?;

        let pending = self
            .pending
            .write()
            .await
            .remove(state)
            .ok_or(IdentityError::StateMismatch)?;
        if Utc::now() >= pending.expires_at {
            return Err(IdentityError::StateExpired);
        }

        let mut form: Vec<(String, String)> = vec![
            ("grant_type".into(), "authorization_code".into()),
            ("code".into(), code.to_string()),
            ("redirect_uri".into(), self.config.redirect_uri.clone()),
            ("client_id".into(), self.config.client_id.clone()),
            ("client_secret".into(), self.config.client_secret.clone()),
        ];
        if let Some(verifier) = pending.code_verifier {
            form.push(("code_verifier".into(), verifier));
        }

        let accept = [("Accept".to_string(), "application/json".to_string())];
        let token_response = self
            .http
            .post_form(&self.config.token_endpoint, &form, &accept, DEFAULT_TIMEOUT)
            .await?;
        if !token_response.is_success() {
            return Err(IdentityError::Upstream(token_response.upstream_error()));
        }
        let body: serde_json::Value = token_response.json()?;
        let access_token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                IdentityError::MalformedResponse("token response lacks access_token".into())
            })?;

        let userinfo_endpoint = self.config.userinfo_endpoint.as_deref().ok_or_else(|| {
            IdentityError::MalformedResponse("userinfo endpoint not configured".into())
        })?;
        debug!(
            target: "warden::identity",
            provider = %self.config.id,
            "fetching userinfo"
        );
        let userinfo = self
            .http
            .get(
                userinfo_endpoint,
                &[
                    ("Authorization".to_string(), format!("Bearer {access_token}")),
                    ("Accept".to_string(), "application/json".to_string()),
                ],
                DEFAULT_TIMEOUT,
            )
            .await?;
        if !userinfo.is_success() {
            return Err(IdentityError::Upstream(userinfo.upstream_error()));
        }

        identity_from_userinfo(userinfo.json()?)
    }
}
