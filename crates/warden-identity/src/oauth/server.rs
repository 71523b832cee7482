//! The OAuth 2.0 authorization server.
//!
//! Implements the authorization-code grant with optional PKCE (S256 or
//! plain) and the refresh-token grant with rotation. Code exchange is a
//! test-and-set on the code record under one write lock, so concurrent
//! exchanges of the same code yield exactly one success.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use warden_core::token;
use warden_events::EventBus;

use super::{
    ACCESS_TOKEN_TTL_HOURS, AuthorizationCode, CODE_TTL_MINUTES, ClientType, CodeChallengeMethod,
    OAuthClient, OAuthClientDef, OAuthToken, PkceChallenge, TokenResponse,
};
use crate::error::{IdentityError, IdentityResult};

const SOURCE: &str = "identity";

#[derive(Default)]
struct ServerState {
    clients: HashMap<String, OAuthClient>,
    codes: HashMap<String, AuthorizationCode>,
    /// access_token value -> token record
    tokens: HashMap<String, OAuthToken>,
    /// refresh_token value -> access_token value
    refresh_index: HashMap<String, String>,
}

/// This system acting as an OAuth 2.0 authorization server.
pub struct OAuthServer {
    state: RwLock<ServerState>,
    bus: Arc<EventBus>,
}

impl OAuthServer {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            state: RwLock::new(ServerState::default()),
            bus,
        }
    }

    /// Register a client application.
    pub async fn register_client(&self, def: OAuthClientDef) -> IdentityResult<OAuthClient> {
        let client = {
            let mut state = self.state.write().await;
            if state.clients.contains_key(&def.client_id) {
                return Err(IdentityError::DuplicateClient(def.client_id));
            }
            let client = OAuthClient {
                client_id: def.client_id,
                name: def.name,
                secret: def.secret,
                redirect_uris: def.redirect_uris,
                allowed_scopes: def.allowed_scopes,
                client_type: def.client_type,
                active: true,
                created_at: Utc::now(),
            };
            state.clients.insert(client.client_id.clone(), client.clone());
            client
        };

        debug!(target: "warden::identity", client = %client.client_id, "OAuth client registered");
        self.bus
            .emit_new(
                "identity.client_registered",
                SOURCE,
                json!({"client_id": client.client_id, "name": client.name}),
            )
            .await;
        Ok(client)
    }

    pub async fn get_client(&self, client_id: &str) -> Option<OAuthClient> {
        self.state.read().await.clients.get(client_id).cloned()
    }

    /// Issue an authorization code after the resource owner approved the
    /// request. The code lives ten minutes and is single-use.
    pub async fn create_authorization_code(
        &self,
        client_id: &str,
        user_id: Uuid,
        redirect_uri: &str,
        scopes: Vec<String>,
        pkce: Option<PkceChallenge>,
    ) -> IdentityResult<AuthorizationCode> {
        let code = {
            let mut state = self.state.write().await;
            let client = state
                .clients
                .get(client_id)
                .ok_or_else(|| IdentityError::UnknownClient(client_id.to_string()))?;
            if !client.active {
                return Err(IdentityError::InactiveClient(client.name.clone()));
            }
            if !client.redirect_uris.iter().any(|uri| uri == redirect_uri) {
                return Err(IdentityError::RedirectUriNotAllowed(redirect_uri.to_string()));
            }
            let any_scope = client.allowed_scopes.iter().any(|s| s == "*");
            for scope in &scopes {
                if !any_scope && !client.allowed_scopes.contains(scope) {
                    return Err(IdentityError::ScopeNotAllowed(scope.clone()));
                }
            }

            let now = Utc::now();
            let code = AuthorizationCode {
                code: token::urlsafe(32),
                client_id: client_id.to_string(),
                user_id,
                redirect_uri: redirect_uri.to_string(),
                scopes,
                pkce,
                created_at: now,
                expires_at: now + Duration::minutes(CODE_TTL_MINUTES),
                used: false,
            };
            state.codes.insert(code.code.clone(), code.clone());
            code
        };

        self.bus
            .emit_new(
                "identity.oauth_code_created",
                SOURCE,
                json!({"client_id": client_id, "user_id": user_id}),
            )
            .await;
        Ok(code)
    }

    /// Exchange an authorization code for a token pair.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        client_id: &str,
        client_secret: Option<&str>,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> IdentityResult<TokenResponse> {
        let (response, user_id) = {
            let mut state = self.state.write().await;

            let record = state
                .codes
                .get(code)
                .ok_or(IdentityError::InvalidAuthorizationCode)?;
            if record.is_expired() {
                return Err(IdentityError::AuthorizationCodeExpired);
            }
            if record.used {
                return Err(IdentityError::AuthorizationCodeUsed);
            }
            if record.client_id != client_id {
                return Err(IdentityError::ClientMismatch);
            }
            if let Some(redirect_uri) = redirect_uri
                && record.redirect_uri != redirect_uri
            {
                return Err(IdentityError::RedirectUriMismatch);
            }

            let client = state
                .clients
                .get(client_id)
                .ok_or_else(|| IdentityError::UnknownClient(client_id.to_string()))?;
            Self::authenticate_client(client, client_secret)?;

            if let Some(pkce) = &record.pkce {
                let verifier = code_verifier.ok_or(IdentityError::VerifierRequired)?;
                if compute_challenge(verifier, pkce.method) != pkce.challenge {
                    return Err(IdentityError::VerifierMismatch);
                }
            }

            let (user_id, scopes) = (record.user_id, record.scopes.clone());
            // Single-use: flip under the same lock that validated it.
            if let Some(record) = state.codes.get_mut(code) {
                record.used = true;
            }

            let token = Self::mint_token(&mut state, client_id, Some(user_id), scopes);
            (TokenResponse::from_token(&token), user_id)
        };

        info!(
            target: "warden::identity",
            client = client_id,
            user_id = %user_id,
            "authorization code exchanged"
        );
        self.bus
            .emit_new(
                "identity.oauth_token_created",
                SOURCE,
                json!({"client_id": client_id, "user_id": user_id}),
            )
            .await;
        Ok(response)
    }

    /// Rotate a refresh token into a fresh token pair. The old access
    /// token is deactivated and the old refresh token forgotten.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> IdentityResult<TokenResponse> {
        let (response, user_id) = {
            let mut state = self.state.write().await;

            let access_value = state
                .refresh_index
                .get(refresh_token)
                .cloned()
                .ok_or(IdentityError::InvalidRefreshToken)?;
            let Some(old_token) = state.tokens.get(&access_value).cloned() else {
                state.refresh_index.remove(refresh_token);
                return Err(IdentityError::InvalidRefreshToken);
            };
            if old_token.client_id != client_id {
                return Err(IdentityError::ClientMismatch);
            }
            let client = state
                .clients
                .get(client_id)
                .ok_or_else(|| IdentityError::UnknownClient(client_id.to_string()))?;
            Self::authenticate_client(client, client_secret)?;

            if let Some(stored) = state.tokens.get_mut(&access_value) {
                stored.active = false;
            }
            state.refresh_index.remove(refresh_token);

            let token = Self::mint_token(
                &mut state,
                client_id,
                old_token.user_id,
                old_token.scopes.clone(),
            );
            (TokenResponse::from_token(&token), old_token.user_id)
        };

        self.bus
            .emit_new(
                "identity.oauth_token_refreshed",
                SOURCE,
                json!({"client_id": client_id, "user_id": user_id}),
            )
            .await;
        Ok(response)
    }

    /// Look up an access token, lazily deactivating it when expired.
    pub async fn validate_access_token(&self, access_token: &str) -> Option<OAuthToken> {
        let mut state = self.state.write().await;
        let token = state.tokens.get(access_token)?;
        if !token.active {
            return None;
        }
        if token.is_expired() {
            if let Some(stored) = state.tokens.get_mut(access_token) {
                stored.active = false;
            }
            return None;
        }
        state.tokens.get(access_token).cloned()
    }

    /// Revoke by access- or refresh-token value. Idempotent: revoking an
    /// already-inactive token returns `true` without emitting an event.
    pub async fn revoke_token(&self, token_value: &str) -> bool {
        let payload = {
            let mut state = self.state.write().await;
            let access_value = if state.tokens.contains_key(token_value) {
                token_value.to_string()
            } else if let Some(access) = state.refresh_index.get(token_value).cloned() {
                access
            } else {
                return false;
            };

            let Some(token) = state.tokens.get_mut(&access_value) else {
                state.refresh_index.remove(token_value);
                return false;
            };
            if !token.active {
                None
            } else {
                token.active = false;
                let refresh = token.refresh_token.clone();
                let payload = json!({
                    "client_id": token.client_id,
                    "user_id": token.user_id,
                });
                if let Some(refresh) = refresh {
                    state.refresh_index.remove(&refresh);
                }
                Some(payload)
            }
        };

        if let Some(payload) = payload {
            self.bus
                .emit_new("identity.oauth_token_revoked", SOURCE, payload)
                .await;
        }
        true
    }

    /// Drop expired codes and expired tokens that can no longer be
    /// refreshed. Returns how many records were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut state = self.state.write().await;
        let before_codes = state.codes.len();
        state.codes.retain(|_, code| !code.is_expired());
        let mut removed = before_codes - state.codes.len();

        let refreshable: std::collections::HashSet<String> =
            state.refresh_index.values().cloned().collect();
        let before_tokens = state.tokens.len();
        state
            .tokens
            .retain(|value, token| !token.is_expired() || refreshable.contains(value));
        removed += before_tokens - state.tokens.len();
        removed
    }

    pub async fn get_token(&self, access_token: &str) -> Option<OAuthToken> {
        self.state.read().await.tokens.get(access_token).cloned()
    }

    fn authenticate_client(client: &OAuthClient, secret: Option<&str>) -> IdentityResult<()> {
        if client.client_type == ClientType::Confidential
            && client.secret.as_deref() != secret
        {
            return Err(IdentityError::InvalidClientSecret);
        }
        Ok(())
    }

    fn mint_token(
        state: &mut ServerState,
        client_id: &str,
        user_id: Option<Uuid>,
        scopes: Vec<String>,
    ) -> OAuthToken {
        let now = Utc::now();
        let token = OAuthToken {
            access_token: token::urlsafe(32),
            refresh_token: Some(token::urlsafe(32)),
            client_id: client_id.to_string(),
            user_id,
            scopes,
            created_at: now,
            expires_at: now + Duration::hours(ACCESS_TOKEN_TTL_HOURS),
            active: true,
        };
        if let Some(refresh) = &token.refresh_token {
            state
                .refresh_index
                .insert(refresh.clone(), token.access_token.clone());
        }
        state.tokens.insert(token.access_token.clone(), token.clone());
        token
    }
}

/// Recompute a PKCE challenge from a verifier (RFC 7636 §4.6).
pub fn compute_challenge(verifier: &str, method: CodeChallengeMethod) -> String {
    match method {
        CodeChallengeMethod::S256 => {
            let digest = Sha256::digest(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(digest)
        }
        CodeChallengeMethod::Plain => verifier.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    async fn server_with_client() -> OAuthServer {
        let server = OAuthServer::new(Arc::new(EventBus::new()));
        server
            .register_client(
                OAuthClientDef::confidential("c1", "Test Client", "s3cret")
                    .with_redirect_uris(&["https://x/cb"])
                    .with_scopes(&["read", "write"]),
            )
            .await
            .unwrap();
        server
    }

    #[tokio::test]
    async fn rfc7636_challenge_vector() {
        assert_eq!(compute_challenge(VERIFIER, CodeChallengeMethod::S256), CHALLENGE);
        assert_eq!(compute_challenge("abc", CodeChallengeMethod::Plain), "abc");
    }

    #[tokio::test]
    async fn pkce_code_flow() {
        let server = server_with_client().await;
        let user = Uuid::new_v4();
        let code = server
            .create_authorization_code(
                "c1",
                user,
                "https://x/cb",
                vec!["read".into()],
                Some(PkceChallenge {
                    challenge: CHALLENGE.into(),
                    method: CodeChallengeMethod::S256,
                }),
            )
            .await
            .unwrap();

        // A wrong verifier is rejected without consuming the code
        let err = server
            .exchange_authorization_code(&code.code, "c1", Some("s3cret"), Some("https://x/cb"), Some("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::VerifierMismatch));

        let response = server
            .exchange_authorization_code(
                &code.code,
                "c1",
                Some("s3cret"),
                Some("https://x/cb"),
                Some(VERIFIER),
            )
            .await
            .unwrap();
        assert_eq!(response.token_type, "bearer");
        assert_eq!(response.expires_in, 3600);
        assert_eq!(response.scope.as_deref(), Some("read"));
        assert!(response.refresh_token.is_some());

        // Single use
        let err = server
            .exchange_authorization_code(
                &code.code,
                "c1",
                Some("s3cret"),
                Some("https://x/cb"),
                Some(VERIFIER),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::AuthorizationCodeUsed));
    }

    #[tokio::test]
    async fn code_validation_order() {
        let server = server_with_client().await;
        let user = Uuid::new_v4();

        let err = server
            .create_authorization_code("nope", user, "https://x/cb", vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::UnknownClient(_)));

        let err = server
            .create_authorization_code("c1", user, "https://evil/cb", vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::RedirectUriNotAllowed(_)));

        let err = server
            .create_authorization_code("c1", user, "https://x/cb", vec!["admin".into()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::ScopeNotAllowed(_)));

        let code = server
            .create_authorization_code("c1", user, "https://x/cb", vec!["read".into()], None)
            .await
            .unwrap();

        let err = server
            .exchange_authorization_code(&code.code, "other", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::ClientMismatch));

        let err = server
            .exchange_authorization_code(&code.code, "c1", Some("s3cret"), Some("https://y/cb"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::RedirectUriMismatch));

        let err = server
            .exchange_authorization_code(&code.code, "c1", Some("wrong"), Some("https://x/cb"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidClientSecret));

        server
            .exchange_authorization_code(&code.code, "c1", Some("s3cret"), Some("https://x/cb"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_exchange_yields_one_success() {
        let server = Arc::new(server_with_client().await);
        let code = server
            .create_authorization_code("c1", Uuid::new_v4(), "https://x/cb", vec![], None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let server = Arc::clone(&server);
            let code = code.code.clone();
            handles.push(tokio::spawn(async move {
                server
                    .exchange_authorization_code(&code, "c1", Some("s3cret"), Some("https://x/cb"), None)
                    .await
                    .is_ok()
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn refresh_rotates_the_pair() {
        let server = server_with_client().await;
        let code = server
            .create_authorization_code("c1", Uuid::new_v4(), "https://x/cb", vec!["read".into()], None)
            .await
            .unwrap();
        let first = server
            .exchange_authorization_code(&code.code, "c1", Some("s3cret"), None, None)
            .await
            .unwrap();

        let refresh = first.refresh_token.clone().unwrap();
        let second = server
            .refresh_access_token(&refresh, "c1", Some("s3cret"))
            .await
            .unwrap();
        assert_ne!(second.access_token, first.access_token);

        // Old access token is dead, old refresh token is forgotten
        assert!(server.validate_access_token(&first.access_token).await.is_none());
        let err = server
            .refresh_access_token(&refresh, "c1", Some("s3cret"))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidRefreshToken));

        // The new pair works
        assert!(server.validate_access_token(&second.access_token).await.is_some());
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_accepts_refresh_values() {
        let server = server_with_client().await;
        let code = server
            .create_authorization_code("c1", Uuid::new_v4(), "https://x/cb", vec![], None)
            .await
            .unwrap();
        let response = server
            .exchange_authorization_code(&code.code, "c1", Some("s3cret"), None, None)
            .await
            .unwrap();

        assert!(server.revoke_token(&response.access_token).await);
        assert!(server.revoke_token(&response.access_token).await);
        assert!(server.validate_access_token(&response.access_token).await.is_none());
        assert!(!server.revoke_token("unknown").await);

        // Revoking by refresh value works too
        let code = server
            .create_authorization_code("c1", Uuid::new_v4(), "https://x/cb", vec![], None)
            .await
            .unwrap();
        let response = server
            .exchange_authorization_code(&code.code, "c1", Some("s3cret"), None, None)
            .await
            .unwrap();
        assert!(server.revoke_token(response.refresh_token.as_deref().unwrap()).await);
        assert!(server.validate_access_token(&response.access_token).await.is_none());
    }

    #[tokio::test]
    async fn public_clients_skip_the_secret_check() {
        let server = OAuthServer::new(Arc::new(EventBus::new()));
        server
            .register_client(
                OAuthClientDef::public("spa", "Native App")
                    .with_redirect_uris(&["app://cb"])
                    .with_scopes(&["*"]),
            )
            .await
            .unwrap();

        let code = server
            .create_authorization_code("spa", Uuid::new_v4(), "app://cb", vec!["anything".into()], None)
            .await
            .unwrap();
        server
            .exchange_authorization_code(&code.code, "spa", None, None, None)
            .await
            .unwrap();
    }
}
