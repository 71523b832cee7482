//! MFA Manager
//!
//! Coordinates registered providers and per-user method state. The manager
//! owns challenge bookkeeping (expiry, one-shot consumption); providers own
//! their secrets.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use warden_events::EventBus;

use super::{MfaChallenge, MfaProvider, SetupMaterial, SetupParams};
use crate::error::{AuthError, AuthResult};
use crate::manager::AuthenticationManager;

const SOURCE: &str = "mfa";

#[derive(Debug, Clone)]
struct MethodState {
    enabled: bool,
    enabled_at: DateTime<Utc>,
    last_used: Option<DateTime<Utc>>,
}

struct ChallengeRecord {
    user_id: Uuid,
    provider_id: String,
    expires_at: Option<DateTime<Utc>>,
}

/// An enabled method, as reported to settings surfaces.
#[derive(Debug, Clone)]
pub struct EnabledMethod {
    pub provider_id: String,
    pub display_name: String,
    pub enabled_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

/// Manager-level MFA contracts: enable/disable methods, initiate and
/// complete verification.
pub struct MfaManager {
    auth: Arc<AuthenticationManager>,
    providers: RwLock<HashMap<String, Arc<dyn MfaProvider>>>,
    user_methods: RwLock<HashMap<Uuid, HashMap<String, MethodState>>>,
    challenges: RwLock<HashMap<Uuid, ChallengeRecord>>,
    bus: Arc<EventBus>,
}

impl MfaManager {
    pub fn new(bus: Arc<EventBus>, auth: Arc<AuthenticationManager>) -> Self {
        Self {
            auth,
            providers: RwLock::new(HashMap::new()),
            user_methods: RwLock::new(HashMap::new()),
            challenges: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Register a second-factor provider under its own id.
    pub async fn register_provider(&self, provider: Arc<dyn MfaProvider>) {
        let id = provider.id().to_string();
        self.providers.write().await.insert(id, provider);
    }

    /// Enable a method for a user, running the provider's setup.
    pub async fn enable_method(
        &self,
        user_id: Uuid,
        provider_id: &str,
        params: SetupParams,
    ) -> AuthResult<SetupMaterial> {
        if self.auth.get_user_by_id(user_id).await.is_none() {
            return Err(AuthError::UserNotFound(user_id.to_string()));
        }
        let provider = self.provider(provider_id).await?;
        let material = provider.setup(user_id, params).await?;

        {
            let mut methods = self.user_methods.write().await;
            methods.entry(user_id).or_default().insert(
                provider_id.to_string(),
                MethodState {
                    enabled: true,
                    enabled_at: Utc::now(),
                    last_used: None,
                },
            );
        }
        self.sync_user_record(user_id).await?;

        info!(target: "warden::mfa", user_id = %user_id, provider = provider_id, "MFA method enabled");
        self.bus
            .emit_new(
                "mfa.method_enabled",
                SOURCE,
                json!({"user_id": user_id, "provider_id": provider_id}),
            )
            .await;
        Ok(material)
    }

    /// Disable a method. Idempotent: returns `Ok(false)` when the method
    /// was not enabled, without emitting an event.
    pub async fn disable_method(&self, user_id: Uuid, provider_id: &str) -> AuthResult<bool> {
        let provider = self.provider(provider_id).await?;
        let was_enabled = {
            let mut methods = self.user_methods.write().await;
            match methods.get_mut(&user_id).and_then(|m| m.get_mut(provider_id)) {
                Some(state) if state.enabled => {
                    state.enabled = false;
                    true
                }
                _ => false,
            }
        };
        if !was_enabled {
            return Ok(false);
        }

        provider.teardown(user_id).await;
        self.sync_user_record(user_id).await?;

        self.bus
            .emit_new(
                "mfa.method_disabled",
                SOURCE,
                json!({"user_id": user_id, "provider_id": provider_id}),
            )
            .await;
        Ok(true)
    }

    /// Enabled methods for a user.
    pub async fn enabled_methods(&self, user_id: Uuid) -> Vec<EnabledMethod> {
        let providers = self.providers.read().await;
        let methods = self.user_methods.read().await;
        methods
            .get(&user_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, state)| state.enabled)
                    .map(|(provider_id, state)| EnabledMethod {
                        provider_id: provider_id.clone(),
                        display_name: providers
                            .get(provider_id)
                            .map(|p| p.display_name().to_string())
                            .unwrap_or_else(|| provider_id.clone()),
                        enabled_at: state.enabled_at,
                        last_used: state.last_used,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the user has at least one enabled method.
    pub async fn is_mfa_enabled(&self, user_id: Uuid) -> bool {
        self.user_methods
            .read()
            .await
            .get(&user_id)
            .is_some_and(|methods| methods.values().any(|state| state.enabled))
    }

    /// Start a verification challenge on an enabled method.
    pub async fn initiate_verification(
        &self,
        user_id: Uuid,
        provider_id: &str,
    ) -> AuthResult<MfaChallenge> {
        let provider = self.provider(provider_id).await?;
        if !self.method_enabled(user_id, provider_id).await {
            return Err(AuthError::MfaNotConfigured(provider_id.to_string()));
        }

        let challenge = provider.begin_challenge(user_id).await?;
        self.challenges.write().await.insert(
            challenge.challenge_id,
            ChallengeRecord {
                user_id,
                provider_id: provider_id.to_string(),
                expires_at: challenge.expires_at,
            },
        );

        self.bus
            .emit_new(
                "mfa.verification_started",
                SOURCE,
                json!({
                    "user_id": user_id,
                    "provider_id": provider_id,
                    "challenge_id": challenge.challenge_id,
                }),
            )
            .await;
        Ok(challenge)
    }

    /// Complete a verification challenge. The challenge record is consumed
    /// by this call whatever the outcome.
    pub async fn complete_verification(
        &self,
        user_id: Uuid,
        provider_id: &str,
        challenge_id: Uuid,
        response: &str,
    ) -> AuthResult<bool> {
        let provider = self.provider(provider_id).await?;

        let record = self.challenges.write().await.remove(&challenge_id);
        let Some(record) = record else {
            return Err(AuthError::UnknownChallenge);
        };
        if record.user_id != user_id || record.provider_id != provider_id {
            return Err(AuthError::UnknownChallenge);
        }
        if record.expires_at.is_some_and(|at| Utc::now() >= at) {
            return Err(AuthError::ChallengeExpired);
        }

        let verified = provider.verify(user_id, challenge_id, response).await?;
        if verified {
            let mut methods = self.user_methods.write().await;
            if let Some(state) = methods.get_mut(&user_id).and_then(|m| m.get_mut(provider_id)) {
                state.last_used = Some(Utc::now());
            }
        }

        self.bus
            .emit_new(
                "mfa.verification_completed",
                SOURCE,
                json!({
                    "user_id": user_id,
                    "provider_id": provider_id,
                    "challenge_id": challenge_id,
                    "success": verified,
                }),
            )
            .await;
        Ok(verified)
    }

    async fn provider(&self, provider_id: &str) -> AuthResult<Arc<dyn MfaProvider>> {
        self.providers
            .read()
            .await
            .get(provider_id)
            .cloned()
            .ok_or_else(|| AuthError::UnknownMfaProvider(provider_id.to_string()))
    }

    async fn method_enabled(&self, user_id: Uuid, provider_id: &str) -> bool {
        self.user_methods
            .read()
            .await
            .get(&user_id)
            .and_then(|methods| methods.get(provider_id))
            .is_some_and(|state| state.enabled)
    }

    /// Mirror enabled-method state onto the user record.
    async fn sync_user_record(&self, user_id: Uuid) -> AuthResult<()> {
        let enabled: BTreeSet<String> = {
            let methods = self.user_methods.read().await;
            methods
                .get(&user_id)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|(_, state)| state.enabled)
                        .map(|(id, _)| id.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        self.auth.set_mfa_state(user_id, enabled).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mfa::TotpProvider;
    use crate::user::NewUser;

    async fn setup() -> (Arc<AuthenticationManager>, MfaManager, Uuid) {
        let bus = Arc::new(EventBus::new());
        let auth = Arc::new(AuthenticationManager::new(Arc::clone(&bus)));
        let user = auth
            .register_user(NewUser::new("alice", "alice@ex.com", "pw12345!"))
            .await
            .unwrap();
        let mfa = MfaManager::new(bus, Arc::clone(&auth));
        mfa.register_provider(Arc::new(TotpProvider::new("Warden"))).await;
        (auth, mfa, user.user_id)
    }

    #[tokio::test]
    async fn enable_disable_lifecycle() {
        let (auth, mfa, user_id) = setup().await;
        assert!(!mfa.is_mfa_enabled(user_id).await);

        let material = mfa.enable_method(user_id, "totp", SetupParams::None).await.unwrap();
        assert!(matches!(material, SetupMaterial::Totp { .. }));
        assert!(mfa.is_mfa_enabled(user_id).await);

        let user = auth.get_user_by_id(user_id).await.unwrap();
        assert!(user.mfa_enabled);
        assert!(user.mfa_methods.contains("totp"));

        assert!(mfa.disable_method(user_id, "totp").await.unwrap());
        // Idempotent
        assert!(!mfa.disable_method(user_id, "totp").await.unwrap());
        assert!(!mfa.is_mfa_enabled(user_id).await);
        assert!(!auth.get_user_by_id(user_id).await.unwrap().mfa_enabled);
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let (_, mfa, user_id) = setup().await;
        let err = mfa
            .enable_method(user_id, "carrier-pigeon", SetupParams::None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownMfaProvider(_)));
    }

    #[tokio::test]
    async fn verification_requires_enabled_method() {
        let (_, mfa, user_id) = setup().await;
        let err = mfa.initiate_verification(user_id, "totp").await.unwrap_err();
        assert!(matches!(err, AuthError::MfaNotConfigured(_)));
    }

    #[tokio::test]
    async fn challenge_is_one_shot() {
        let (_, mfa, user_id) = setup().await;
        mfa.enable_method(user_id, "totp", SetupParams::None).await.unwrap();

        let challenge = mfa.initiate_verification(user_id, "totp").await.unwrap();
        // A wrong code consumes the challenge record
        let result = mfa
            .complete_verification(user_id, "totp", challenge.challenge_id, "000000")
            .await
            .unwrap();
        assert!(!result);

        let err = mfa
            .complete_verification(user_id, "totp", challenge.challenge_id, "000000")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownChallenge));
    }
}
