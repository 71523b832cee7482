//! Identity Manager
//!
//! Provider registry, identity linking, and auto-provisioning, plus
//! ownership of the OAuth authorization server. External authentication
//! results are resolved to local users here: linked identity first, then
//! email match, then (when the provider allows it) a freshly provisioned
//! account.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use warden_auth::{AuthenticationManager, NewUser, User, UserUpdate};
use warden_core::{Metadata, token};
use warden_events::EventBus;

use crate::error::{IdentityError, IdentityResult};
use crate::oauth::OAuthServer;
use crate::providers::{ExternalIdentity, IdentityProvider, LoginInitiation, LoginResponse};

const SOURCE: &str = "identity";

/// A link between a local user and an external identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityLink {
    pub user_id: Uuid,
    pub provider_id: String,
    pub external_id: String,
    pub linked_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    /// Snapshot of the latest user info from the provider
    pub user_info: Metadata,
}

#[derive(Default)]
struct IdentityState {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
    /// (provider_id, external_id) -> link; an external identity belongs to
    /// at most one local user
    links: HashMap<(String, String), IdentityLink>,
    user_links: HashMap<Uuid, Vec<(String, String)>>,
}

/// SSO manager and OAuth authorization server.
pub struct IdentityManager {
    auth: Arc<AuthenticationManager>,
    oauth: OAuthServer,
    state: RwLock<IdentityState>,
    bus: Arc<EventBus>,
}

impl IdentityManager {
    pub fn new(bus: Arc<EventBus>, auth: Arc<AuthenticationManager>) -> Self {
        Self {
            auth,
            oauth: OAuthServer::new(Arc::clone(&bus)),
            state: RwLock::new(IdentityState::default()),
            bus,
        }
    }

    /// This system's OAuth 2.0 authorization server.
    pub fn oauth(&self) -> &OAuthServer {
        &self.oauth
    }

    /// Register an external identity provider.
    pub async fn register_provider(
        &self,
        provider: Arc<dyn IdentityProvider>,
    ) -> IdentityResult<()> {
        let id = provider.id().to_string();
        {
            let mut state = self.state.write().await;
            if state.providers.contains_key(&id) {
                return Err(IdentityError::DuplicateProvider(id));
            }
            state.providers.insert(id.clone(), provider);
        }

        self.bus
            .emit_new(
                "identity.provider_registered",
                SOURCE,
                json!({"provider_id": id}),
            )
            .await;
        Ok(())
    }

    pub async fn get_provider(&self, provider_id: &str) -> Option<Arc<dyn IdentityProvider>> {
        self.state.read().await.providers.get(provider_id).cloned()
    }

    pub async fn list_providers(&self) -> Vec<String> {
        self.state.read().await.providers.keys().cloned().collect()
    }

    /// Start a federated sign-in with a provider.
    pub async fn initiate_sso_login(&self, provider_id: &str) -> IdentityResult<LoginInitiation> {
        let provider = self.provider(provider_id).await?;
        provider.begin_login().await
    }

    /// Complete a federated sign-in, resolving the external identity to a
    /// local user.
    pub async fn complete_sso_login(
        &self,
        provider_id: &str,
        response: &LoginResponse,
    ) -> IdentityResult<User> {
        let provider = self.provider(provider_id).await?;
        let identity = provider.complete_login(response).await?;
        let user = self.resolve_local_user(&provider, identity).await?;

        self.bus
            .emit_new(
                "identity.sso_login",
                SOURCE,
                json!({"provider_id": provider_id, "user_id": user.user_id}),
            )
            .await;
        Ok(user)
    }

    /// Authenticate directly against a directory provider.
    pub async fn authenticate_with_directory(
        &self,
        provider_id: &str,
        username: &str,
        password: &str,
    ) -> IdentityResult<User> {
        let provider = self.provider(provider_id).await?;
        let identity = provider.authenticate_direct(username, password).await?;
        let user = self.resolve_local_user(&provider, identity).await?;

        self.bus
            .emit_new(
                "identity.sso_login",
                SOURCE,
                json!({"provider_id": provider_id, "user_id": user.user_id}),
            )
            .await;
        Ok(user)
    }

    /// Explicitly link an external identity to a local user.
    pub async fn link_user_identity(
        &self,
        user_id: Uuid,
        provider_id: &str,
        external_id: &str,
        user_info: Metadata,
    ) -> IdentityResult<IdentityLink> {
        let link = {
            let mut state = self.state.write().await;
            let key = (provider_id.to_string(), external_id.to_string());
            if let Some(existing) = state.links.get(&key)
                && existing.user_id != user_id
            {
                return Err(IdentityError::IdentityAlreadyLinked);
            }
            let link = IdentityLink {
                user_id,
                provider_id: provider_id.to_string(),
                external_id: external_id.to_string(),
                linked_at: Utc::now(),
                last_login: None,
                user_info,
            };
            state.links.insert(key.clone(), link.clone());
            let user_keys = state.user_links.entry(user_id).or_default();
            if !user_keys.contains(&key) {
                user_keys.push(key);
            }
            link
        };

        self.bus
            .emit_new(
                "identity.linked",
                SOURCE,
                json!({
                    "user_id": user_id,
                    "provider_id": provider_id,
                    "external_id": external_id,
                }),
            )
            .await;
        Ok(link)
    }

    /// Remove the link between a user and a provider. Returns `false` if
    /// there was none.
    pub async fn unlink_user_identity(&self, user_id: Uuid, provider_id: &str) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            let Some(keys) = state.user_links.get_mut(&user_id) else {
                return false;
            };
            let Some(position) = keys.iter().position(|(p, _)| p == provider_id) else {
                return false;
            };
            let key = keys.remove(position);
            state.links.remove(&key);
            key
        };

        self.bus
            .emit_new(
                "identity.unlinked",
                SOURCE,
                json!({
                    "user_id": user_id,
                    "provider_id": removed.0,
                    "external_id": removed.1,
                }),
            )
            .await;
        true
    }

    /// All external identities linked to a user.
    pub async fn get_user_identities(&self, user_id: Uuid) -> Vec<IdentityLink> {
        let state = self.state.read().await;
        state
            .user_links
            .get(&user_id)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| state.links.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn provider(&self, provider_id: &str) -> IdentityResult<Arc<dyn IdentityProvider>> {
        self.get_provider(provider_id)
            .await
            .ok_or_else(|| IdentityError::UnknownProvider(provider_id.to_string()))
    }

    /// Resolve an external identity to a local user: existing link, email
    /// match, then auto-provision.
    async fn resolve_local_user(
        &self,
        provider: &Arc<dyn IdentityProvider>,
        identity: ExternalIdentity,
    ) -> IdentityResult<User> {
        let key = (provider.id().to_string(), identity.external_id.clone());

        let linked_user = {
            let mut state = self.state.write().await;
            if let Some(link) = state.links.get_mut(&key) {
                link.last_login = Some(Utc::now());
                link.user_info = identity.raw.clone();
                Some(link.user_id)
            } else {
                None
            }
        };
        if let Some(user_id) = linked_user {
            let user = self
                .auth
                .get_user_by_id(user_id)
                .await
                .ok_or(IdentityError::NoLinkedUser)?;
            return Ok(self.maybe_sync_profile(provider, &identity, user).await);
        }

        if let Some(email) = &identity.email
            && let Some(user) = self.auth.get_user_by_email(email).await
        {
            self.link_user_identity(
                user.user_id,
                provider.id(),
                &identity.external_id,
                identity.raw.clone(),
            )
            .await?;
            return Ok(user);
        }

        if !provider.options().auto_provision_users {
            return Err(IdentityError::NoLinkedUser);
        }
        self.provision_user(provider, identity).await
    }

    /// Create a local account for a first-time external identity.
    async fn provision_user(
        &self,
        provider: &Arc<dyn IdentityProvider>,
        identity: ExternalIdentity,
    ) -> IdentityResult<User> {
        let base = identity
            .username
            .clone()
            .or_else(|| {
                identity
                    .email
                    .as_deref()
                    .and_then(|email| email.split('@').next())
                    .map(String::from)
            })
            .unwrap_or_else(|| format!("{}_{}", provider.id(), identity.external_id));

        let mut username = base.clone();
        let mut suffix = 1;
        while self.auth.get_user_by_username(&username).await.is_some() {
            username = format!("{base}{suffix}");
            suffix += 1;
        }

        let email = identity
            .email
            .clone()
            .unwrap_or_else(|| format!("{username}@example.com"));

        let mut new_user = NewUser::new(&username, &email, token::urlsafe(16));
        new_user.first_name = identity.first_name.clone();
        new_user.last_name = identity.last_name.clone();
        new_user
            .metadata
            .insert("source".to_string(), json!("external"));
        new_user
            .metadata
            .insert("provider".to_string(), json!(provider.id()));

        let user = self.auth.register_user(new_user).await?;
        info!(
            target: "warden::identity",
            provider = provider.id(),
            user = %user.label(),
            "auto-provisioned user for external identity"
        );

        self.link_user_identity(
            user.user_id,
            provider.id(),
            &identity.external_id,
            identity.raw.clone(),
        )
        .await?;

        self.bus
            .emit_new(
                "identity.user_provisioned",
                SOURCE,
                json!({
                    "user_id": user.user_id,
                    "provider_id": provider.id(),
                    "external_id": identity.external_id,
                }),
            )
            .await;
        Ok(user)
    }

    /// When the provider syncs profiles, fold changed email/name values
    /// into the local record on every sign-in.
    async fn maybe_sync_profile(
        &self,
        provider: &Arc<dyn IdentityProvider>,
        identity: &ExternalIdentity,
        user: User,
    ) -> User {
        if !provider.options().sync_profile {
            return user;
        }

        let mut update = UserUpdate::default();
        if let Some(email) = &identity.email
            && !email.eq_ignore_ascii_case(&user.email)
        {
            update.email = Some(email.clone());
        }
        if let Some(first_name) = &identity.first_name
            && user.first_name.as_deref() != Some(first_name)
        {
            update.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &identity.last_name
            && user.last_name.as_deref() != Some(last_name)
        {
            update.last_name = Some(last_name.clone());
        }
        if update.changed_fields().is_empty() {
            return user;
        }

        match self.auth.update_user(user.user_id, update).await {
            Ok(updated) => updated,
            Err(error) => {
                warn!(
                    target: "warden::identity",
                    provider = provider.id(),
                    user_id = %user.user_id,
                    error = %error,
                    "profile sync failed; keeping local values"
                );
                user
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ProviderKind, ProviderOptions};
    use async_trait::async_trait;

    /// Provider double that returns a fixed identity.
    struct StaticProvider {
        id: String,
        identity: ExternalIdentity,
        options: ProviderOptions,
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        fn id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            "Static"
        }
        fn kind(&self) -> ProviderKind {
            ProviderKind::OAuth
        }
        fn options(&self) -> ProviderOptions {
            self.options
        }
        async fn begin_login(&self) -> IdentityResult<LoginInitiation> {
            Ok(LoginInitiation {
                login_url: "https://idp/login".into(),
                state: "state".into(),
                expires_at: Utc::now() + chrono::Duration::minutes(15),
            })
        }
        async fn complete_login(
            &self,
            _response: &LoginResponse,
        ) -> IdentityResult<ExternalIdentity> {
            Ok(self.identity.clone())
        }
    }

    fn identity(external_id: &str, email: Option<&str>) -> ExternalIdentity {
        ExternalIdentity {
            external_id: external_id.to_string(),
            username: None,
            email: email.map(String::from),
            first_name: Some("N".into()),
            last_name: Some("U".into()),
            raw: Metadata::new(),
        }
    }

    async fn setup(
        provider_id: &str,
        external: ExternalIdentity,
        options: ProviderOptions,
    ) -> (Arc<AuthenticationManager>, IdentityManager) {
        let bus = Arc::new(EventBus::new());
        let auth = Arc::new(AuthenticationManager::new(Arc::clone(&bus)));
        let manager = IdentityManager::new(bus, Arc::clone(&auth));
        manager
            .register_provider(Arc::new(StaticProvider {
                id: provider_id.to_string(),
                identity: external,
                options,
            }))
            .await
            .unwrap();
        (auth, manager)
    }

    #[tokio::test]
    async fn auto_provisions_and_reuses_the_same_user() {
        let (_, manager) = setup(
            "google_oauth",
            identity("9", Some("new@ex.com")),
            ProviderOptions {
                auto_provision_users: true,
                sync_profile: false,
            },
        )
        .await;

        let user = manager
            .complete_sso_login("google_oauth", &LoginResponse::default())
            .await
            .unwrap();
        // Username derives from the email local part
        assert_eq!(user.username, "new");
        assert_eq!(user.email, "new@ex.com");
        assert_eq!(user.first_name.as_deref(), Some("N"));

        // Second sign-in resolves to the same account, no duplicate
        let again = manager
            .complete_sso_login("google_oauth", &LoginResponse::default())
            .await
            .unwrap();
        assert_eq!(again.user_id, user.user_id);

        let links = manager.get_user_identities(user.user_id).await;
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].external_id, "9");
        assert!(links[0].last_login.is_some());
    }

    #[tokio::test]
    async fn username_collision_gets_a_numeric_suffix() {
        let (auth, manager) = setup(
            "google_oauth",
            identity("9", Some("new@other.com")),
            ProviderOptions {
                auto_provision_users: true,
                sync_profile: false,
            },
        )
        .await;
        auth.register_user(NewUser::new("new", "taken@ex.com", "pw"))
            .await
            .unwrap();

        let user = manager
            .complete_sso_login("google_oauth", &LoginResponse::default())
            .await
            .unwrap();
        assert_eq!(user.username, "new1");
    }

    #[tokio::test]
    async fn email_match_links_to_the_existing_user() {
        let (auth, manager) = setup(
            "google_oauth",
            identity("9", Some("alice@ex.com")),
            ProviderOptions::default(),
        )
        .await;
        let alice = auth
            .register_user(NewUser::new("alice", "alice@ex.com", "pw"))
            .await
            .unwrap();

        let user = manager
            .complete_sso_login("google_oauth", &LoginResponse::default())
            .await
            .unwrap();
        assert_eq!(user.user_id, alice.user_id);
        assert_eq!(manager.get_user_identities(alice.user_id).await.len(), 1);
    }

    #[tokio::test]
    async fn without_auto_provision_unknown_identities_fail() {
        let (_, manager) = setup(
            "corp_saml",
            identity("stranger", None),
            ProviderOptions::default(),
        )
        .await;
        let err = manager
            .complete_sso_login("corp_saml", &LoginResponse::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::NoLinkedUser));
    }

    #[tokio::test]
    async fn an_external_identity_belongs_to_one_user() {
        let (auth, manager) = setup(
            "google_oauth",
            identity("9", None),
            ProviderOptions::default(),
        )
        .await;
        let a = auth.register_user(NewUser::new("a", "a@ex.com", "pw")).await.unwrap();
        let b = auth.register_user(NewUser::new("b", "b@ex.com", "pw")).await.unwrap();

        manager
            .link_user_identity(a.user_id, "google_oauth", "9", Metadata::new())
            .await
            .unwrap();
        let err = manager
            .link_user_identity(b.user_id, "google_oauth", "9", Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::IdentityAlreadyLinked));

        assert!(manager.unlink_user_identity(a.user_id, "google_oauth").await);
        assert!(!manager.unlink_user_identity(a.user_id, "google_oauth").await);
        manager
            .link_user_identity(b.user_id, "google_oauth", "9", Metadata::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn profile_sync_updates_changed_fields() {
        let (auth, manager) = setup(
            "corp_saml",
            ExternalIdentity {
                external_id: "e1".into(),
                username: None,
                email: Some("fresh@ex.com".into()),
                first_name: Some("Fresh".into()),
                last_name: Some("Name".into()),
                raw: Metadata::new(),
            },
            ProviderOptions {
                auto_provision_users: false,
                sync_profile: true,
            },
        )
        .await;
        let user = auth
            .register_user(NewUser::new("stale", "stale@ex.com", "pw"))
            .await
            .unwrap();
        manager
            .link_user_identity(user.user_id, "corp_saml", "e1", Metadata::new())
            .await
            .unwrap();

        let resolved = manager
            .complete_sso_login("corp_saml", &LoginResponse::default())
            .await
            .unwrap();
        assert_eq!(resolved.email, "fresh@ex.com");
        assert_eq!(resolved.first_name.as_deref(), Some("Fresh"));
    }

    #[tokio::test]
    async fn duplicate_provider_registration_fails() {
        let (_, manager) = setup("p", identity("1", None), ProviderOptions::default()).await;
        let err = manager
            .register_provider(Arc::new(StaticProvider {
                id: "p".into(),
                identity: identity("1", None),
                options: ProviderOptions::default(),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::DuplicateProvider(_)));
    }
}
