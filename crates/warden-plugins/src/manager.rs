//! Plugin Security Manager
//!
//! Gates third-party plugin behavior behind user-granted capability sets:
//! a seeded capability catalog, manifest registration, a consent lifecycle
//! with explicit request windows, opaque security tokens, and inter-plugin
//! authorization.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use warden_core::token;
use warden_events::EventBus;

use crate::error::{PluginSecurityError, PluginSecurityResult, TokenRejection};
use crate::types::{
    ConsentRequest, PluginConsent, PluginManifest, PluginPermission, PluginSecurityToken,
    RiskLevel, SecurityContext,
};

const SOURCE: &str = "plugin_security";

/// Consent requests stay answerable for thirty minutes.
const CONSENT_REQUEST_TTL_MINUTES: i64 = 30;
/// Default security-token lifetime.
const TOKEN_TTL_HOURS: i64 = 24;

/// Capability required for plugin-to-plugin messaging.
pub const COMMUNICATE_PERMISSION: &str = "plugin.communicate";
/// Capability required to read another plugin's data.
pub const DATA_ACCESS_PERMISSION: &str = "plugin.data_access";

struct PendingConsentRequest {
    user_id: Uuid,
    plugin_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct PluginState {
    catalog: HashMap<String, PluginPermission>,
    manifests: HashMap<String, PluginManifest>,
    consents: HashMap<Uuid, PluginConsent>,
    /// user -> plugin -> consent id (latest decision wins)
    user_plugin_consents: HashMap<Uuid, HashMap<String, Uuid>>,
    consent_requests: HashMap<Uuid, PendingConsentRequest>,
    tokens: HashMap<Uuid, PluginSecurityToken>,
    token_values: HashMap<String, Uuid>,
    contexts: HashMap<Uuid, SecurityContext>,
}

/// Manager for plugin capabilities, consent, and tokens.
pub struct PluginSecurityManager {
    state: RwLock<PluginState>,
    bus: Arc<EventBus>,
}

impl PluginSecurityManager {
    /// Create a manager with the default capability catalog seeded.
    pub fn new(bus: Arc<EventBus>) -> Self {
        let mut state = PluginState::default();
        for permission in default_catalog() {
            state.catalog.insert(permission.id.clone(), permission);
        }
        Self {
            state: RwLock::new(state),
            bus,
        }
    }

    // ----- capability catalog -------------------------------------------

    /// Register an additional plugin capability.
    pub async fn register_permission(
        &self,
        permission: PluginPermission,
    ) -> PluginSecurityResult<PluginPermission> {
        {
            let mut state = self.state.write().await;
            if state.catalog.contains_key(&permission.id) {
                return Err(PluginSecurityError::DuplicatePermission(permission.id));
            }
            state.catalog.insert(permission.id.clone(), permission.clone());
        }

        self.bus
            .emit_new(
                "plugin_security.permission_registered",
                SOURCE,
                json!({"permission_id": permission.id, "risk": permission.risk}),
            )
            .await;
        Ok(permission)
    }

    pub async fn get_permission(&self, permission_id: &str) -> Option<PluginPermission> {
        self.state.read().await.catalog.get(permission_id).cloned()
    }

    pub async fn permissions_by_category(&self, category: &str) -> Vec<PluginPermission> {
        self.state
            .read()
            .await
            .catalog
            .values()
            .filter(|p| p.category == category)
            .cloned()
            .collect()
    }

    // ----- manifests ----------------------------------------------------

    /// Register (or upgrade) a plugin manifest. Every requested permission
    /// must be in the catalog.
    pub async fn register_plugin_manifest(
        &self,
        manifest: PluginManifest,
    ) -> PluginSecurityResult<PluginManifest> {
        {
            let mut state = self.state.write().await;
            for permission_id in &manifest.requested_permissions {
                if !state.catalog.contains_key(permission_id) {
                    return Err(PluginSecurityError::UnknownPermission(permission_id.clone()));
                }
            }
            state
                .manifests
                .insert(manifest.plugin_id.clone(), manifest.clone());
        }

        info!(
            target: "warden::plugins",
            plugin = %manifest.plugin_id,
            version = %manifest.version,
            "plugin manifest registered"
        );
        self.bus
            .emit_new(
                "plugin_security.manifest_registered",
                SOURCE,
                json!({
                    "plugin_id": manifest.plugin_id,
                    "version": manifest.version,
                    "requested_permissions": manifest.requested_permissions,
                }),
            )
            .await;
        Ok(manifest)
    }

    pub async fn get_plugin_manifest(&self, plugin_id: &str) -> Option<PluginManifest> {
        self.state.read().await.manifests.get(plugin_id).cloned()
    }

    // ----- consent lifecycle --------------------------------------------

    /// Build a consent request for the user. `requested` defaults to the
    /// manifest's full set and must be a subset of it.
    pub async fn request_user_consent(
        &self,
        user_id: Uuid,
        plugin_id: &str,
        requested: Option<Vec<String>>,
    ) -> PluginSecurityResult<ConsentRequest> {
        let request = {
            let mut state = self.state.write().await;
            let manifest = state
                .manifests
                .get(plugin_id)
                .ok_or_else(|| PluginSecurityError::UnknownPlugin(plugin_id.to_string()))?
                .clone();

            let requested = match requested {
                Some(requested) => {
                    for permission_id in &requested {
                        if !manifest.requested_permissions.contains(permission_id) {
                            return Err(PluginSecurityError::PermissionNotRequested(
                                permission_id.clone(),
                            ));
                        }
                    }
                    requested
                }
                None => manifest.requested_permissions.clone(),
            };

            let requested_permissions = requested
                .iter()
                .filter_map(|id| state.catalog.get(id).cloned())
                .collect();
            let existing_consent = Self::lookup_consent(&state, user_id, plugin_id);

            let request = ConsentRequest {
                request_id: Uuid::new_v4(),
                user_id,
                plugin_id: plugin_id.to_string(),
                plugin_name: manifest.name.clone(),
                plugin_author: manifest.author.clone(),
                plugin_description: manifest.description.clone(),
                requested_permissions,
                existing_consent,
                created_at: Utc::now(),
                expires_at: Utc::now() + Duration::minutes(CONSENT_REQUEST_TTL_MINUTES),
            };
            state.consent_requests.retain(|_, r| r.expires_at > Utc::now());
            state.consent_requests.insert(
                request.request_id,
                PendingConsentRequest {
                    user_id,
                    plugin_id: plugin_id.to_string(),
                    expires_at: request.expires_at,
                },
            );
            request
        };

        self.bus
            .emit_new(
                "plugin_security.consent_requested",
                SOURCE,
                json!({
                    "request_id": request.request_id,
                    "user_id": user_id,
                    "plugin_id": plugin_id,
                }),
            )
            .await;
        Ok(request)
    }

    /// Record the user's decision on a pending consent request.
    pub async fn process_consent_response(
        &self,
        request_id: Uuid,
        user_id: Uuid,
        plugin_id: &str,
        granted: Vec<String>,
        denied: Vec<String>,
        expires_in: Option<Duration>,
    ) -> PluginSecurityResult<PluginConsent> {
        let consent = {
            let mut state = self.state.write().await;

            let request = state
                .consent_requests
                .get(&request_id)
                .ok_or(PluginSecurityError::UnknownConsentRequest)?;
            if request.user_id != user_id || request.plugin_id != plugin_id {
                return Err(PluginSecurityError::ConsentRequestMismatch);
            }
            if Utc::now() >= request.expires_at {
                state.consent_requests.remove(&request_id);
                return Err(PluginSecurityError::ConsentRequestExpired);
            }

            let manifest = state
                .manifests
                .get(plugin_id)
                .ok_or_else(|| PluginSecurityError::UnknownPlugin(plugin_id.to_string()))?;
            for permission_id in granted.iter().chain(denied.iter()) {
                if !manifest.requested_permissions.contains(permission_id) {
                    return Err(PluginSecurityError::PermissionNotRequested(
                        permission_id.clone(),
                    ));
                }
            }
            if let Some(overlap) = granted.iter().find(|id| denied.contains(id)) {
                return Err(PluginSecurityError::OverlappingConsent(overlap.clone()));
            }

            state.consent_requests.remove(&request_id);

            let consent = PluginConsent {
                consent_id: Uuid::new_v4(),
                user_id,
                plugin_id: plugin_id.to_string(),
                granted,
                denied,
                created_at: Utc::now(),
                expires_at: expires_in.map(|d| Utc::now() + d),
                active: true,
            };
            state.consents.insert(consent.consent_id, consent.clone());
            state
                .user_plugin_consents
                .entry(user_id)
                .or_default()
                .insert(plugin_id.to_string(), consent.consent_id);
            consent
        };

        info!(
            target: "warden::plugins",
            user_id = %user_id,
            plugin = plugin_id,
            granted = consent.granted.len(),
            denied = consent.denied.len(),
            "consent processed"
        );
        self.bus
            .emit_new(
                "plugin_security.consent_processed",
                SOURCE,
                json!({
                    "consent_id": consent.consent_id,
                    "user_id": user_id,
                    "plugin_id": plugin_id,
                    "granted": consent.granted,
                    "denied": consent.denied,
                }),
            )
            .await;
        Ok(consent)
    }

    pub async fn get_user_plugin_consent(
        &self,
        user_id: Uuid,
        plugin_id: &str,
    ) -> Option<PluginConsent> {
        let state = self.state.read().await;
        Self::lookup_consent(&state, user_id, plugin_id)
    }

    /// Withdraw consent. Idempotent; `false` only when no consent exists.
    pub async fn revoke_user_consent(&self, user_id: Uuid, plugin_id: &str) -> bool {
        let payload = {
            let mut state = self.state.write().await;
            let Some(consent_id) = state
                .user_plugin_consents
                .get(&user_id)
                .and_then(|plugins| plugins.get(plugin_id))
                .copied()
            else {
                return false;
            };
            match state.consents.get_mut(&consent_id) {
                Some(consent) if consent.active => {
                    consent.active = false;
                    Some(json!({
                        "consent_id": consent_id,
                        "user_id": user_id,
                        "plugin_id": plugin_id,
                    }))
                }
                _ => None,
            }
        };

        if let Some(payload) = payload {
            self.bus
                .emit_new("plugin_security.consent_revoked", SOURCE, payload)
                .await;
        }
        true
    }

    // ----- runtime checks -----------------------------------------------

    /// Whether the plugin may exercise a capability on behalf of the user.
    pub async fn check_plugin_permission(
        &self,
        user_id: Uuid,
        plugin_id: &str,
        permission_id: &str,
    ) -> bool {
        let state = self.state.read().await;
        if !state.catalog.contains_key(permission_id) {
            return false;
        }
        let Some(manifest) = state.manifests.get(plugin_id) else {
            return false;
        };
        if !manifest.requested_permissions.iter().any(|p| p == permission_id) {
            return false;
        }
        let Some(consent) = Self::lookup_consent(&state, user_id, plugin_id) else {
            return false;
        };
        consent.is_usable()
            && consent.granted.iter().any(|p| p == permission_id)
            && !consent.denied.iter().any(|p| p == permission_id)
    }

    /// Throw-on-deny variant of [`Self::check_plugin_permission`].
    pub async fn enforce_plugin_permission(
        &self,
        user_id: Uuid,
        plugin_id: &str,
        permission_id: &str,
    ) -> PluginSecurityResult<()> {
        if self.check_plugin_permission(user_id, plugin_id, permission_id).await {
            Ok(())
        } else {
            Err(PluginSecurityError::PluginLacksPermission {
                plugin_id: plugin_id.to_string(),
                permission: permission_id.to_string(),
            })
        }
    }

    // ----- security tokens ----------------------------------------------

    /// Mint an opaque token for a `(user, plugin)` pair.
    pub async fn generate_security_token(
        &self,
        user_id: Uuid,
        plugin_id: &str,
        expires_in: Option<Duration>,
    ) -> PluginSecurityResult<PluginSecurityToken> {
        let token = {
            let mut state = self.state.write().await;
            if !state.manifests.contains_key(plugin_id) {
                return Err(PluginSecurityError::UnknownPlugin(plugin_id.to_string()));
            }
            let now = Utc::now();
            let token = PluginSecurityToken {
                token_id: Uuid::new_v4(),
                token_value: token::urlsafe(32),
                plugin_id: plugin_id.to_string(),
                user_id,
                created_at: now,
                expires_at: now + expires_in.unwrap_or_else(|| Duration::hours(TOKEN_TTL_HOURS)),
                active: true,
            };
            state
                .token_values
                .insert(token.token_value.clone(), token.token_id);
            state.tokens.insert(token.token_id, token.clone());
            token
        };

        self.bus
            .emit_new(
                "plugin_security.token_generated",
                SOURCE,
                json!({
                    "token_id": token.token_id,
                    "user_id": user_id,
                    "plugin_id": plugin_id,
                }),
            )
            .await;
        Ok(token)
    }

    /// Validate a presented token value, with auditable failure modes.
    pub async fn validate_security_token(
        &self,
        token_value: &str,
    ) -> Result<PluginSecurityToken, TokenRejection> {
        if token_value.is_empty() {
            return Err(TokenRejection::Invalid);
        }
        let state = self.state.read().await;
        let token_id = state
            .token_values
            .get(token_value)
            .ok_or(TokenRejection::NotFound)?;
        let token = state.tokens.get(token_id).ok_or(TokenRejection::NotFound)?;
        if !token.active {
            return Err(TokenRejection::Inactive);
        }
        if token.is_expired() {
            return Err(TokenRejection::Expired);
        }
        Ok(token.clone())
    }

    /// Revoke a token by id. Idempotent; `false` only for an unknown id.
    pub async fn revoke_security_token(&self, token_id: Uuid) -> bool {
        let payload = {
            let mut state = self.state.write().await;
            match state.tokens.get_mut(&token_id) {
                None => return false,
                Some(token) if !token.active => None,
                Some(token) => {
                    token.active = false;
                    Some(json!({
                        "token_id": token_id,
                        "user_id": token.user_id,
                        "plugin_id": token.plugin_id,
                    }))
                }
            }
        };

        if let Some(payload) = payload {
            self.bus
                .emit_new("plugin_security.token_revoked", SOURCE, payload)
                .await;
        }
        true
    }

    // ----- security contexts --------------------------------------------

    /// Mint a token plus a snapshot of the currently granted permissions.
    pub async fn create_security_context(
        &self,
        user_id: Uuid,
        plugin_id: &str,
    ) -> PluginSecurityResult<SecurityContext> {
        let consent = self
            .get_user_plugin_consent(user_id, plugin_id)
            .await
            .filter(PluginConsent::is_usable)
            .ok_or_else(|| PluginSecurityError::NoActiveConsent(plugin_id.to_string()))?;

        let token = self.generate_security_token(user_id, plugin_id, None).await?;
        let context = SecurityContext {
            context_id: Uuid::new_v4(),
            user_id,
            plugin_id: plugin_id.to_string(),
            token_value: token.token_value.clone(),
            granted_permissions: consent.granted,
            created_at: token.created_at,
            expires_at: token.expires_at,
        };
        self.state
            .write()
            .await
            .contexts
            .insert(context.context_id, context.clone());
        Ok(context)
    }

    pub async fn get_security_context(&self, context_id: Uuid) -> Option<SecurityContext> {
        self.state.read().await.contexts.get(&context_id).cloned()
    }

    // ----- inter-plugin authorization -----------------------------------

    /// May `source` message `target` on behalf of the user?
    pub async fn authorize_plugin_communication(
        &self,
        source_plugin: &str,
        target_plugin: &str,
        user_id: Uuid,
    ) -> PluginSecurityResult<()> {
        self.enforce_plugin_permission(user_id, source_plugin, COMMUNICATE_PERMISSION)
            .await?;
        if self.get_plugin_manifest(target_plugin).await.is_none() {
            return Err(PluginSecurityError::UnknownPlugin(target_plugin.to_string()));
        }
        let has_target_consent = self
            .get_user_plugin_consent(user_id, target_plugin)
            .await
            .is_some_and(|consent| consent.is_usable());
        if !has_target_consent {
            return Err(PluginSecurityError::NoActiveConsent(target_plugin.to_string()));
        }
        debug!(
            target: "warden::plugins",
            source = source_plugin,
            dest = target_plugin,
            "inter-plugin communication authorized"
        );
        Ok(())
    }

    /// May `source` read `target`'s data on behalf of the user?
    pub async fn authorize_plugin_data_access(
        &self,
        source_plugin: &str,
        target_plugin: &str,
        user_id: Uuid,
        _data_type: &str,
    ) -> PluginSecurityResult<()> {
        self.authorize_plugin_communication(source_plugin, target_plugin, user_id)
            .await?;
        self.enforce_plugin_permission(user_id, source_plugin, DATA_ACCESS_PERMISSION)
            .await
    }

    fn lookup_consent(
        state: &PluginState,
        user_id: Uuid,
        plugin_id: &str,
    ) -> Option<PluginConsent> {
        let consent_id = state.user_plugin_consents.get(&user_id)?.get(plugin_id)?;
        state.consents.get(consent_id).cloned()
    }
}

/// The built-in capability catalog.
fn default_catalog() -> Vec<PluginPermission> {
    let permission = |id: &str,
                      name: &str,
                      description: &str,
                      risk: RiskLevel,
                      category: &str,
                      dangerous: bool| PluginPermission {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        risk,
        category: category.to_string(),
        dangerous,
        requires_explicit_consent: true,
    };

    vec![
        permission("file.read", "Read Files", "Read files from the file system", RiskLevel::Medium, "file_system", false),
        permission("file.write", "Write Files", "Write files to the file system", RiskLevel::High, "file_system", true),
        permission("file.delete", "Delete Files", "Delete files from the file system", RiskLevel::High, "file_system", true),
        permission("network.connect", "Network Connection", "Connect to network resources", RiskLevel::Medium, "network", false),
        permission("network.listen", "Network Listening", "Listen for incoming network connections", RiskLevel::High, "network", true),
        permission("system.execute", "Execute Commands", "Execute system commands", RiskLevel::Critical, "system", true),
        permission("system.info", "System Information", "Access system information", RiskLevel::Medium, "system", false),
        permission("user.profile", "User Profile", "Access user profile information", RiskLevel::Medium, "user_data", false),
        permission("user.contacts", "User Contacts", "Access user contacts", RiskLevel::High, "user_data", true),
        permission("plugin.communicate", "Inter-Plugin Communication", "Communicate with other plugins", RiskLevel::Medium, "plugin", false),
        permission("plugin.data_access", "Plugin Data Access", "Access data from other plugins", RiskLevel::High, "plugin", true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PluginSecurityManager {
        PluginSecurityManager::new(Arc::new(EventBus::new()))
    }

    async fn consent_to(
        manager: &PluginSecurityManager,
        user: Uuid,
        plugin: &str,
        granted: &[&str],
        denied: &[&str],
    ) -> PluginConsent {
        let request = manager.request_user_consent(user, plugin, None).await.unwrap();
        manager
            .process_consent_response(
                request.request_id,
                user,
                plugin,
                granted.iter().map(|p| (*p).to_string()).collect(),
                denied.iter().map(|p| (*p).to_string()).collect(),
                None,
            )
            .await
            .unwrap()
    }

    fn notes_manifest() -> PluginManifest {
        PluginManifest::new("notes", "Notes", "1.2.0", "Acme")
            .with_permissions(&["file.read", "file.write", "plugin.communicate", "plugin.data_access"])
    }

    #[tokio::test]
    async fn catalog_is_seeded() {
        let manager = manager();
        let execute = manager.get_permission("system.execute").await.unwrap();
        assert_eq!(execute.risk, RiskLevel::Critical);
        assert!(execute.dangerous);
        assert_eq!(manager.permissions_by_category("file_system").await.len(), 3);
    }

    #[tokio::test]
    async fn manifest_requires_known_permissions() {
        let manager = manager();
        let err = manager
            .register_plugin_manifest(
                PluginManifest::new("bad", "Bad", "0.1.0", "X").with_permissions(&["warp.core"]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PluginSecurityError::UnknownPermission(_)));

        manager.register_plugin_manifest(notes_manifest()).await.unwrap();
    }

    #[tokio::test]
    async fn consent_flow_and_runtime_check() {
        let manager = manager();
        manager.register_plugin_manifest(notes_manifest()).await.unwrap();
        let user = Uuid::new_v4();

        let request = manager.request_user_consent(user, "notes", None).await.unwrap();
        assert_eq!(request.requested_permissions.len(), 4);
        assert!(request.existing_consent.is_none());

        manager
            .process_consent_response(
                request.request_id,
                user,
                "notes",
                vec!["file.read".into()],
                vec!["file.write".into()],
                None,
            )
            .await
            .unwrap();

        assert!(manager.check_plugin_permission(user, "notes", "file.read").await);
        assert!(!manager.check_plugin_permission(user, "notes", "file.write").await);
        // Not granted, not denied: still no
        assert!(!manager.check_plugin_permission(user, "notes", "plugin.communicate").await);
        // Not in the manifest at all
        assert!(!manager.check_plugin_permission(user, "notes", "system.execute").await);

        let err = manager
            .enforce_plugin_permission(user, "notes", "file.write")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginSecurityError::PluginLacksPermission { .. }));
    }

    #[tokio::test]
    async fn consent_response_is_validated_against_the_request() {
        let manager = manager();
        manager.register_plugin_manifest(notes_manifest()).await.unwrap();
        let user = Uuid::new_v4();

        let err = manager
            .process_consent_response(Uuid::new_v4(), user, "notes", vec![], vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginSecurityError::UnknownConsentRequest));

        let request = manager.request_user_consent(user, "notes", None).await.unwrap();
        let err = manager
            .process_consent_response(
                request.request_id,
                Uuid::new_v4(),
                "notes",
                vec![],
                vec![],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PluginSecurityError::ConsentRequestMismatch));

        let err = manager
            .process_consent_response(
                request.request_id,
                user,
                "notes",
                vec!["system.execute".into()],
                vec![],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PluginSecurityError::PermissionNotRequested(_)));

        let err = manager
            .process_consent_response(
                request.request_id,
                user,
                "notes",
                vec!["file.read".into()],
                vec!["file.read".into()],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PluginSecurityError::OverlappingConsent(_)));
    }

    #[tokio::test]
    async fn revocation_disables_the_consent() {
        let manager = manager();
        manager.register_plugin_manifest(notes_manifest()).await.unwrap();
        let user = Uuid::new_v4();
        consent_to(&manager, user, "notes", &["file.read"], &[]).await;

        assert!(manager.check_plugin_permission(user, "notes", "file.read").await);
        assert!(manager.revoke_user_consent(user, "notes").await);
        assert!(manager.revoke_user_consent(user, "notes").await);
        assert!(!manager.check_plugin_permission(user, "notes", "file.read").await);
        assert!(!manager.revoke_user_consent(user, "unknown").await);
    }

    #[tokio::test]
    async fn expired_consent_grants_nothing() {
        let manager = manager();
        manager.register_plugin_manifest(notes_manifest()).await.unwrap();
        let user = Uuid::new_v4();
        let request = manager.request_user_consent(user, "notes", None).await.unwrap();
        manager
            .process_consent_response(
                request.request_id,
                user,
                "notes",
                vec!["file.read".into()],
                vec![],
                Some(Duration::seconds(-1)),
            )
            .await
            .unwrap();
        assert!(!manager.check_plugin_permission(user, "notes", "file.read").await);
    }

    #[tokio::test]
    async fn token_lifecycle_with_auditable_rejections() {
        let manager = manager();
        manager.register_plugin_manifest(notes_manifest()).await.unwrap();
        let user = Uuid::new_v4();

        let token = manager.generate_security_token(user, "notes", None).await.unwrap();
        let validated = manager.validate_security_token(&token.token_value).await.unwrap();
        assert_eq!(validated.token_id, token.token_id);

        assert_eq!(
            manager.validate_security_token("").await.unwrap_err(),
            TokenRejection::Invalid
        );
        assert_eq!(
            manager.validate_security_token("nope").await.unwrap_err(),
            TokenRejection::NotFound
        );

        assert!(manager.revoke_security_token(token.token_id).await);
        assert!(manager.revoke_security_token(token.token_id).await);
        assert_eq!(
            manager.validate_security_token(&token.token_value).await.unwrap_err(),
            TokenRejection::Inactive
        );

        let short = manager
            .generate_security_token(user, "notes", Some(Duration::seconds(-1)))
            .await
            .unwrap();
        assert_eq!(
            manager.validate_security_token(&short.token_value).await.unwrap_err(),
            TokenRejection::Expired
        );
    }

    #[tokio::test]
    async fn security_context_snapshots_grants() {
        let manager = manager();
        manager.register_plugin_manifest(notes_manifest()).await.unwrap();
        let user = Uuid::new_v4();

        let err = manager.create_security_context(user, "notes").await.unwrap_err();
        assert!(matches!(err, PluginSecurityError::NoActiveConsent(_)));

        consent_to(&manager, user, "notes", &["file.read", "plugin.communicate"], &[]).await;
        let context = manager.create_security_context(user, "notes").await.unwrap();
        assert_eq!(context.granted_permissions.len(), 2);
        assert!(manager.validate_security_token(&context.token_value).await.is_ok());
        assert!(manager.get_security_context(context.context_id).await.is_some());
    }

    #[tokio::test]
    async fn inter_plugin_authorization() {
        let manager = manager();
        manager.register_plugin_manifest(notes_manifest()).await.unwrap();
        manager
            .register_plugin_manifest(
                PluginManifest::new("calendar", "Calendar", "2.0.0", "Acme")
                    .with_permissions(&["user.profile"]),
            )
            .await
            .unwrap();
        let user = Uuid::new_v4();

        // Source lacks plugin.communicate
        consent_to(&manager, user, "notes", &["file.read"], &[]).await;
        let err = manager
            .authorize_plugin_communication("notes", "calendar", user)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginSecurityError::PluginLacksPermission { .. }));

        // Grant communicate, but the user has no consent for the target yet
        consent_to(&manager, user, "notes", &["plugin.communicate"], &[]).await;
        let err = manager
            .authorize_plugin_communication("notes", "calendar", user)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginSecurityError::NoActiveConsent(_)));

        consent_to(&manager, user, "calendar", &["user.profile"], &[]).await;
        manager
            .authorize_plugin_communication("notes", "calendar", user)
            .await
            .unwrap();

        // Data access additionally needs plugin.data_access
        let err = manager
            .authorize_plugin_data_access("notes", "calendar", user, "events")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginSecurityError::PluginLacksPermission { .. }));

        consent_to(
            &manager,
            user,
            "notes",
            &["plugin.communicate", "plugin.data_access"],
            &[],
        )
        .await;
        manager
            .authorize_plugin_data_access("notes", "calendar", user, "events")
            .await
            .unwrap();

        let err = manager
            .authorize_plugin_communication("notes", "ghost", user)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginSecurityError::UnknownPlugin(_)));
    }
}
