//! Plugin security entity types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::Metadata;

/// Risk class of a plugin capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// A static plugin capability in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginPermission {
    /// Stable id, e.g. `file.read`
    pub id: String,
    pub name: String,
    pub description: String,
    pub risk: RiskLevel,
    pub category: String,
    pub dangerous: bool,
    pub requires_explicit_consent: bool,
}

/// A plugin's declared identity and requested capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    /// Capability ids the plugin may ever be granted
    pub requested_permissions: Vec<String>,
    pub min_api_version: Option<String>,
    pub max_api_version: Option<String>,
    pub metadata: Metadata,
}

impl PluginManifest {
    pub fn new(
        plugin_id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: author.into(),
            requested_permissions: Vec::new(),
            min_api_version: None,
            max_api_version: None,
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.requested_permissions = permissions.iter().map(|p| (*p).to_string()).collect();
        self
    }
}

/// A user's per-plugin consent decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConsent {
    pub consent_id: Uuid,
    pub user_id: Uuid,
    pub plugin_id: String,
    pub granted: Vec<String>,
    pub denied: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl PluginConsent {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    pub fn is_usable(&self) -> bool {
        self.active && !self.is_expired()
    }
}

/// A pending consent request shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub request_id: Uuid,
    pub user_id: Uuid,
    pub plugin_id: String,
    pub plugin_name: String,
    pub plugin_author: String,
    pub plugin_description: String,
    /// Full catalog detail for each requested permission
    pub requested_permissions: Vec<PluginPermission>,
    /// The user's previous decision, when one exists
    pub existing_consent: Option<PluginConsent>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// An opaque per-(user, plugin) bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSecurityToken {
    pub token_id: Uuid,
    /// URL-safe opaque value presented by the plugin
    pub token_value: String,
    pub plugin_id: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

impl PluginSecurityToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// A snapshot of what a plugin may do on behalf of a user, minted together
/// with a security token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityContext {
    pub context_id: Uuid,
    pub user_id: Uuid,
    pub plugin_id: String,
    pub token_value: String,
    /// Granted permissions at mint time
    pub granted_permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
