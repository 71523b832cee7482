//! External identity providers.
//!
//! Three federation shapes share one capability set: start a login, process
//! the provider's response into an [`ExternalIdentity`], and (for
//! directories) authenticate a username/password directly.

mod directory;
mod oauth;
mod saml;

pub use directory::{
    DirectoryProvider, DirectoryProviderConfig, LdapConnection, LdapDriver, LdapEntry,
};
pub use oauth::{OAuthClientProvider, OAuthProviderConfig};
pub use saml::{SamlProvider, SamlProviderConfig};

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::Metadata;

use crate::error::{IdentityError, IdentityResult};

/// Provider flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OAuth,
    Saml,
    Directory,
}

/// Cross-provider behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderOptions {
    /// Create a local user on first sign-in when no match exists
    pub auto_provision_users: bool,
    /// Update email/name from the IdP on every sign-in
    pub sync_profile: bool,
}

/// What a caller needs to send the user to the IdP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginInitiation {
    pub login_url: String,
    /// Correlation handle: OAuth `state` or SAML request id
    pub state: String,
    pub expires_at: DateTime<Utc>,
}

/// The parameters the IdP sent back (query or form fields).
#[derive(Debug, Clone, Default)]
pub struct LoginResponse {
    pub params: HashMap<String, String>,
}

impl LoginResponse {
    pub fn new(params: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        Self {
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub(crate) fn require(&self, key: &str) -> IdentityResult<&str> {
        self.get(key)
            .ok_or_else(|| IdentityError::MalformedResponse(format!("missing '{key}' parameter")))
    }
}

/// A verified external identity, normalized across provider shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Stable id at the provider (OAuth `sub`/`id`, SAML `NameID`, LDAP DN)
    pub external_id: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Full attribute/claim snapshot as returned by the provider
    pub raw: Metadata,
}

/// Uniform provider surface consumed by the identity manager.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Stable provider id, e.g. `"google_oauth"`.
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn options(&self) -> ProviderOptions;

    /// Start a browser login flow.
    async fn begin_login(&self) -> IdentityResult<LoginInitiation>;

    /// Process the provider's response into an identity.
    async fn complete_login(&self, response: &LoginResponse) -> IdentityResult<ExternalIdentity>;

    /// Directly verify a username/password (directory providers only).
    async fn authenticate_direct(
        &self,
        _username: &str,
        _password: &str,
    ) -> IdentityResult<ExternalIdentity> {
        Err(IdentityError::DirectAuthUnsupported)
    }
}

/// Build an [`ExternalIdentity`] from an OIDC-style userinfo document.
pub(crate) fn identity_from_userinfo(
    info: serde_json::Value,
) -> IdentityResult<ExternalIdentity> {
    let get = |keys: &[&str]| -> Option<String> {
        keys.iter().find_map(|key| {
            info.get(*key).and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        })
    };

    let external_id = get(&["id", "sub"]).ok_or(IdentityError::MissingExternalId)?;
    let raw = match &info {
        serde_json::Value::Object(map) => map.clone().into_iter().collect(),
        _ => Metadata::new(),
    };
    Ok(ExternalIdentity {
        external_id,
        username: get(&["username", "preferred_username"]),
        email: get(&["email"]),
        first_name: get(&["given_name", "first_name"]),
        last_name: get(&["family_name", "last_name"]),
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn userinfo_mapping_prefers_id_then_sub() {
        let identity = identity_from_userinfo(json!({
            "sub": "sub-1",
            "email": "a@ex.com",
            "given_name": "A",
            "family_name": "B",
            "preferred_username": "ab"
        }))
        .unwrap();
        assert_eq!(identity.external_id, "sub-1");
        assert_eq!(identity.username.as_deref(), Some("ab"));
        assert_eq!(identity.first_name.as_deref(), Some("A"));

        // Numeric ids are stringified
        let identity = identity_from_userinfo(json!({"id": 9})).unwrap();
        assert_eq!(identity.external_id, "9");

        let err = identity_from_userinfo(json!({"email": "x@ex.com"})).unwrap_err();
        assert!(matches!(err, IdentityError::MissingExternalId));
    }
}
