//! LDAP / Active Directory provider.
//!
//! The LDAP driver itself is an external collaborator: the provider binds
//! with a service account, searches for the user's DN, then re-binds as
//! that DN with the supplied password.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use warden_core::Metadata;

use super::{
    ExternalIdentity, IdentityProvider, LoginInitiation, LoginResponse, ProviderKind,
    ProviderOptions,
};
use crate::error::{IdentityError, IdentityResult};

/// One directory entry: its DN plus requested attributes.
#[derive(Debug, Clone)]
pub struct LdapEntry {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl LdapEntry {
    pub fn first_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// A live directory connection (external collaborator).
#[async_trait]
pub trait LdapConnection: Send + Sync {
    /// Bind as a DN. `Ok(false)` means the credentials were rejected.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> IdentityResult<bool>;

    /// Subtree search under `base_dn`.
    async fn search(
        &mut self,
        base_dn: &str,
        filter: &str,
        attributes: &[String],
    ) -> IdentityResult<Vec<LdapEntry>>;
}

/// Directory connection factory (external collaborator).
#[async_trait]
pub trait LdapDriver: Send + Sync {
    async fn connect(&self, url: &str) -> IdentityResult<Box<dyn LdapConnection>>;
}

/// Configuration for an LDAP/AD provider.
#[derive(Debug, Clone)]
pub struct DirectoryProviderConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Service account used for the search phase
    pub bind_dn: String,
    pub bind_password: String,
    pub base_dn: String,
    /// Search filter with a `{username}` placeholder
    pub user_search_filter: String,
    pub username_attribute: String,
    pub email_attribute: String,
    pub first_name_attribute: String,
    pub last_name_attribute: String,
    pub auto_provision_users: bool,
    pub sync_profile: bool,
}

impl DirectoryProviderConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        bind_dn: impl Into<String>,
        bind_password: impl Into<String>,
        base_dn: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            bind_dn: bind_dn.into(),
            bind_password: bind_password.into(),
            base_dn: base_dn.into(),
            user_search_filter: "(uid={username})".to_string(),
            username_attribute: "uid".to_string(),
            email_attribute: "mail".to_string(),
            first_name_attribute: "givenName".to_string(),
            last_name_attribute: "sn".to_string(),
            auto_provision_users: false,
            sync_profile: false,
        }
    }
}

/// LDAP/AD identity provider.
pub struct DirectoryProvider {
    config: DirectoryProviderConfig,
    driver: Arc<dyn LdapDriver>,
}

impl DirectoryProvider {
    pub fn new(config: DirectoryProviderConfig, driver: Arc<dyn LdapDriver>) -> Self {
        Self { config, driver }
    }

    fn requested_attributes(&self) -> Vec<String> {
        vec![
            self.config.username_attribute.clone(),
            self.config.email_attribute.clone(),
            self.config.first_name_attribute.clone(),
            self.config.last_name_attribute.clone(),
        ]
    }
}

#[async_trait]
impl IdentityProvider for DirectoryProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Directory
    }

    fn options(&self) -> ProviderOptions {
        ProviderOptions {
            auto_provision_users: self.config.auto_provision_users,
            sync_profile: self.config.sync_profile,
        }
    }

    async fn begin_login(&self) -> IdentityResult<LoginInitiation> {
        Err(IdentityError::LoginFlowUnsupported)
    }

    async fn complete_login(&self, _response: &LoginResponse) -> IdentityResult<ExternalIdentity> {
        Err(IdentityError::LoginFlowUnsupported)
    }

    async fn authenticate_direct(
        &self,
        username: &str,
        password: &str,
    ) -> IdentityResult<ExternalIdentity> {
        // An empty password would turn the user bind into an anonymous
        // bind, which many servers accept.
        if password.is_empty() {
            return Err(IdentityError::InvalidDirectoryCredentials);
        }

        let filter = self
            .config
            .user_search_filter
            .replace("{username}", &escape_filter_value(username));

        let mut search_conn = self.driver.connect(&self.config.url).await?;
        if !search_conn
            .simple_bind(&self.config.bind_dn, &self.config.bind_password)
            .await?
        {
            return Err(IdentityError::Transport(
                "directory service-account bind was rejected".into(),
            ));
        }
        let entries = search_conn
            .search(&self.config.base_dn, &filter, &self.requested_attributes())
            .await?;
        let Some(entry) = entries.first() else {
            debug!(
                target: "warden::identity",
                provider = %self.config.id,
                "directory search found no matching user"
            );
            return Err(IdentityError::InvalidDirectoryCredentials);
        };

        // Re-bind as the found DN with the supplied password.
        let mut user_conn = self.driver.connect(&self.config.url).await?;
        if !user_conn.simple_bind(&entry.dn, password).await? {
            return Err(IdentityError::InvalidDirectoryCredentials);
        }

        let mut raw = Metadata::new();
        raw.insert("dn".to_string(), json!(entry.dn));
        for (name, values) in &entry.attributes {
            raw.insert(name.clone(), json!(values));
        }

        Ok(ExternalIdentity {
            external_id: entry.dn.clone(),
            username: entry
                .first_attribute(&self.config.username_attribute)
                .map(String::from),
            email: entry
                .first_attribute(&self.config.email_attribute)
                .map(String::from),
            first_name: entry
                .first_attribute(&self.config.first_name_attribute)
                .map(String::from),
            last_name: entry
                .first_attribute(&self.config.last_name_attribute)
                .map(String::from),
            raw,
        })
    }
}

/// Escape a value for embedding in an LDAP filter (RFC 4515 §3).
fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\5c"),
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}
