//! User records and change sets.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::Metadata;

/// A local user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Stable, immutable id
    pub user_id: Uuid,
    /// Unique username (uniqueness is case-insensitive)
    pub username: String,
    /// Unique email address (uniqueness is case-insensitive)
    pub email: String,
    /// Encoded password hash (PHC or bcrypt format)
    pub password_hash: String,
    /// Given name
    pub first_name: Option<String>,
    /// Family name
    pub last_name: Option<String>,
    /// Whether the account may authenticate
    pub active: bool,
    /// Whether the email address has been verified
    pub verified: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last successful login
    pub last_login: Option<DateTime<Utc>>,
    /// Whether at least one MFA method is enabled
    pub mfa_enabled: bool,
    /// Enabled MFA provider ids
    pub mfa_methods: BTreeSet<String>,
    /// Additional metadata
    pub metadata: Metadata,
}

impl User {
    /// Display label used in logs: username plus short id.
    pub fn label(&self) -> String {
        format!("{} ({})", self.username, self.user_id)
    }
}

/// Input for [`crate::AuthenticationManager::register_user`].
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub metadata: Metadata,
}

impl NewUser {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            first_name: None,
            last_name: None,
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Partial update for [`crate::AuthenticationManager::update_user`].
///
/// `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub active: Option<bool>,
    pub verified: Option<bool>,
    pub metadata: Option<Metadata>,
}

impl UserUpdate {
    /// Names of the fields this update touches, for event payloads.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.username.is_some() {
            fields.push("username");
        }
        if self.email.is_some() {
            fields.push("email");
        }
        if self.first_name.is_some() {
            fields.push("first_name");
        }
        if self.last_name.is_some() {
            fields.push("last_name");
        }
        if self.active.is_some() {
            fields.push("active");
        }
        if self.verified.is_some() {
            fields.push("verified");
        }
        if self.metadata.is_some() {
            fields.push("metadata");
        }
        fields
    }
}
