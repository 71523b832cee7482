//! Session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::Metadata;

/// An authenticated session.
///
/// A session is usable iff it is active, unexpired, and its user is active;
/// [`crate::AuthenticationManager::validate_session`] enforces all three.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub active: bool,
    pub metadata: Metadata,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Options for [`crate::AuthenticationManager::create_session`].
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Overrides the configured default lifetime when set
    pub lifetime: Option<chrono::Duration>,
    pub metadata: Metadata,
}
