//! The audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::Metadata;

/// Who performed an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    System,
    Plugin,
    Admin,
}

/// How the audited action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Error,
    Warning,
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    /// Verb, e.g. `user.login` or `role.assigned`
    pub action: String,
    pub actor_id: Option<String>,
    pub actor_type: ActorType,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub result: AuditResult,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub metadata: Metadata,
}

/// Input for recording an audit entry.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: String,
    pub actor_id: Option<String>,
    pub actor_type: ActorType,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub result: AuditResult,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub metadata: Metadata,
}

impl AuditEntry {
    pub fn new(
        action: impl Into<String>,
        actor_type: ActorType,
        resource_type: impl Into<String>,
        result: AuditResult,
    ) -> Self {
        Self {
            action: action.into(),
            actor_id: None,
            actor_type,
            resource_type: resource_type.into(),
            resource_id: None,
            result,
            description: String::new(),
            ip_address: None,
            user_agent: None,
            session_id: None,
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn by(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    #[must_use]
    pub fn on(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn from_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }
}

/// Filter for querying the audit log. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub actor_id: Option<String>,
    pub actor_type: Option<ActorType>,
    pub resource_type: Option<String>,
    pub result: Option<AuditResult>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub(crate) fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(action) = &self.action
            && record.action != *action
        {
            return false;
        }
        if let Some(actor_id) = &self.actor_id
            && record.actor_id.as_deref() != Some(actor_id.as_str())
        {
            return false;
        }
        if let Some(actor_type) = self.actor_type
            && record.actor_type != actor_type
        {
            return false;
        }
        if let Some(resource_type) = &self.resource_type
            && record.resource_type != *resource_type
        {
            return false;
        }
        if let Some(result) = self.result
            && record.result != result
        {
            return false;
        }
        if let Some(since) = self.since
            && record.timestamp < since
        {
            return false;
        }
        if let Some(until) = self.until
            && record.timestamp > until
        {
            return false;
        }
        true
    }
}
