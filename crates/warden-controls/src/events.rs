//! The security event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::Metadata;

/// Severity of a logged security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// An append-only security event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub severity: Severity,
    /// Component that observed the event
    pub source: String,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub resource: Option<String>,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Metadata,
}

/// Input for recording a security event.
#[derive(Debug, Clone)]
pub struct SecurityEventRecord {
    pub event_type: String,
    pub severity: Severity,
    pub source: String,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub resource: Option<String>,
    pub description: String,
    pub metadata: Metadata,
}

impl SecurityEventRecord {
    pub fn new(
        event_type: impl Into<String>,
        severity: Severity,
        source: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            severity,
            source: source.into(),
            user_id: None,
            ip_address: None,
            resource: None,
            description: description.into(),
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn from_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    #[must_use]
    pub fn on_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// Filter for querying the event log. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SecurityEventFilter {
    pub event_type: Option<String>,
    pub severity: Option<Severity>,
    pub user_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SecurityEventFilter {
    pub(crate) fn matches(&self, event: &SecurityEvent) -> bool {
        if let Some(event_type) = &self.event_type
            && event.event_type != *event_type
        {
            return false;
        }
        if let Some(severity) = self.severity
            && event.severity != severity
        {
            return false;
        }
        if let Some(user_id) = self.user_id
            && event.user_id != Some(user_id)
        {
            return false;
        }
        if let Some(since) = self.since
            && event.timestamp < since
        {
            return false;
        }
        if let Some(until) = self.until
            && event.timestamp > until
        {
            return false;
        }
        true
    }
}
