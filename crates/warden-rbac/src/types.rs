//! Authorization entity types.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::Metadata;

/// A named permission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub permission_id: Uuid,
    /// Unique name, e.g. `file.read`. Names are the single lookup surface
    /// of the evaluation path.
    pub name: String,
    pub description: String,
    /// Resource type this permission applies to, when scoped
    pub resource_type: Option<String>,
    /// Action verbs covered, e.g. `["read"]`
    pub actions: Vec<String>,
    /// System permissions are seeded at startup and immutable
    pub system: bool,
    pub metadata: Metadata,
}

/// Input for registering a permission.
#[derive(Debug, Clone, Default)]
pub struct PermissionDef {
    pub name: String,
    pub description: String,
    pub resource_type: Option<String>,
    pub actions: Vec<String>,
    pub metadata: Metadata,
}

impl PermissionDef {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn for_resource(mut self, resource_type: impl Into<String>, actions: &[&str]) -> Self {
        self.resource_type = Some(resource_type.into());
        self.actions = actions.iter().map(|a| (*a).to_string()).collect();
        self
    }
}

/// Partial permission update.
#[derive(Debug, Clone, Default)]
pub struct PermissionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub resource_type: Option<String>,
    pub actions: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
}

/// A role: a named set of permissions plus parent roles whose permissions
/// are inherited transitively. The parent graph is kept acyclic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub role_id: Uuid,
    /// Unique name
    pub name: String,
    pub description: String,
    pub permissions: HashSet<Uuid>,
    pub parent_roles: HashSet<Uuid>,
    /// System roles are seeded at startup and immutable
    pub system: bool,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
}

/// Input for registering a role.
#[derive(Debug, Clone, Default)]
pub struct RoleDef {
    pub name: String,
    pub description: String,
    pub permissions: Vec<Uuid>,
    pub parent_roles: Vec<Uuid>,
    pub metadata: Metadata,
}

impl RoleDef {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Vec<Uuid>) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn with_parents(mut self, parents: Vec<Uuid>) -> Self {
        self.parent_roles = parents;
        self
    }
}

/// Partial role update.
#[derive(Debug, Clone, Default)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<Vec<Uuid>>,
    pub parent_roles: Option<Vec<Uuid>>,
    pub metadata: Option<Metadata>,
}

/// Approval state of an assignment created through the approval workflow.
///
/// Assignments created directly carry no approval state and take effect
/// immediately; workflow assignments only count toward effective roles once
/// `Approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

/// A user-role assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    pub assignment_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    /// `None` for direct assignments; the workflow state otherwise
    pub approval: Option<ApprovalState>,
    pub metadata: Metadata,
}

impl UserRoleAssignment {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    /// Whether this assignment currently contributes to effective roles.
    pub fn is_effective(&self) -> bool {
        self.active
            && !self.is_expired()
            && matches!(self.approval, None | Some(ApprovalState::Approved))
    }
}

/// Options for direct role assignment.
#[derive(Debug, Clone, Default)]
pub struct RoleAssignmentOptions {
    pub assigned_by: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
}
