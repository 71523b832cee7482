//! Authorization error types.

use thiserror::Error;
use uuid::Uuid;

/// Result type for authorization operations.
pub type RbacResult<T> = Result<T, RbacError>;

/// Errors produced by the authorization managers.
///
/// Note that an ordinary "no" from a permission check is a boolean result,
/// not an error; [`RbacError::PermissionDenied`] only appears through the
/// raising `check_permission` variants.
#[derive(Error, Debug, Clone)]
pub enum RbacError {
    #[error("Permission '{0}' already exists")]
    DuplicatePermission(String),

    #[error("Role '{0}' already exists")]
    DuplicateRole(String),

    #[error("Unknown permission: {0}")]
    UnknownPermission(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown assignment: {0}")]
    UnknownAssignment(Uuid),

    #[error("System object '{0}' cannot be modified")]
    SystemObjectImmutable(String),

    #[error("Update would create a cycle in the role hierarchy at '{0}'")]
    CircularHierarchy(String),

    #[error("Permission '{0}' is referenced by one or more roles")]
    PermissionInUse(String),

    #[error("Role '{0}' is referenced as a parent by one or more roles")]
    RoleInUse(String),

    #[error("Permission denied: user {user_id} lacks '{permission}'")]
    PermissionDenied { user_id: Uuid, permission: String },

    #[error("Delegator does not have permission: {0}")]
    DelegatorLacksPermission(String),

    #[error("Resource '{resource_type}/{resource_id}' already has an owner")]
    DuplicateOwnership {
        resource_type: String,
        resource_id: String,
    },

    #[error("No ownership record for '{resource_type}/{resource_id}'")]
    UnknownOwnership {
        resource_type: String,
        resource_id: String,
    },

    #[error("Only the resource owner may transfer ownership")]
    NotResourceOwner,

    #[error("A role assignment request needs at least one approver")]
    NoApprovers,
}

impl RbacError {
    /// Error category for metrics and logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DuplicatePermission(_) => "duplicate_permission",
            Self::DuplicateRole(_) => "duplicate_role",
            Self::UnknownPermission(_) => "unknown_permission",
            Self::UnknownRole(_) => "unknown_role",
            Self::UnknownAssignment(_) => "unknown_assignment",
            Self::SystemObjectImmutable(_) => "system_object_immutable",
            Self::CircularHierarchy(_) => "circular_hierarchy",
            Self::PermissionInUse(_) => "permission_in_use",
            Self::RoleInUse(_) => "role_in_use",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::DelegatorLacksPermission(_) => "delegator_lacks_permission",
            Self::DuplicateOwnership { .. } => "duplicate_ownership",
            Self::UnknownOwnership { .. } => "unknown_ownership",
            Self::NotResourceOwner => "not_resource_owner",
            Self::NoApprovers => "no_approvers",
        }
    }

    /// Cycles and index inconsistencies are invariant violations worth a
    /// critical security event.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::CircularHierarchy(_))
    }
}
