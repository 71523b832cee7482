//! # Warden RBAC - Authorization
//!
//! Role-based authorization for the Warden control plane, in two layers:
//!
//! - [`AuthorizationManager`] - permissions, roles with inheritance, and
//!   user-role assignments (base RBAC). System objects are seeded at
//!   startup and immutable.
//! - [`EnhancedRbacManager`] - resource ownership, time-limited
//!   delegation, two-person approval for sensitive role grants, and typed
//!   dynamic rules layered on top of the base manager.
//!
//! Permission *names* are the single lookup surface of the evaluation
//! path: delegations, dynamic rules, and `has_permission` all speak names;
//! permission ids exist only as stable entity identity.

pub mod enhanced;
pub mod error;
pub mod manager;
pub mod rules;
pub mod types;

#[doc(inline)]
pub use enhanced::{
    DelegationScope, EnhancedRbacManager, PermissionDelegation, ResourceOwnership,
    ResourcePermissions, RoleAssignmentApproval,
};
#[doc(inline)]
pub use error::{RbacError, RbacResult};
#[doc(inline)]
pub use manager::AuthorizationManager;
#[doc(inline)]
pub use rules::{DynamicRule, DynamicRuleDef, RuleCondition, RuleContext};
#[doc(inline)]
pub use types::{
    ApprovalState, Permission, PermissionDef, PermissionUpdate, Role, RoleAssignmentOptions,
    RoleDef, RoleUpdate, UserRoleAssignment,
};
