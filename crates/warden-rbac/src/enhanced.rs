//! Enhanced RBAC
//!
//! Wraps the base manager with resource ownership, time-limited delegation,
//! a two-person approval workflow for sensitive role grants, and dynamic
//! per-resource rules. The base manager's uniqueness and cycle checks are
//! never bypassed.
//!
//! Lock order is strictly enhanced -> base: the enhanced lock may be held
//! while consulting the base manager's read APIs, never the reverse.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use warden_core::Metadata;
use warden_events::EventBus;

use crate::error::{RbacError, RbacResult};
use crate::manager::AuthorizationManager;
use crate::rules::{DynamicRule, DynamicRuleDef, RuleContext};
use crate::types::{ApprovalState, RoleAssignmentOptions};

const SOURCE: &str = "rbac";

/// Who owns a resource. Unique per `(resource_type, resource_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceOwnership {
    pub resource_type: String,
    pub resource_id: String,
    pub owner_user_id: Uuid,
    pub registered_at: DateTime<Utc>,
}

/// Scope bounds on a delegation. Unset fields match any value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelegationScope {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
}

impl DelegationScope {
    pub fn resource_type(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            resource_id: None,
        }
    }
}

/// A time- and scope-bounded grant of permissions from one user to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDelegation {
    pub delegation_id: Uuid,
    pub delegator: Uuid,
    pub delegatee: Uuid,
    /// Delegated permission names
    pub permissions: Vec<String>,
    pub scope: DelegationScope,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl PermissionDelegation {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    fn applies_to(&self, resource_type: Option<&str>, resource_id: Option<&str>) -> bool {
        if let (Some(wanted), Some(bound)) = (resource_type, self.scope.resource_type.as_deref())
            && wanted != bound
        {
            return false;
        }
        if let (Some(wanted), Some(bound)) = (resource_id, self.scope.resource_id.as_deref())
            && wanted != bound
        {
            return false;
        }
        true
    }
}

/// One approver's decision on a requested role assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignmentApproval {
    pub approval_id: Uuid,
    pub assignment_id: Uuid,
    pub approver: Uuid,
    pub status: ApprovalState,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Summary of what a user can do on one resource.
#[derive(Debug, Clone)]
pub struct ResourcePermissions {
    pub is_owner: bool,
    /// Permission names held through roles
    pub base: HashSet<String>,
    /// Permission names held through in-scope delegations
    pub delegated: HashSet<String>,
}

#[derive(Default)]
struct EnhancedState {
    ownerships: HashMap<(String, String), ResourceOwnership>,
    owner_index: HashMap<Uuid, HashSet<(String, String)>>,
    delegations: HashMap<Uuid, PermissionDelegation>,
    delegatee_index: HashMap<Uuid, Vec<Uuid>>,
    delegator_index: HashMap<Uuid, Vec<Uuid>>,
    approvals: HashMap<Uuid, RoleAssignmentApproval>,
    assignment_approvals: HashMap<Uuid, Vec<Uuid>>,
    rules: HashMap<Uuid, DynamicRule>,
    permission_rules: HashMap<String, Vec<Uuid>>,
    resource_type_rules: HashMap<String, Vec<Uuid>>,
}

/// Enhanced RBAC manager layered over [`AuthorizationManager`].
pub struct EnhancedRbacManager {
    base: Arc<AuthorizationManager>,
    state: RwLock<EnhancedState>,
    bus: Arc<EventBus>,
}

impl EnhancedRbacManager {
    pub fn new(bus: Arc<EventBus>, base: Arc<AuthorizationManager>) -> Self {
        Self {
            base,
            state: RwLock::new(EnhancedState::default()),
            bus,
        }
    }

    /// The wrapped base manager.
    pub fn base(&self) -> &Arc<AuthorizationManager> {
        &self.base
    }

    // ----- resource ownership -------------------------------------------

    /// Record the owner of a resource. Each resource has at most one owner;
    /// use [`Self::transfer_ownership`] to change it.
    pub async fn register_resource_ownership(
        &self,
        resource_type: &str,
        resource_id: &str,
        owner: Uuid,
    ) -> RbacResult<ResourceOwnership> {
        let ownership = {
            let mut state = self.state.write().await;
            let key = (resource_type.to_string(), resource_id.to_string());
            if state.ownerships.contains_key(&key) {
                return Err(RbacError::DuplicateOwnership {
                    resource_type: resource_type.to_string(),
                    resource_id: resource_id.to_string(),
                });
            }
            let ownership = ResourceOwnership {
                resource_type: resource_type.to_string(),
                resource_id: resource_id.to_string(),
                owner_user_id: owner,
                registered_at: Utc::now(),
            };
            state.ownerships.insert(key.clone(), ownership.clone());
            state.owner_index.entry(owner).or_default().insert(key);
            ownership
        };

        self.bus
            .emit_new(
                "rbac.ownership_registered",
                SOURCE,
                json!({
                    "resource_type": resource_type,
                    "resource_id": resource_id,
                    "owner": owner,
                }),
            )
            .await;
        Ok(ownership)
    }

    pub async fn resource_owner(&self, resource_type: &str, resource_id: &str) -> Option<Uuid> {
        let state = self.state.read().await;
        state
            .ownerships
            .get(&(resource_type.to_string(), resource_id.to_string()))
            .map(|o| o.owner_user_id)
    }

    pub async fn is_resource_owner(
        &self,
        user_id: Uuid,
        resource_type: &str,
        resource_id: &str,
    ) -> bool {
        self.resource_owner(resource_type, resource_id).await == Some(user_id)
    }

    /// Transfer ownership. The requester must be the current owner or hold
    /// `system.admin`.
    pub async fn transfer_ownership(
        &self,
        resource_type: &str,
        resource_id: &str,
        new_owner: Uuid,
        requested_by: Uuid,
    ) -> RbacResult<ResourceOwnership> {
        let key = (resource_type.to_string(), resource_id.to_string());
        let current_owner = {
            let state = self.state.read().await;
            state
                .ownerships
                .get(&key)
                .map(|o| o.owner_user_id)
                .ok_or_else(|| RbacError::UnknownOwnership {
                    resource_type: resource_type.to_string(),
                    resource_id: resource_id.to_string(),
                })?
        };
        if requested_by != current_owner
            && !self.base.has_permission(requested_by, "system.admin").await
        {
            return Err(RbacError::NotResourceOwner);
        }

        let ownership = {
            let mut state = self.state.write().await;
            let ownership = state
                .ownerships
                .get_mut(&key)
                .ok_or_else(|| RbacError::UnknownOwnership {
                    resource_type: resource_type.to_string(),
                    resource_id: resource_id.to_string(),
                })?;
            let previous = ownership.owner_user_id;
            ownership.owner_user_id = new_owner;
            ownership.registered_at = Utc::now();
            let ownership = ownership.clone();
            if let Some(keys) = state.owner_index.get_mut(&previous) {
                keys.remove(&key);
            }
            state
                .owner_index
                .entry(new_owner)
                .or_default()
                .insert(key.clone());
            ownership
        };

        info!(
            target: "warden::rbac",
            resource = %format!("{resource_type}/{resource_id}"),
            new_owner = %new_owner,
            "ownership transferred"
        );
        self.bus
            .emit_new(
                "rbac.ownership_transferred",
                SOURCE,
                json!({
                    "resource_type": resource_type,
                    "resource_id": resource_id,
                    "new_owner": new_owner,
                    "requested_by": requested_by,
                }),
            )
            .await;
        Ok(ownership)
    }

    /// Resources owned by a user.
    pub async fn owned_resources(&self, user_id: Uuid) -> Vec<ResourceOwnership> {
        let state = self.state.read().await;
        state
            .owner_index
            .get(&user_id)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| state.ownerships.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ----- delegation ---------------------------------------------------

    /// Delegate permissions to another user. The delegator must currently
    /// hold every delegated permission through the base manager.
    pub async fn delegate_permission(
        &self,
        delegator: Uuid,
        delegatee: Uuid,
        permissions: Vec<String>,
        scope: DelegationScope,
        expires_in: Option<Duration>,
    ) -> RbacResult<PermissionDelegation> {
        for permission in &permissions {
            if !self.base.has_permission(delegator, permission).await {
                return Err(RbacError::DelegatorLacksPermission(permission.clone()));
            }
        }

        let delegation = PermissionDelegation {
            delegation_id: Uuid::new_v4(),
            delegator,
            delegatee,
            permissions: permissions.clone(),
            scope,
            created_at: Utc::now(),
            expires_at: expires_in.map(|d| Utc::now() + d),
            active: true,
        };
        {
            let mut state = self.state.write().await;
            state
                .delegations
                .insert(delegation.delegation_id, delegation.clone());
            state
                .delegator_index
                .entry(delegator)
                .or_default()
                .push(delegation.delegation_id);
            state
                .delegatee_index
                .entry(delegatee)
                .or_default()
                .push(delegation.delegation_id);
        }

        info!(
            target: "warden::rbac",
            delegation = %delegation.delegation_id,
            delegator = %delegator,
            delegatee = %delegatee,
            "permissions delegated"
        );
        self.bus
            .emit_new(
                "rbac.permission_delegated",
                SOURCE,
                json!({
                    "delegation_id": delegation.delegation_id,
                    "delegator": delegator,
                    "delegatee": delegatee,
                    "permissions": permissions,
                }),
            )
            .await;
        Ok(delegation)
    }

    /// Revoke a delegation in place. Idempotent: returns `true` for an
    /// already-revoked delegation without emitting a second event; `false`
    /// for an unknown id or a non-delegator revoker.
    pub async fn revoke_delegation(&self, delegation_id: Uuid, revoker: Option<Uuid>) -> bool {
        let payload = {
            let mut state = self.state.write().await;
            let Some(delegation) = state.delegations.get_mut(&delegation_id) else {
                return false;
            };
            if revoker.is_some_and(|r| r != delegation.delegator) {
                return false;
            }
            if !delegation.active {
                None
            } else {
                delegation.active = false;
                Some(json!({
                    "delegation_id": delegation_id,
                    "delegator": delegation.delegator,
                    "delegatee": delegation.delegatee,
                }))
            }
        };
        if let Some(payload) = payload {
            self.bus
                .emit_new("rbac.delegation_revoked", SOURCE, payload)
                .await;
        }
        true
    }

    pub async fn get_delegation(&self, delegation_id: Uuid) -> Option<PermissionDelegation> {
        self.state.read().await.delegations.get(&delegation_id).cloned()
    }

    /// Union of the user's active, unexpired, in-scope delegated permission
    /// names.
    pub async fn delegated_permissions(
        &self,
        user_id: Uuid,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
    ) -> HashSet<String> {
        let state = self.state.read().await;
        let mut names = HashSet::new();
        let Some(ids) = state.delegatee_index.get(&user_id) else {
            return names;
        };
        for delegation_id in ids {
            let Some(delegation) = state.delegations.get(delegation_id) else {
                continue;
            };
            if !delegation.active || delegation.is_expired() {
                continue;
            }
            if !delegation.applies_to(resource_type, resource_id) {
                continue;
            }
            names.extend(delegation.permissions.iter().cloned());
        }
        names
    }

    // ----- approval workflow --------------------------------------------

    /// Request a role assignment gated behind approvers. The assignment is
    /// created pending and does not take effect until every approver
    /// approves.
    pub async fn request_role_assignment(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        requested_by: Uuid,
        approvers: Vec<Uuid>,
        justification: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> RbacResult<(Uuid, Vec<Uuid>)> {
        if approvers.is_empty() {
            return Err(RbacError::NoApprovers);
        }

        let mut metadata = Metadata::new();
        if let Some(justification) = &justification {
            metadata.insert("justification".to_string(), json!(justification));
        }
        let assignment = self
            .base
            .assign_role_pending(
                user_id,
                role_id,
                RoleAssignmentOptions {
                    assigned_by: Some(requested_by),
                    expires_at,
                    metadata,
                },
            )
            .await?;

        let approval_ids = {
            let mut state = self.state.write().await;
            let mut ids = Vec::with_capacity(approvers.len());
            for approver in &approvers {
                let approval = RoleAssignmentApproval {
                    approval_id: Uuid::new_v4(),
                    assignment_id: assignment.assignment_id,
                    approver: *approver,
                    status: ApprovalState::Pending,
                    comments: None,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                };
                ids.push(approval.approval_id);
                state.approvals.insert(approval.approval_id, approval);
            }
            state
                .assignment_approvals
                .insert(assignment.assignment_id, ids.clone());
            ids
        };

        self.bus
            .emit_new(
                "rbac.assignment_requested",
                SOURCE,
                json!({
                    "assignment_id": assignment.assignment_id,
                    "user_id": user_id,
                    "role_id": role_id,
                    "requested_by": requested_by,
                    "approvers": approvers,
                    "justification": justification,
                }),
            )
            .await;
        Ok((assignment.assignment_id, approval_ids))
    }

    /// Approve one approval. When every approval for the assignment is
    /// approved the assignment takes effect. Returns `false` for unknown
    /// ids, approver mismatch, or an already-processed approval.
    pub async fn approve_role_assignment(
        &self,
        approval_id: Uuid,
        approver: Uuid,
        comments: Option<String>,
    ) -> RbacResult<bool> {
        let (assignment_id, all_approved) = {
            let mut state = self.state.write().await;
            let Some(approval) = state.approvals.get_mut(&approval_id) else {
                return Ok(false);
            };
            if approval.approver != approver || approval.status != ApprovalState::Pending {
                return Ok(false);
            }
            approval.status = ApprovalState::Approved;
            approval.comments = comments;
            approval.updated_at = Utc::now();
            let assignment_id = approval.assignment_id;

            let all_approved = state
                .assignment_approvals
                .get(&assignment_id)
                .is_some_and(|ids| {
                    ids.iter().all(|id| {
                        state
                            .approvals
                            .get(id)
                            .is_some_and(|a| a.status == ApprovalState::Approved)
                    })
                });
            (assignment_id, all_approved)
        };

        let assignment_status = if all_approved {
            self.base
                .set_assignment_approval(assignment_id, ApprovalState::Approved)
                .await?;
            debug!(
                target: "warden::rbac",
                assignment = %assignment_id,
                "assignment fully approved"
            );
            ApprovalState::Approved
        } else {
            ApprovalState::Pending
        };

        self.bus
            .emit_new(
                "rbac.approval_updated",
                SOURCE,
                json!({
                    "approval_id": approval_id,
                    "assignment_id": assignment_id,
                    "status": "approved",
                    "assignment_status": assignment_status,
                }),
            )
            .await;
        Ok(true)
    }

    /// Reject one approval; any rejection rejects the whole assignment.
    pub async fn reject_role_assignment(
        &self,
        approval_id: Uuid,
        approver: Uuid,
        comments: Option<String>,
    ) -> RbacResult<bool> {
        let assignment_id = {
            let mut state = self.state.write().await;
            let Some(approval) = state.approvals.get_mut(&approval_id) else {
                return Ok(false);
            };
            if approval.approver != approver || approval.status != ApprovalState::Pending {
                return Ok(false);
            }
            approval.status = ApprovalState::Rejected;
            approval.comments = comments;
            approval.updated_at = Utc::now();
            approval.assignment_id
        };

        self.base
            .set_assignment_approval(assignment_id, ApprovalState::Rejected)
            .await?;

        self.bus
            .emit_new(
                "rbac.approval_updated",
                SOURCE,
                json!({
                    "approval_id": approval_id,
                    "assignment_id": assignment_id,
                    "status": "rejected",
                    "assignment_status": ApprovalState::Rejected,
                }),
            )
            .await;
        Ok(true)
    }

    pub async fn get_approval(&self, approval_id: Uuid) -> Option<RoleAssignmentApproval> {
        self.state.read().await.approvals.get(&approval_id).cloned()
    }

    pub async fn assignment_approvals(&self, assignment_id: Uuid) -> Vec<RoleAssignmentApproval> {
        let state = self.state.read().await;
        state
            .assignment_approvals
            .get(&assignment_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.approvals.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ----- dynamic rules ------------------------------------------------

    /// Register a dynamic rule gating a known permission.
    pub async fn register_dynamic_rule(&self, def: DynamicRuleDef) -> RbacResult<DynamicRule> {
        if self.base.get_permission_by_name(&def.permission).await.is_none() {
            return Err(RbacError::UnknownPermission(def.permission));
        }

        let rule = DynamicRule {
            rule_id: Uuid::new_v4(),
            name: def.name,
            description: def.description,
            permission: def.permission,
            resource_type: def.resource_type,
            condition: def.condition,
            priority: def.priority,
            active: true,
            created_at: Utc::now(),
        };
        {
            let mut state = self.state.write().await;
            state
                .permission_rules
                .entry(rule.permission.clone())
                .or_default()
                .push(rule.rule_id);
            state
                .resource_type_rules
                .entry(rule.resource_type.clone())
                .or_default()
                .push(rule.rule_id);
            state.rules.insert(rule.rule_id, rule.clone());
        }

        self.bus
            .emit_new(
                "rbac.rule_registered",
                SOURCE,
                json!({
                    "rule_id": rule.rule_id,
                    "name": rule.name,
                    "permission": rule.permission,
                    "resource_type": rule.resource_type,
                }),
            )
            .await;
        Ok(rule)
    }

    /// Remove a dynamic rule. Returns `false` for an unknown id.
    pub async fn remove_dynamic_rule(&self, rule_id: Uuid) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            let Some(rule) = state.rules.remove(&rule_id) else {
                return false;
            };
            if let Some(ids) = state.permission_rules.get_mut(&rule.permission) {
                ids.retain(|id| *id != rule_id);
            }
            if let Some(ids) = state.resource_type_rules.get_mut(&rule.resource_type) {
                ids.retain(|id| *id != rule_id);
            }
            rule
        };

        self.bus
            .emit_new(
                "rbac.rule_removed",
                SOURCE,
                json!({"rule_id": rule_id, "name": removed.name}),
            )
            .await;
        true
    }

    // ----- evaluation ---------------------------------------------------

    /// Point-in-time permission decision:
    ///
    /// 1. The resource owner is always allowed.
    /// 2. Without a base or delegated grant, deny.
    /// 3. With a grant and no applicable dynamic rule, allow.
    /// 4. With applicable rules, allow iff at least one matches
    ///    (evaluated by descending priority).
    pub async fn evaluate_permission(
        &self,
        user_id: Uuid,
        permission: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        attributes: Metadata,
    ) -> bool {
        if let Some(resource_id) = resource_id
            && self.is_resource_owner(user_id, resource_type, resource_id).await
        {
            return true;
        }

        let has_base = self.base.has_permission(user_id, permission).await;
        let has_delegated = self
            .delegated_permissions(user_id, Some(resource_type), resource_id)
            .await
            .contains(permission);
        if !has_base && !has_delegated {
            return false;
        }

        let mut applicable = self.applicable_rules(permission, resource_type).await;
        if applicable.is_empty() {
            return true;
        }
        applicable.sort_by(|a, b| b.priority.cmp(&a.priority));

        let ctx = RuleContext {
            user_id,
            permission: permission.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(String::from),
            now: Utc::now(),
            attributes,
        };
        applicable.iter().any(|rule| rule.condition.evaluate(&ctx))
    }

    /// Throw-on-deny variant of [`Self::evaluate_permission`].
    pub async fn check_permission(
        &self,
        user_id: Uuid,
        permission: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        attributes: Metadata,
    ) -> RbacResult<()> {
        if self
            .evaluate_permission(user_id, permission, resource_type, resource_id, attributes)
            .await
        {
            Ok(())
        } else {
            Err(RbacError::PermissionDenied {
                user_id,
                permission: permission.to_string(),
            })
        }
    }

    /// Everything a user can do on one resource.
    pub async fn user_permissions_for_resource(
        &self,
        user_id: Uuid,
        resource_type: &str,
        resource_id: &str,
    ) -> ResourcePermissions {
        ResourcePermissions {
            is_owner: self.is_resource_owner(user_id, resource_type, resource_id).await,
            base: self.base.effective_permissions(user_id).await,
            delegated: self
                .delegated_permissions(user_id, Some(resource_type), Some(resource_id))
                .await,
        }
    }

    /// Active rules indexed under the permission or the resource type,
    /// deduplicated, each matching both dimensions.
    async fn applicable_rules(&self, permission: &str, resource_type: &str) -> Vec<DynamicRule> {
        let state = self.state.read().await;
        let mut seen = HashSet::new();
        let mut applicable = Vec::new();

        let candidates = state
            .permission_rules
            .get(permission)
            .into_iter()
            .flatten()
            .chain(state.resource_type_rules.get(resource_type).into_iter().flatten());
        for rule_id in candidates {
            if !seen.insert(*rule_id) {
                continue;
            }
            if let Some(rule) = state.rules.get(rule_id)
                && rule.active
                && rule.permission == permission
                && rule.resource_type == resource_type
            {
                applicable.push(rule.clone());
            }
        }
        applicable
    }
}
