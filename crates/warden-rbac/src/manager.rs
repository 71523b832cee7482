//! Authorization Manager (base RBAC)
//!
//! Permissions, roles with inheritance, and user-role assignments. System
//! objects are seeded at construction and cannot be modified or deleted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use warden_events::EventBus;

use crate::error::{RbacError, RbacResult};
use crate::types::{
    ApprovalState, Permission, PermissionDef, PermissionUpdate, Role, RoleAssignmentOptions,
    RoleDef, RoleUpdate, UserRoleAssignment,
};

const SOURCE: &str = "rbac";

#[derive(Default)]
struct RbacState {
    permissions: HashMap<Uuid, Permission>,
    permission_names: HashMap<String, Uuid>,
    roles: HashMap<Uuid, Role>,
    role_names: HashMap<String, Uuid>,
    assignments: HashMap<Uuid, UserRoleAssignment>,
    user_assignments: HashMap<Uuid, Vec<Uuid>>,
}

/// Base RBAC manager.
pub struct AuthorizationManager {
    state: RwLock<RbacState>,
    bus: Arc<EventBus>,
}

impl AuthorizationManager {
    /// Create a manager with the system permissions and roles seeded.
    pub fn new(bus: Arc<EventBus>) -> Self {
        let mut state = RbacState::default();
        Self::seed_system_objects(&mut state);
        Self {
            state: RwLock::new(state),
            bus,
        }
    }

    /// Register a new permission with a unique name.
    pub async fn register_permission(&self, def: PermissionDef) -> RbacResult<Permission> {
        let permission = {
            let mut state = self.state.write().await;
            if state.permission_names.contains_key(&def.name) {
                return Err(RbacError::DuplicatePermission(def.name));
            }
            let permission = Permission {
                permission_id: Uuid::new_v4(),
                name: def.name,
                description: def.description,
                resource_type: def.resource_type,
                actions: def.actions,
                system: false,
                metadata: def.metadata,
            };
            state
                .permission_names
                .insert(permission.name.clone(), permission.permission_id);
            state
                .permissions
                .insert(permission.permission_id, permission.clone());
            permission
        };

        debug!(target: "warden::rbac", permission = %permission.name, "permission registered");
        self.bus
            .emit_new(
                "permission.created",
                SOURCE,
                json!({"permission_id": permission.permission_id, "name": permission.name}),
            )
            .await;
        Ok(permission)
    }

    /// Update a non-system permission.
    pub async fn update_permission(
        &self,
        permission_id: Uuid,
        update: PermissionUpdate,
    ) -> RbacResult<Permission> {
        let permission = {
            let mut state = self.state.write().await;
            let current = state
                .permissions
                .get(&permission_id)
                .ok_or_else(|| RbacError::UnknownPermission(permission_id.to_string()))?;
            if current.system {
                return Err(RbacError::SystemObjectImmutable(current.name.clone()));
            }
            if let Some(name) = &update.name {
                if state
                    .permission_names
                    .get(name)
                    .is_some_and(|id| *id != permission_id)
                {
                    return Err(RbacError::DuplicatePermission(name.clone()));
                }
                let old_name = current.name.clone();
                state.permission_names.remove(&old_name);
                state.permission_names.insert(name.clone(), permission_id);
            }
            let permission = state
                .permissions
                .get_mut(&permission_id)
                .ok_or_else(|| RbacError::UnknownPermission(permission_id.to_string()))?;
            if let Some(name) = update.name {
                permission.name = name;
            }
            if let Some(description) = update.description {
                permission.description = description;
            }
            if let Some(resource_type) = update.resource_type {
                permission.resource_type = Some(resource_type);
            }
            if let Some(actions) = update.actions {
                permission.actions = actions;
            }
            if let Some(metadata) = update.metadata {
                permission.metadata = metadata;
            }
            permission.clone()
        };

        self.bus
            .emit_new(
                "permission.updated",
                SOURCE,
                json!({"permission_id": permission_id, "name": permission.name}),
            )
            .await;
        Ok(permission)
    }

    /// Delete a non-system permission that no role references.
    pub async fn delete_permission(&self, permission_id: Uuid) -> RbacResult<()> {
        let name = {
            let mut state = self.state.write().await;
            let permission = state
                .permissions
                .get(&permission_id)
                .ok_or_else(|| RbacError::UnknownPermission(permission_id.to_string()))?;
            if permission.system {
                return Err(RbacError::SystemObjectImmutable(permission.name.clone()));
            }
            if state
                .roles
                .values()
                .any(|role| role.permissions.contains(&permission_id))
            {
                return Err(RbacError::PermissionInUse(permission.name.clone()));
            }
            let name = permission.name.clone();
            state.permission_names.remove(&name);
            state.permissions.remove(&permission_id);
            name
        };

        self.bus
            .emit_new(
                "permission.deleted",
                SOURCE,
                json!({"permission_id": permission_id, "name": name}),
            )
            .await;
        Ok(())
    }

    /// Register a new role; all referenced permissions and parents must
    /// exist.
    pub async fn register_role(&self, def: RoleDef) -> RbacResult<Role> {
        let role = {
            let mut state = self.state.write().await;
            if state.role_names.contains_key(&def.name) {
                return Err(RbacError::DuplicateRole(def.name));
            }
            for permission_id in &def.permissions {
                if !state.permissions.contains_key(permission_id) {
                    return Err(RbacError::UnknownPermission(permission_id.to_string()));
                }
            }
            for parent_id in &def.parent_roles {
                if !state.roles.contains_key(parent_id) {
                    return Err(RbacError::UnknownRole(parent_id.to_string()));
                }
            }
            let role = Role {
                role_id: Uuid::new_v4(),
                name: def.name,
                description: def.description,
                permissions: def.permissions.into_iter().collect(),
                parent_roles: def.parent_roles.into_iter().collect(),
                system: false,
                created_at: Utc::now(),
                metadata: def.metadata,
            };
            state.role_names.insert(role.name.clone(), role.role_id);
            state.roles.insert(role.role_id, role.clone());
            role
        };

        debug!(target: "warden::rbac", role = %role.name, "role registered");
        self.bus
            .emit_new(
                "role.created",
                SOURCE,
                json!({"role_id": role.role_id, "name": role.name}),
            )
            .await;
        Ok(role)
    }

    /// Update a non-system role. A parent change that would introduce a
    /// cycle is rejected.
    pub async fn update_role(&self, role_id: Uuid, update: RoleUpdate) -> RbacResult<Role> {
        let role = {
            let mut state = self.state.write().await;
            let current = state
                .roles
                .get(&role_id)
                .ok_or_else(|| RbacError::UnknownRole(role_id.to_string()))?;
            if current.system {
                return Err(RbacError::SystemObjectImmutable(current.name.clone()));
            }
            let current_name = current.name.clone();

            if let Some(permissions) = &update.permissions {
                for permission_id in permissions {
                    if !state.permissions.contains_key(permission_id) {
                        return Err(RbacError::UnknownPermission(permission_id.to_string()));
                    }
                }
            }
            if let Some(parents) = &update.parent_roles {
                for parent_id in parents {
                    if !state.roles.contains_key(parent_id) {
                        return Err(RbacError::UnknownRole(parent_id.to_string()));
                    }
                    if Self::reaches(&state, *parent_id, role_id) {
                        return Err(RbacError::CircularHierarchy(current_name.clone()));
                    }
                }
            }
            if let Some(name) = &update.name {
                if state.role_names.get(name).is_some_and(|id| *id != role_id) {
                    return Err(RbacError::DuplicateRole(name.clone()));
                }
                state.role_names.remove(&current_name);
                state.role_names.insert(name.clone(), role_id);
            }

            let role = state
                .roles
                .get_mut(&role_id)
                .ok_or_else(|| RbacError::UnknownRole(role_id.to_string()))?;
            if let Some(name) = update.name {
                role.name = name;
            }
            if let Some(description) = update.description {
                role.description = description;
            }
            if let Some(permissions) = update.permissions {
                role.permissions = permissions.into_iter().collect();
            }
            if let Some(parents) = update.parent_roles {
                role.parent_roles = parents.into_iter().collect();
            }
            if let Some(metadata) = update.metadata {
                role.metadata = metadata;
            }
            role.clone()
        };

        self.bus
            .emit_new(
                "role.updated",
                SOURCE,
                json!({"role_id": role_id, "name": role.name}),
            )
            .await;
        Ok(role)
    }

    /// Delete a non-system role that no other role lists as a parent. Its
    /// assignments are deactivated, preserving the audit trail.
    pub async fn delete_role(&self, role_id: Uuid) -> RbacResult<()> {
        let name = {
            let mut state = self.state.write().await;
            let role = state
                .roles
                .get(&role_id)
                .ok_or_else(|| RbacError::UnknownRole(role_id.to_string()))?;
            if role.system {
                return Err(RbacError::SystemObjectImmutable(role.name.clone()));
            }
            if state
                .roles
                .values()
                .any(|r| r.role_id != role_id && r.parent_roles.contains(&role_id))
            {
                return Err(RbacError::RoleInUse(role.name.clone()));
            }
            let name = role.name.clone();
            state.role_names.remove(&name);
            state.roles.remove(&role_id);
            for assignment in state.assignments.values_mut() {
                if assignment.role_id == role_id {
                    assignment.active = false;
                }
            }
            name
        };

        self.bus
            .emit_new(
                "role.deleted",
                SOURCE,
                json!({"role_id": role_id, "name": name}),
            )
            .await;
        Ok(())
    }

    /// Assign a role to a user.
    pub async fn assign_role_to_user(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        options: RoleAssignmentOptions,
    ) -> RbacResult<UserRoleAssignment> {
        let assignment = {
            let mut state = self.state.write().await;
            Self::insert_assignment(&mut state, user_id, role_id, options, None)?
        };

        info!(
            target: "warden::rbac",
            user_id = %user_id,
            role_id = %role_id,
            "role assigned"
        );
        self.bus
            .emit_new(
                "role.assigned",
                SOURCE,
                json!({
                    "assignment_id": assignment.assignment_id,
                    "user_id": user_id,
                    "role_id": role_id,
                }),
            )
            .await;
        Ok(assignment)
    }

    /// Insert a pending assignment for the approval workflow. Emits no
    /// event; the enhanced manager announces the request as a whole.
    pub(crate) async fn assign_role_pending(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        options: RoleAssignmentOptions,
    ) -> RbacResult<UserRoleAssignment> {
        let mut state = self.state.write().await;
        Self::insert_assignment(&mut state, user_id, role_id, options, Some(ApprovalState::Pending))
    }

    /// Flip the approval state of a workflow assignment.
    pub(crate) async fn set_assignment_approval(
        &self,
        assignment_id: Uuid,
        approval: ApprovalState,
    ) -> RbacResult<UserRoleAssignment> {
        let mut state = self.state.write().await;
        let assignment = state
            .assignments
            .get_mut(&assignment_id)
            .ok_or(RbacError::UnknownAssignment(assignment_id))?;
        assignment.approval = Some(approval);
        Ok(assignment.clone())
    }

    /// Deactivate all active assignments of a role for a user. Returns how
    /// many were deactivated; idempotent.
    pub async fn revoke_role_from_user(&self, user_id: Uuid, role_id: Uuid) -> usize {
        let revoked = {
            let mut state = self.state.write().await;
            let assignment_ids: Vec<Uuid> = state
                .user_assignments
                .get(&user_id)
                .map(|ids| ids.clone())
                .unwrap_or_default();
            let mut revoked = 0;
            for assignment_id in assignment_ids {
                if let Some(assignment) = state.assignments.get_mut(&assignment_id)
                    && assignment.role_id == role_id
                    && assignment.active
                {
                    assignment.active = false;
                    revoked += 1;
                }
            }
            revoked
        };

        if revoked > 0 {
            self.bus
                .emit_new(
                    "role.revoked",
                    SOURCE,
                    json!({"user_id": user_id, "role_id": role_id, "revoked": revoked}),
                )
                .await;
        }
        revoked
    }

    /// Roles currently effective for a user.
    pub async fn effective_roles(&self, user_id: Uuid) -> Vec<Role> {
        let state = self.state.read().await;
        Self::effective_role_ids(&state, user_id)
            .into_iter()
            .filter_map(|role_id| state.roles.get(&role_id).cloned())
            .collect()
    }

    /// Permission names granted through the user's effective roles,
    /// including inherited parent-role permissions.
    pub async fn effective_permissions(&self, user_id: Uuid) -> HashSet<String> {
        let state = self.state.read().await;
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut queue: Vec<Uuid> = Self::effective_role_ids(&state, user_id);
        let mut names = HashSet::new();

        while let Some(role_id) = queue.pop() {
            if !visited.insert(role_id) {
                continue;
            }
            let Some(role) = state.roles.get(&role_id) else {
                continue;
            };
            for permission_id in &role.permissions {
                if let Some(permission) = state.permissions.get(permission_id) {
                    names.insert(permission.name.clone());
                }
            }
            queue.extend(role.parent_roles.iter().copied());
        }
        names
    }

    /// Whether the user holds the named permission through a role.
    pub async fn has_permission(&self, user_id: Uuid, permission_name: &str) -> bool {
        self.effective_permissions(user_id)
            .await
            .contains(permission_name)
    }

    /// Whether the user holds the named role.
    pub async fn has_role(&self, user_id: Uuid, role_name: &str) -> bool {
        self.effective_roles(user_id)
            .await
            .iter()
            .any(|role| role.name == role_name)
    }

    /// Throw-on-deny variant of [`Self::has_permission`].
    pub async fn check_permission(&self, user_id: Uuid, permission_name: &str) -> RbacResult<()> {
        if self.has_permission(user_id, permission_name).await {
            Ok(())
        } else {
            Err(RbacError::PermissionDenied {
                user_id,
                permission: permission_name.to_string(),
            })
        }
    }

    pub async fn get_permission_by_id(&self, permission_id: Uuid) -> Option<Permission> {
        self.state.read().await.permissions.get(&permission_id).cloned()
    }

    pub async fn get_permission_by_name(&self, name: &str) -> Option<Permission> {
        let state = self.state.read().await;
        let id = state.permission_names.get(name)?;
        state.permissions.get(id).cloned()
    }

    pub async fn get_role_by_id(&self, role_id: Uuid) -> Option<Role> {
        self.state.read().await.roles.get(&role_id).cloned()
    }

    pub async fn get_role_by_name(&self, name: &str) -> Option<Role> {
        let state = self.state.read().await;
        let id = state.role_names.get(name)?;
        state.roles.get(id).cloned()
    }

    pub async fn list_permissions(&self) -> Vec<Permission> {
        self.state.read().await.permissions.values().cloned().collect()
    }

    pub async fn list_roles(&self) -> Vec<Role> {
        self.state.read().await.roles.values().cloned().collect()
    }

    pub async fn get_assignment(&self, assignment_id: Uuid) -> Option<UserRoleAssignment> {
        self.state.read().await.assignments.get(&assignment_id).cloned()
    }

    pub async fn get_user_assignments(&self, user_id: Uuid) -> Vec<UserRoleAssignment> {
        let state = self.state.read().await;
        state
            .user_assignments
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.assignments.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn insert_assignment(
        state: &mut RbacState,
        user_id: Uuid,
        role_id: Uuid,
        options: RoleAssignmentOptions,
        approval: Option<ApprovalState>,
    ) -> RbacResult<UserRoleAssignment> {
        if !state.roles.contains_key(&role_id) {
            return Err(RbacError::UnknownRole(role_id.to_string()));
        }
        let assignment = UserRoleAssignment {
            assignment_id: Uuid::new_v4(),
            user_id,
            role_id,
            assigned_by: options.assigned_by,
            assigned_at: Utc::now(),
            expires_at: options.expires_at,
            active: true,
            approval,
            metadata: options.metadata,
        };
        state
            .assignments
            .insert(assignment.assignment_id, assignment.clone());
        state
            .user_assignments
            .entry(user_id)
            .or_default()
            .push(assignment.assignment_id);
        Ok(assignment)
    }

    fn effective_role_ids(state: &RbacState, user_id: Uuid) -> Vec<Uuid> {
        state
            .user_assignments
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.assignments.get(id))
                    .filter(|a| a.is_effective())
                    .map(|a| a.role_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `from` reaches `target` following parent links.
    fn reaches(state: &RbacState, from: Uuid, target: Uuid) -> bool {
        if from == target {
            return true;
        }
        let mut visited = HashSet::new();
        let mut queue = vec![from];
        while let Some(role_id) = queue.pop() {
            if !visited.insert(role_id) {
                continue;
            }
            if role_id == target {
                return true;
            }
            if let Some(role) = state.roles.get(&role_id) {
                queue.extend(role.parent_roles.iter().copied());
            }
        }
        false
    }

    fn seed_system_objects(state: &mut RbacState) {
        let seeds = [
            ("system.admin", "Full system administration access", None, vec![]),
            ("user.read", "Read user information", Some("user"), vec!["read"]),
            ("user.create", "Create new users", Some("user"), vec!["create"]),
            ("user.update", "Update user information", Some("user"), vec!["update"]),
            ("user.delete", "Delete users", Some("user"), vec!["delete"]),
            ("role.read", "Read role information", Some("role"), vec!["read"]),
            ("role.create", "Create new roles", Some("role"), vec!["create"]),
            ("role.update", "Update role information", Some("role"), vec!["update"]),
            ("role.delete", "Delete roles", Some("role"), vec!["delete"]),
            ("role.assign", "Assign roles to users", Some("role"), vec!["assign"]),
        ];
        for (name, description, resource_type, actions) in seeds {
            let permission = Permission {
                permission_id: Uuid::new_v4(),
                name: name.to_string(),
                description: description.to_string(),
                resource_type: resource_type.map(String::from),
                actions: actions.into_iter().map(String::from).collect(),
                system: true,
                metadata: Default::default(),
            };
            state
                .permission_names
                .insert(permission.name.clone(), permission.permission_id);
            state
                .permissions
                .insert(permission.permission_id, permission);
        }

        let permission_id = |state: &RbacState, name: &str| state.permission_names[name];
        let role_seeds = [
            (
                "Administrator",
                "System administrator with full access",
                vec!["system.admin"],
            ),
            (
                "User Manager",
                "Can manage users and their roles",
                vec![
                    "user.read",
                    "user.create",
                    "user.update",
                    "user.delete",
                    "role.read",
                    "role.assign",
                ],
            ),
            ("User", "Standard user with basic access", vec![]),
        ];
        for (name, description, permissions) in role_seeds {
            let role = Role {
                role_id: Uuid::new_v4(),
                name: name.to_string(),
                description: description.to_string(),
                permissions: permissions
                    .into_iter()
                    .map(|n| permission_id(state, n))
                    .collect(),
                parent_roles: HashSet::new(),
                system: true,
                created_at: Utc::now(),
                metadata: Default::default(),
            };
            state.role_names.insert(role.name.clone(), role.role_id);
            state.roles.insert(role.role_id, role);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AuthorizationManager {
        AuthorizationManager::new(Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn system_objects_are_seeded_and_immutable() {
        let rbac = manager();
        let admin = rbac.get_permission_by_name("system.admin").await.unwrap();
        assert!(admin.system);
        assert!(rbac.get_role_by_name("Administrator").await.is_some());
        assert!(rbac.get_role_by_name("User Manager").await.is_some());
        assert!(rbac.get_role_by_name("User").await.is_some());

        let err = rbac
            .update_permission(admin.permission_id, PermissionUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::SystemObjectImmutable(_)));

        let err = rbac.delete_permission(admin.permission_id).await.unwrap_err();
        assert!(matches!(err, RbacError::SystemObjectImmutable(_)));

        let admin_role = rbac.get_role_by_name("Administrator").await.unwrap();
        let err = rbac.delete_role(admin_role.role_id).await.unwrap_err();
        assert!(matches!(err, RbacError::SystemObjectImmutable(_)));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let rbac = manager();
        rbac.register_permission(PermissionDef::new("doc.read", "Read documents"))
            .await
            .unwrap();
        let err = rbac
            .register_permission(PermissionDef::new("doc.read", "Again"))
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::DuplicatePermission(_)));

        rbac.register_role(RoleDef::new("Editor", "Edits")).await.unwrap();
        let err = rbac
            .register_role(RoleDef::new("Editor", "Again"))
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::DuplicateRole(_)));
    }

    #[tokio::test]
    async fn assignment_grants_permissions_through_hierarchy() {
        let rbac = manager();
        let read = rbac
            .register_permission(PermissionDef::new("doc.read", "Read"))
            .await
            .unwrap();
        let write = rbac
            .register_permission(PermissionDef::new("doc.write", "Write"))
            .await
            .unwrap();

        let reader = rbac
            .register_role(RoleDef::new("Reader", "").with_permissions(vec![read.permission_id]))
            .await
            .unwrap();
        let editor = rbac
            .register_role(
                RoleDef::new("Writer", "")
                    .with_permissions(vec![write.permission_id])
                    .with_parents(vec![reader.role_id]),
            )
            .await
            .unwrap();

        let user = Uuid::new_v4();
        rbac.assign_role_to_user(user, editor.role_id, RoleAssignmentOptions::default())
            .await
            .unwrap();

        // Inherited closure includes the parent's permissions
        assert!(rbac.has_permission(user, "doc.write").await);
        assert!(rbac.has_permission(user, "doc.read").await);
        assert!(rbac.has_role(user, "Writer").await);
        assert!(!rbac.has_role(user, "Reader").await);

        rbac.check_permission(user, "doc.read").await.unwrap();
        let err = rbac.check_permission(user, "doc.delete").await.unwrap_err();
        assert!(matches!(err, RbacError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn revocation_deactivates_without_deleting() {
        let rbac = manager();
        let role = rbac.register_role(RoleDef::new("Temp", "")).await.unwrap();
        let user = Uuid::new_v4();
        rbac.assign_role_to_user(user, role.role_id, RoleAssignmentOptions::default())
            .await
            .unwrap();

        assert_eq!(rbac.revoke_role_from_user(user, role.role_id).await, 1);
        // Idempotent
        assert_eq!(rbac.revoke_role_from_user(user, role.role_id).await, 0);

        // Audit trail survives
        let assignments = rbac.get_user_assignments(user).await;
        assert_eq!(assignments.len(), 1);
        assert!(!assignments[0].active);
        assert!(!rbac.has_role(user, "Temp").await);
    }

    #[tokio::test]
    async fn expired_assignment_is_not_effective() {
        let rbac = manager();
        let role = rbac.register_role(RoleDef::new("Limited", "")).await.unwrap();
        let user = Uuid::new_v4();
        rbac.assign_role_to_user(
            user,
            role.role_id,
            RoleAssignmentOptions {
                expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(!rbac.has_role(user, "Limited").await);
    }

    #[tokio::test]
    async fn cycle_in_parent_roles_is_rejected() {
        let rbac = manager();
        let a = rbac.register_role(RoleDef::new("A", "")).await.unwrap();
        let b = rbac
            .register_role(RoleDef::new("B", "").with_parents(vec![a.role_id]))
            .await
            .unwrap();
        let c = rbac
            .register_role(RoleDef::new("C", "").with_parents(vec![b.role_id]))
            .await
            .unwrap();

        // A -> C would close the loop A <- B <- C
        let err = rbac
            .update_role(
                a.role_id,
                RoleUpdate {
                    parent_roles: Some(vec![c.role_id]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::CircularHierarchy(_)));

        // Self-parenting is also a cycle
        let err = rbac
            .update_role(
                a.role_id,
                RoleUpdate {
                    parent_roles: Some(vec![a.role_id]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::CircularHierarchy(_)));
    }

    #[tokio::test]
    async fn referenced_objects_cannot_be_deleted() {
        let rbac = manager();
        let permission = rbac
            .register_permission(PermissionDef::new("doc.read", ""))
            .await
            .unwrap();
        let parent = rbac
            .register_role(RoleDef::new("Parent", "").with_permissions(vec![permission.permission_id]))
            .await
            .unwrap();
        rbac.register_role(RoleDef::new("Child", "").with_parents(vec![parent.role_id]))
            .await
            .unwrap();

        let err = rbac.delete_permission(permission.permission_id).await.unwrap_err();
        assert!(matches!(err, RbacError::PermissionInUse(_)));
        let err = rbac.delete_role(parent.role_id).await.unwrap_err();
        assert!(matches!(err, RbacError::RoleInUse(_)));
    }

    #[tokio::test]
    async fn unknown_references_are_rejected() {
        let rbac = manager();
        let err = rbac
            .register_role(RoleDef::new("R", "").with_permissions(vec![Uuid::new_v4()]))
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::UnknownPermission(_)));

        let err = rbac
            .assign_role_to_user(Uuid::new_v4(), Uuid::new_v4(), RoleAssignmentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::UnknownRole(_)));
    }
}
