//! Role permission orchestration: grant, revoke and check.
//!
//! [`AccessControl`] composes the permission store, the policy registry and the
//! nobody-has-access cache. It is cheap to clone; clones share the same
//! collaborators.
//!
//! Write paths invalidate the cache before touching the store and again once
//! the write has landed. A failed write therefore costs only a recompute, and
//! an answer recomputed while the write was in flight is never kept.

use std::collections::BTreeSet;
use std::sync::Arc;

use rolegate_core::{Entity, RoleId};

use crate::{
    NobodyHasAccessCache, Permission, PermissionStore, PolicyRegistry, RbacError, RbacResult, Role,
    RoleStore, RoleView, StoreError,
};

#[derive(Debug, Clone)]
pub struct AccessControl {
    permissions: Arc<dyn PermissionStore>,
    roles: Arc<dyn RoleStore>,
    registry: Arc<dyn PolicyRegistry>,
    cache: Arc<NobodyHasAccessCache>,
}

impl AccessControl {
    pub fn new(
        permissions: Arc<dyn PermissionStore>,
        roles: Arc<dyn RoleStore>,
        registry: Arc<dyn PolicyRegistry>,
        cache: Arc<NobodyHasAccessCache>,
    ) -> Self {
        Self {
            permissions,
            roles,
            registry,
            cache,
        }
    }

    pub fn cache(&self) -> &NobodyHasAccessCache {
        &self.cache
    }

    /// Every grantable permission identifier.
    pub fn policies(&self) -> BTreeSet<Permission> {
        self.registry.all()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────

    pub fn create_role(&self, slug: &str, name: &str) -> RbacResult<Role> {
        let mut role = Role::new(slug, name)?;
        self.save_role(&mut role)?;
        Ok(role)
    }

    /// Persist `role` if it has no identifier yet, otherwise store its name.
    pub fn save_role(&self, role: &mut Role) -> RbacResult<RoleId> {
        if let Some(id) = role.id() {
            self.roles.update(role).map_err(|e| self.store_failure(e))?;
            return Ok(id);
        }

        let stored = self.roles.insert(role).map_err(|e| self.store_failure(e))?;
        let id = stored.id().ok_or_else(|| {
            RbacError::StoreUnavailable(format!(
                "role store returned '{}' without an id",
                role.slug()
            ))
        })?;
        role.assign_id(id);

        tracing::info!(role_id = %id, slug = role.slug(), "role persisted");
        Ok(id)
    }

    pub fn get_role(&self, role_id: RoleId) -> RbacResult<Role> {
        Ok(self.roles.get(role_id)?)
    }

    pub fn find_role_by_slug(&self, slug: &str) -> RbacResult<Option<Role>> {
        Ok(self.roles.find_by_slug(slug)?)
    }

    pub fn list_roles(&self) -> RbacResult<Vec<Role>> {
        Ok(self.roles.list()?)
    }

    /// Revoke every grant of `role` and delete it.
    pub fn delete_role(&self, role: &Role) -> RbacResult<()> {
        let id = persisted_id(role)?;
        self.revoke_all(role)?;
        self.roles.delete(id).map_err(|e| self.store_failure(e))?;
        tracing::info!(role_id = %id, slug = role.slug(), "role deleted");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────

    /// Whether a grant record exists for (role, permission).
    ///
    /// The policy registry is not consulted: a grant for an identifier that has
    /// since been withdrawn from the registry is still held.
    pub fn has_permission(&self, role: &Role, permission: &Permission) -> RbacResult<bool> {
        let Some(id) = role.id() else {
            return Ok(false);
        };

        match self.permissions.find(id, permission) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(self.store_failure(e)),
        }
    }

    /// The role's current permission set, derived from its grant records.
    pub fn permissions(&self, role: &Role) -> RbacResult<BTreeSet<Permission>> {
        let Some(id) = role.id() else {
            return Ok(BTreeSet::new());
        };

        let records = self
            .permissions
            .list_by_role(id)
            .map_err(|e| self.store_failure(e))?;
        Ok(records.into_iter().map(|r| r.permission).collect())
    }

    pub fn view(&self, role: &Role) -> RbacResult<RoleView> {
        let id = persisted_id(role)?;
        let permissions = self.permissions(role)?;

        Ok(RoleView {
            id,
            slug: role.slug().to_string(),
            name: role.name().to_string(),
            permissions: permissions.iter().map(|p| p.as_str().to_string()).collect(),
        })
    }

    /// Grant `permission` to `role`. Granting a held permission is a no-op.
    pub fn grant(&self, role: &Role, permission: &Permission) -> RbacResult<()> {
        let id = persisted_id(role)?;

        if self.has_permission(role, permission)? {
            tracing::debug!(role_id = %id, %permission, "permission already granted");
            return Ok(());
        }

        if !self.registry.is_valid(permission) {
            return Err(RbacError::UnknownPermission(permission.clone()));
        }

        self.cache.invalidate(permission);

        match self.permissions.create(id, permission) {
            Ok(_) => {}
            // Lost a race with a concurrent grant of the same pair.
            Err(StoreError::AlreadyExists(_)) => {
                tracing::debug!(role_id = %id, %permission, "permission granted concurrently");
                return Ok(());
            }
            Err(e) => return Err(self.store_failure(e)),
        }
        self.cache.invalidate(permission);

        tracing::info!(role_id = %id, %permission, "permission granted");
        Ok(())
    }

    /// Revoke `permission` from `role`; fails with [`RbacError::NotFound`] if not held.
    pub fn revoke(&self, role: &Role, permission: &Permission) -> RbacResult<()> {
        let id = persisted_id(role)?;

        match self.permissions.find(id, permission) {
            Ok(_) => {}
            Err(e @ StoreError::NotFound(_)) => return Err(e.into()),
            Err(e) => return Err(self.store_failure(e)),
        }

        self.cache.invalidate(permission);
        self.permissions
            .delete(id, permission)
            .map_err(|e| self.store_failure(e))?;
        self.cache.invalidate(permission);

        tracing::info!(role_id = %id, %permission, "permission revoked");
        Ok(())
    }

    /// Revoke every permission of `role`; returns the number of grants removed.
    pub fn revoke_all(&self, role: &Role) -> RbacResult<usize> {
        let Some(id) = role.id() else {
            return Ok(0);
        };

        let held: BTreeSet<Permission> = self
            .permissions
            .list_by_role(id)
            .map_err(|e| self.store_failure(e))?
            .into_iter()
            .map(|r| r.permission)
            .collect();
        self.cache.invalidate_many(&held);

        let removed = self
            .permissions
            .delete_all_by_role(id)
            .map_err(|e| self.store_failure(e))?;

        // Includes grants created between listing and deleting.
        self.cache.invalidate_many(removed.iter().map(|r| &r.permission));

        tracing::info!(role_id = %id, removed = removed.len(), "all permissions revoked");
        Ok(removed.len())
    }

    /// Replace the role's permission set.
    ///
    /// Persists the role first if needed. Identifiers missing from the policy
    /// registry are skipped rather than failing the whole replacement; store
    /// failures still propagate. Returns the resulting permission set.
    pub fn set_permissions<I>(
        &self,
        role: &mut Role,
        permissions: I,
    ) -> RbacResult<BTreeSet<Permission>>
    where
        I: IntoIterator<Item = Permission>,
    {
        if !role.is_persisted() {
            self.save_role(role)?;
        }

        self.revoke_all(role)?;

        let mut granted = BTreeSet::new();
        for permission in permissions {
            if !self.registry.is_valid(&permission) {
                tracing::debug!(role = role.slug(), %permission, "skipping unknown permission");
                continue;
            }

            match self.grant(role, &permission) {
                Ok(()) => {
                    granted.insert(permission);
                }
                Err(RbacError::UnknownPermission(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        tracing::info!(role = role.slug(), count = granted.len(), "permissions replaced");
        Ok(granted)
    }

    /// Whether no role at all holds `permission`. Backed by the cache.
    ///
    /// Identifiers missing from the registry are answered by a direct store
    /// scan and never occupy a cache slot.
    pub fn is_permission_unassigned(&self, permission: &Permission) -> RbacResult<bool> {
        if !self.registry.is_valid(permission) {
            return self
                .permissions
                .exists_for_permission(permission)
                .map(|held| !held)
                .map_err(|e| self.store_failure(e));
        }

        self.cache
            .is_unassigned(permission, self.permissions.as_ref())
            .map_err(|e| self.store_failure(e))
    }

    /// Remove `permission` from every role, e.g. after withdrawing it from the
    /// registry. Returns the number of grants removed.
    pub fn purge_permission(&self, permission: &Permission) -> RbacResult<usize> {
        self.cache.invalidate(permission);
        let removed = self
            .permissions
            .delete_all_by_permission(permission)
            .map_err(|e| self.store_failure(e))?;
        self.cache.invalidate(permission);

        tracing::info!(%permission, removed, "permission purged from all roles");
        Ok(removed)
    }

    fn store_failure(&self, err: StoreError) -> RbacError {
        if let StoreError::Unavailable(reason) = &err {
            tracing::warn!(%reason, "permission store failure");
        }
        err.into()
    }
}

fn persisted_id(role: &Role) -> RbacResult<RoleId> {
    role.id()
        .ok_or_else(|| RbacError::RoleNotPersisted(role.slug().to_string()))
}
