use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use rolegate_auth::{GrantRecord, Permission, PermissionStore, Role, RoleStore, StoreError};
use rolegate_core::{Entity, RoleId};

type GrantTable = HashMap<RoleId, BTreeMap<Permission, GrantRecord>>;

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

/// In-memory grant-record store.
///
/// Intended for tests/dev. `exists_for_permission` scans every role, which is
/// the cost the nobody-has-access cache amortizes.
#[derive(Debug, Default)]
pub struct InMemoryPermissionStore {
    grants: RwLock<GrantTable>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Total number of grant records across all roles.
    pub fn len(&self) -> usize {
        self.read()
            .map(|grants| grants.values().map(BTreeMap::len).sum::<usize>())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, GrantTable>, StoreError> {
        self.grants.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GrantTable>, StoreError> {
        self.grants.write().map_err(|_| poisoned())
    }
}

impl PermissionStore for InMemoryPermissionStore {
    fn create(&self, role_id: RoleId, permission: &Permission) -> Result<GrantRecord, StoreError> {
        let mut grants = self.write()?;
        let held = grants.entry(role_id).or_default();
        if held.contains_key(permission) {
            return Err(StoreError::grant_exists(role_id, permission));
        }

        let record = GrantRecord {
            role_id,
            permission: permission.clone(),
            granted_at: Utc::now(),
        };
        held.insert(permission.clone(), record.clone());
        Ok(record)
    }

    fn find(&self, role_id: RoleId, permission: &Permission) -> Result<GrantRecord, StoreError> {
        let grants = self.read()?;
        grants
            .get(&role_id)
            .and_then(|held| held.get(permission))
            .cloned()
            .ok_or_else(|| StoreError::grant_not_found(role_id, permission))
    }

    fn list_by_role(&self, role_id: RoleId) -> Result<Vec<GrantRecord>, StoreError> {
        let grants = self.read()?;
        Ok(grants
            .get(&role_id)
            .map(|held| held.values().cloned().collect())
            .unwrap_or_default())
    }

    fn delete(&self, role_id: RoleId, permission: &Permission) -> Result<(), StoreError> {
        let mut grants = self.write()?;
        let removed = grants
            .get_mut(&role_id)
            .and_then(|held| held.remove(permission));

        match removed {
            Some(_) => {
                if grants.get(&role_id).is_some_and(BTreeMap::is_empty) {
                    grants.remove(&role_id);
                }
                Ok(())
            }
            None => Err(StoreError::grant_not_found(role_id, permission)),
        }
    }

    fn delete_all_by_role(&self, role_id: RoleId) -> Result<Vec<GrantRecord>, StoreError> {
        let mut grants = self.write()?;
        Ok(grants
            .remove(&role_id)
            .map(|held| held.into_values().collect())
            .unwrap_or_default())
    }

    fn delete_all_by_permission(&self, permission: &Permission) -> Result<usize, StoreError> {
        let mut grants = self.write()?;
        let mut removed = 0;
        for held in grants.values_mut() {
            if held.remove(permission).is_some() {
                removed += 1;
            }
        }
        grants.retain(|_, held| !held.is_empty());
        Ok(removed)
    }

    fn exists_for_permission(&self, permission: &Permission) -> Result<bool, StoreError> {
        let grants = self.read()?;
        Ok(grants.values().any(|held| held.contains_key(permission)))
    }
}

/// In-memory role store. Assigns UUIDv7 identifiers on insert.
#[derive(Debug, Default)]
pub struct InMemoryRoleStore {
    roles: RwLock<HashMap<RoleId, Role>>,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl RoleStore for InMemoryRoleStore {
    fn insert(&self, role: &Role) -> Result<Role, StoreError> {
        let mut roles = self.roles.write().map_err(|_| poisoned())?;
        if roles.values().any(|r| r.slug() == role.slug()) {
            return Err(StoreError::AlreadyExists(format!("role '{}'", role.slug())));
        }

        let id = RoleId::new();
        let stored = Role::with_id(id, role.slug(), role.name());
        roles.insert(id, stored.clone());
        Ok(stored)
    }

    fn update(&self, role: &Role) -> Result<(), StoreError> {
        let id = role
            .id()
            .ok_or_else(|| StoreError::NotFound(format!("role '{}' has no id", role.slug())))?;

        let mut roles = self.roles.write().map_err(|_| poisoned())?;
        match roles.get_mut(&id) {
            Some(stored) => {
                *stored = role.clone();
                Ok(())
            }
            None => Err(StoreError::role_not_found(id)),
        }
    }

    fn get(&self, role_id: RoleId) -> Result<Role, StoreError> {
        let roles = self.roles.read().map_err(|_| poisoned())?;
        roles
            .get(&role_id)
            .cloned()
            .ok_or_else(|| StoreError::role_not_found(role_id))
    }

    fn find_by_slug(&self, slug: &str) -> Result<Option<Role>, StoreError> {
        let roles = self.roles.read().map_err(|_| poisoned())?;
        Ok(roles.values().find(|r| r.slug() == slug).cloned())
    }

    fn list(&self) -> Result<Vec<Role>, StoreError> {
        let roles = self.roles.read().map_err(|_| poisoned())?;
        let mut result: Vec<Role> = roles.values().cloned().collect();
        result.sort_by(|a, b| a.slug().cmp(b.slug()));
        Ok(result)
    }

    fn delete(&self, role_id: RoleId) -> Result<(), StoreError> {
        let mut roles = self.roles.write().map_err(|_| poisoned())?;
        roles
            .remove(&role_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::role_not_found(role_id))
    }
}
