//! Storage contracts required by the access-control core.
//!
//! Implementations live in `rolegate-infra` (in-memory for tests/dev, Postgres
//! behind a feature flag). Stores have no side effects beyond themselves: cache
//! invalidation is the caller's responsibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rolegate_core::RoleId;

use crate::{Permission, Role};

/// Persisted fact that a role holds a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub role_id: RoleId,
    pub permission: Permission,
    pub granted_at: DateTime<Utc>,
}

/// Storage operation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn grant_not_found(role_id: RoleId, permission: &Permission) -> Self {
        Self::NotFound(format!("permission '{permission}' for role {role_id}"))
    }

    pub fn grant_exists(role_id: RoleId, permission: &Permission) -> Self {
        Self::AlreadyExists(format!("permission '{permission}' for role {role_id}"))
    }

    pub fn role_not_found(role_id: RoleId) -> Self {
        Self::NotFound(format!("role {role_id}"))
    }
}

/// Persistence for (role, permission) grant records.
///
/// At most one record exists per (role, permission) pair.
pub trait PermissionStore: Send + Sync + core::fmt::Debug {
    /// Create a grant record. Fails with [`StoreError::AlreadyExists`] if the pair exists.
    fn create(&self, role_id: RoleId, permission: &Permission) -> Result<GrantRecord, StoreError>;

    /// Find the grant record for a pair, or [`StoreError::NotFound`].
    fn find(&self, role_id: RoleId, permission: &Permission) -> Result<GrantRecord, StoreError>;

    /// All grant records owned by a role. Order is unspecified.
    fn list_by_role(&self, role_id: RoleId) -> Result<Vec<GrantRecord>, StoreError>;

    /// Delete the grant record for a pair. Fails with [`StoreError::NotFound`] if absent.
    fn delete(&self, role_id: RoleId, permission: &Permission) -> Result<(), StoreError>;

    /// Delete every grant record owned by a role and return the removed records.
    ///
    /// Idempotent: removing nothing is success.
    fn delete_all_by_role(&self, role_id: RoleId) -> Result<Vec<GrantRecord>, StoreError>;

    /// Delete every grant record for a permission across all roles; returns the count.
    fn delete_all_by_permission(&self, permission: &Permission) -> Result<usize, StoreError>;

    /// Whether any role holds `permission`.
    fn exists_for_permission(&self, permission: &Permission) -> Result<bool, StoreError>;
}

/// Persistence for role identity.
pub trait RoleStore: Send + Sync + core::fmt::Debug {
    /// Persist a new role and return it with its assigned identifier.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the slug is taken.
    fn insert(&self, role: &Role) -> Result<Role, StoreError>;

    /// Overwrite the name of a persisted role.
    fn update(&self, role: &Role) -> Result<(), StoreError>;

    fn get(&self, role_id: RoleId) -> Result<Role, StoreError>;

    fn find_by_slug(&self, slug: &str) -> Result<Option<Role>, StoreError>;

    fn list(&self) -> Result<Vec<Role>, StoreError>;

    fn delete(&self, role_id: RoleId) -> Result<(), StoreError>;
}
