//! Infrastructure layer: storage adapters for the access-control core.

pub mod store;

pub use store::in_memory::{InMemoryPermissionStore, InMemoryRoleStore};

#[cfg(feature = "postgres")]
pub use store::postgres::{PostgresPermissionStore, PostgresRoleStore};

use std::sync::Arc;

use rolegate_auth::{AccessControl, NobodyHasAccessCache, PolicyRegistry};

/// Wire an [`AccessControl`] over fresh in-memory stores and a fresh cache.
///
/// Intended for tests/dev.
pub fn in_memory_access_control(registry: Arc<dyn PolicyRegistry>) -> AccessControl {
    AccessControl::new(
        Arc::new(InMemoryPermissionStore::new()),
        Arc::new(InMemoryRoleStore::new()),
        registry,
        Arc::new(NobodyHasAccessCache::new()),
    )
}
