//! `rolegate-auth`: role/permission grants validated against a closed policy registry.
//!
//! This crate is intentionally decoupled from storage: persistence sits behind
//! [`PermissionStore`] and [`RoleStore`], implemented in `rolegate-infra`.

pub mod access;
pub mod cache;
pub mod config;
pub mod error;
pub mod permissions;
pub mod policy;
pub mod roles;
pub mod store;

pub use access::AccessControl;
pub use cache::{CacheStats, NobodyHasAccessCache};
pub use config::RbacConfig;
pub use error::{RbacError, RbacResult};
pub use permissions::Permission;
pub use policy::{PolicyRegistry, StaticPolicyRegistry};
pub use roles::{Role, RoleView};
pub use store::{GrantRecord, PermissionStore, RoleStore, StoreError};
