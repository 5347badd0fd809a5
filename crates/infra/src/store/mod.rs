//! Permission/role store implementations.
//!
//! The contracts ([`rolegate_auth::PermissionStore`], [`rolegate_auth::RoleStore`])
//! live in `rolegate-auth`; this module provides:
//! - `in_memory`: lock-guarded maps for tests/dev.
//! - `postgres` (feature `postgres`): sqlx-backed durable storage.

pub mod in_memory;

#[cfg(feature = "postgres")]
pub mod postgres;
