//! Access-control error taxonomy.

use thiserror::Error;

use rolegate_core::DomainError;

use crate::{Permission, StoreError};

pub type RbacResult<T> = Result<T, RbacError>;

/// Errors reported by [`AccessControl`](crate::AccessControl).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RbacError {
    /// The identifier is not declared in the policy registry.
    #[error("unknown permission '{0}'")]
    UnknownPermission(Permission),

    /// A grant or role does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A record already exists. Grant paths never surface this.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The underlying store failed; no retry was attempted.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The role has no identifier yet.
    #[error("role '{0}' has not been persisted")]
    RoleNotPersisted(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<StoreError> for RbacError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::AlreadyExists(what) => Self::AlreadyExists(what),
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
        }
    }
}
