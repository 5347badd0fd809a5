//! Role entity.
//!
//! A role is identity only: its permission set is derived from grant records
//! on demand (see [`AccessControl::permissions`](crate::AccessControl::permissions))
//! and is never stored on the role itself.

use serde::{Deserialize, Serialize};

use rolegate_core::{DomainError, DomainResult, Entity, RoleId};

/// A named role that owns zero or more permission grants.
///
/// Deserialization runs the same slug and name validation as [`Role::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RoleRecord")]
pub struct Role {
    id: Option<RoleId>,
    slug: String,
    name: String,
}

impl Role {
    /// Create an unpersisted role. The identifier is assigned by the role store.
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> DomainResult<Self> {
        let slug = slug.into();
        validate_slug(&slug)?;

        let name = name.into();
        validate_name(&name)?;

        Ok(Self {
            id: None,
            slug,
            name,
        })
    }

    /// Rehydrate a persisted role (used by store implementations).
    pub fn with_id(id: RoleId, slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            slug: slug.into(),
            name: name.into(),
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) -> DomainResult<()> {
        let name = name.into();
        validate_name(&name)?;
        self.name = name;
        Ok(())
    }

    pub(crate) fn assign_id(&mut self, id: RoleId) {
        self.id = Some(id);
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> Option<RoleId> {
        self.id
    }
}

#[derive(Deserialize)]
struct RoleRecord {
    id: Option<RoleId>,
    slug: String,
    name: String,
}

impl TryFrom<RoleRecord> for Role {
    type Error = DomainError;

    fn try_from(record: RoleRecord) -> DomainResult<Self> {
        let mut role = Role::new(record.slug, record.name)?;
        role.id = record.id;
        Ok(role)
    }
}

fn validate_name(name: &str) -> DomainResult<()> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("role name must not be empty"));
    }
    Ok(())
}

/// Slugs are lowercase ASCII words separated by `-`, `_` or `.`.
fn validate_slug(slug: &str) -> DomainResult<()> {
    if slug.is_empty() {
        return Err(DomainError::validation("role slug must not be empty"));
    }

    let valid = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(DomainError::validation(format!(
            "role slug '{slug}' may only contain lowercase letters, digits, '-', '_' and '.'"
        )));
    }

    Ok(())
}

/// Serializable view of a role together with its derived permission set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleView {
    pub id: RoleId,
    pub slug: String,
    pub name: String,
    /// Sorted, deduplicated permission identifiers.
    pub permissions: Vec<String>,
}
