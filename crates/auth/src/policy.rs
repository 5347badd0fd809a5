//! Policy registry: the closed set of grantable permission identifiers.
//!
//! The registry is declared once by the embedding application (typically from
//! its configured abilities) and is read-only afterwards.

use std::collections::BTreeSet;

use crate::Permission;

/// Source of truth for "is this a real permission".
pub trait PolicyRegistry: Send + Sync + core::fmt::Debug {
    /// Whether `permission` may be granted.
    fn is_valid(&self, permission: &Permission) -> bool;

    /// Every grantable identifier.
    fn all(&self) -> BTreeSet<Permission>;
}

/// Immutable in-process registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticPolicyRegistry {
    abilities: BTreeSet<Permission>,
}

impl StaticPolicyRegistry {
    pub fn new<I, P>(abilities: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        Self {
            abilities: abilities.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a registry from a declared ability map (`identifier -> enabled`).
    ///
    /// Disabled abilities are not grantable.
    pub fn from_abilities<I, K>(abilities: I) -> Self
    where
        I: IntoIterator<Item = (K, bool)>,
        K: Into<Permission>,
    {
        Self {
            abilities: abilities
                .into_iter()
                .filter(|(_, enabled)| *enabled)
                .map(|(name, _)| name.into())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.abilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abilities.is_empty()
    }
}

impl PolicyRegistry for StaticPolicyRegistry {
    fn is_valid(&self, permission: &Permission) -> bool {
        self.abilities.contains(permission)
    }

    fn all(&self) -> BTreeSet<Permission> {
        self.abilities.clone()
    }
}

impl<P: Into<Permission>> FromIterator<P> for StaticPolicyRegistry {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self::new(iter)
    }
}
