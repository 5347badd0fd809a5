//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Identity may be absent until the entity is persisted for the first time.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the identifier, if one has been assigned.
    fn id(&self) -> Option<Self::Id>;

    /// Whether the entity has been persisted (i.e. has an identifier).
    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }
}
