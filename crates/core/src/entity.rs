//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Rows owned by the storage collaborators (contacts, companies, jobs) are
/// entities: they are looked up and updated by identity, scoped to a user.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
