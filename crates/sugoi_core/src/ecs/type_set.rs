//! # Type Sets
//!
//! The identity of an archetype: which component types it holds.

use crate::types::TypeIndex;

/// Sorted, deduplicated set of component types.
///
/// Two sets with the same members compare and hash equal regardless of the
/// order they were built in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TypeSet {
    types: Vec<TypeIndex>,
}

impl TypeSet {
    /// Creates a set from any collection of type indices.
    #[must_use]
    pub fn new(types: impl IntoIterator<Item = TypeIndex>) -> Self {
        let mut types: Vec<_> = types.into_iter().collect();
        types.sort_unstable();
        types.dedup();
        Self { types }
    }

    /// Checks if the set contains a type.
    #[must_use]
    pub fn contains(&self, index: TypeIndex) -> bool {
        self.types.binary_search(&index).is_ok()
    }

    /// Checks if every type of `other` is in this set.
    #[must_use]
    pub fn is_superset_of(&self, other: &Self) -> bool {
        // Both sorted: one merge pass.
        let mut mine = self.types.iter();
        other
            .types
            .iter()
            .all(|wanted| mine.by_ref().any(|have| have == wanted))
    }

    /// Number of types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Checks if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Members in sorted order.
    #[must_use]
    pub fn as_slice(&self) -> &[TypeIndex] {
        &self.types
    }

    /// Iterates members in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = TypeIndex> + '_ {
        self.types.iter().copied()
    }
}

impl FromIterator<TypeIndex> for TypeSet {
    fn from_iter<I: IntoIterator<Item = TypeIndex>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl From<&[TypeIndex]> for TypeSet {
    fn from(types: &[TypeIndex]) -> Self {
        Self::new(types.iter().copied())
    }
}
