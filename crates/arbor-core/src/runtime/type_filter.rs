// crates/arbor-core/src/runtime/type_filter.rs
// ============================================================================
// Module: Arbor Type Filter State
// Description: Requested and excluded type sets carried by node queries.
// Purpose: Combine type restrictions under query intersection and union.
// Dependencies: crate::core::identifiers
// ============================================================================

//! ## Overview
//! A query remembers which types were asked for and which were ruled out so
//! the upcast engine can narrow its join set. Combination never fails: an
//! intersection with no common requested types simply yields no candidates.
//! An empty requested set means "no restriction".

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use crate::core::identifiers::TypeName;

// ============================================================================
// SECTION: Type Filter State
// ============================================================================

/// Type restrictions carried by a query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeFilterState {
    /// Types the query asked for; empty means unrestricted.
    requested: BTreeSet<TypeName>,
    /// Types the query ruled out.
    excluded: BTreeSet<TypeName>,
}

impl TypeFilterState {
    /// Creates an unrestricted state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the requested types.
    #[must_use]
    pub const fn requested(&self) -> &BTreeSet<TypeName> {
        &self.requested
    }

    /// Returns the excluded types.
    #[must_use]
    pub const fn excluded(&self) -> &BTreeSet<TypeName> {
        &self.excluded
    }

    /// Returns a state with `types` replacing the requested set.
    #[must_use]
    pub fn with_requested(&self, types: BTreeSet<TypeName>) -> Self {
        Self { requested: types, excluded: self.excluded.clone() }
    }

    /// Returns a state with `types` added to the excluded set.
    #[must_use]
    pub fn with_excluded(&self, types: BTreeSet<TypeName>) -> Self {
        let mut excluded = self.excluded.clone();
        excluded.extend(types);
        Self { requested: self.requested.clone(), excluded }
    }

    /// Combines states for a query intersection.
    ///
    /// Requested sets intersect and excluded sets union.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            requested: self.requested.intersection(&other.requested).cloned().collect(),
            excluded: self.excluded.union(&other.excluded).cloned().collect(),
        }
    }

    /// Combines states for a query union.
    ///
    /// Requested sets union and excluded sets intersect.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            requested: self.requested.union(&other.requested).cloned().collect(),
            excluded: self.excluded.intersection(&other.excluded).cloned().collect(),
        }
    }

    /// Narrows registered types to the candidates this state allows.
    #[must_use]
    pub fn candidates<'a, I>(&self, registered: I) -> BTreeSet<TypeName>
    where
        I: IntoIterator<Item = &'a TypeName>,
    {
        registered
            .into_iter()
            .filter(|name| self.requested.is_empty() || self.requested.contains(*name))
            .filter(|name| !self.excluded.contains(*name))
            .cloned()
            .collect()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<TypeName> {
        names.iter().map(|name| TypeName::from(*name)).collect()
    }

    #[test]
    fn intersect_and_union_follow_set_algebra() {
        let left = TypeFilterState::new().with_requested(set(&["a", "b"])).with_excluded(set(&["x"]));
        let right =
            TypeFilterState::new().with_requested(set(&["b", "c"])).with_excluded(set(&["x", "y"]));
        let both = left.intersect(&right);
        assert_eq!(both.requested(), &set(&["b"]));
        assert_eq!(both.excluded(), &set(&["x", "y"]));
        let either = left.union(&right);
        assert_eq!(either.requested(), &set(&["a", "b", "c"]));
        assert_eq!(either.excluded(), &set(&["x"]));
    }
}
