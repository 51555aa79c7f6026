// crates/arbor-core/src/core/types.rs
// ============================================================================
// Module: Arbor Type Registry
// Description: Closed registry of record types and their inheritance joins.
// Purpose: Resolve concrete subtypes and the join paths used to upcast rows.
// Dependencies: parking_lot, serde, thiserror, crate::core::{identifiers, record}
// ============================================================================

//! ## Overview
//! Every record type is declared up front as a [`TypeDescriptor`]. A concrete
//! type's nearest concrete ancestor is its join parent; abstract types carry no
//! rows and are skipped when building join paths. Specific lookups are built
//! lazily once per base type and read-only afterwards.
//!
//! Security posture: descriptor sets come from configuration and are validated
//! for unknown parents and cycles before use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::PrimaryKeyKind;
use crate::core::identifiers::TypeName;
use crate::core::record::JOIN_DELIMITER;
use crate::core::record::JoinPath;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Type registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Type name is not registered.
    #[error("unknown type: {0}")]
    UnknownType(TypeName),
    /// Type name was registered twice.
    #[error("duplicate type: {0}")]
    DuplicateType(TypeName),
    /// Declared parent is not registered.
    #[error("type {child} names unknown parent {parent}")]
    UnknownParent {
        /// Declaring type.
        child: TypeName,
        /// Missing parent.
        parent: TypeName,
    },
    /// Parent chain loops back on itself.
    #[error("inheritance cycle through {0}")]
    Cycle(TypeName),
    /// Base type for specific lookups is abstract.
    #[error("base type {0} is abstract")]
    AbstractBase(TypeName),
    /// Join path string does not resolve.
    #[error("invalid join path {0:?}")]
    InvalidJoin(String),
}

// ============================================================================
// SECTION: Descriptors
// ============================================================================

/// Declared record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Type name.
    pub name: TypeName,
    /// Parent type, if any.
    #[serde(default)]
    pub parent: Option<TypeName>,
    /// Abstract types hold no rows of their own.
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Large fields deferred by `defer_streamfields`.
    #[serde(default)]
    pub deferrable_fields: BTreeSet<String>,
    /// Primary key kind of the type's records.
    #[serde(default)]
    pub primary_key: PrimaryKeyKind,
}

impl TypeDescriptor {
    /// Declares a concrete type.
    #[must_use]
    pub fn concrete(name: impl Into<TypeName>, parent: Option<TypeName>) -> Self {
        Self {
            name: name.into(),
            parent,
            is_abstract: false,
            deferrable_fields: BTreeSet::new(),
            primary_key: PrimaryKeyKind::Integer,
        }
    }

    /// Declares an abstract type.
    #[must_use]
    pub fn abstract_type(name: impl Into<TypeName>, parent: Option<TypeName>) -> Self {
        Self { is_abstract: true, ..Self::concrete(name, parent) }
    }

    /// Adds deferrable fields.
    #[must_use]
    pub fn with_deferrable<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deferrable_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Sets the primary key kind.
    #[must_use]
    pub const fn with_primary_key(mut self, kind: PrimaryKeyKind) -> Self {
        self.primary_key = kind;
        self
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Concrete subtype to join path map for one base type.
pub type SpecificLookups = BTreeMap<TypeName, JoinPath>;

/// Closed set of record types.
///
/// # Invariants
/// - Every declared parent is registered and parent chains are acyclic.
/// - Cached lookups are never mutated after insertion.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    /// Descriptors keyed by name.
    descriptors: BTreeMap<TypeName, TypeDescriptor>,
    /// Lazily built lookups keyed by base type.
    lookups: RwLock<BTreeMap<TypeName, Arc<SpecificLookups>>>,
}

impl TypeRegistry {
    /// Creates a validated registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] for duplicates, unknown parents, or cycles.
    pub fn new(descriptors: Vec<TypeDescriptor>) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            if map.insert(name.clone(), descriptor).is_some() {
                return Err(RegistryError::DuplicateType(name));
            }
        }
        for descriptor in map.values() {
            if let Some(parent) = &descriptor.parent
                && !map.contains_key(parent)
            {
                return Err(RegistryError::UnknownParent {
                    child: descriptor.name.clone(),
                    parent: parent.clone(),
                });
            }
        }
        for name in map.keys() {
            let mut seen = BTreeSet::new();
            let mut current = Some(name);
            while let Some(step) = current {
                if !seen.insert(step) {
                    return Err(RegistryError::Cycle(name.clone()));
                }
                current = map.get(step).and_then(|descriptor| descriptor.parent.as_ref());
            }
        }
        Ok(Self { descriptors: map, lookups: RwLock::new(BTreeMap::new()) })
    }

    /// Returns the descriptor for a type.
    #[must_use]
    pub fn descriptor(&self, name: &TypeName) -> Option<&TypeDescriptor> {
        self.descriptors.get(name)
    }

    /// Returns the deferrable fields stored with a type's rows.
    ///
    /// Abstract ancestors contribute their fields to the nearest concrete descendant.
    #[must_use]
    pub fn deferrable_fields(&self, name: &TypeName) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        let mut current = self.descriptors.get(name);
        let mut first = true;
        while let Some(descriptor) = current {
            if !first && !descriptor.is_abstract {
                break;
            }
            fields.extend(descriptor.deferrable_fields.iter().cloned());
            first = false;
            current = descriptor.parent.as_ref().and_then(|parent| self.descriptors.get(parent));
        }
        fields
    }

    /// Returns every registered type name.
    pub fn names(&self) -> impl Iterator<Item = &TypeName> {
        self.descriptors.keys()
    }

    /// Returns every registered concrete type name.
    #[must_use]
    pub fn concrete_names(&self) -> BTreeSet<TypeName> {
        self.descriptors
            .values()
            .filter(|descriptor| !descriptor.is_abstract)
            .map(|descriptor| descriptor.name.clone())
            .collect()
    }

    /// Returns true when `child` equals `ancestor` or inherits from it.
    #[must_use]
    pub fn is_subtype(&self, child: &TypeName, ancestor: &TypeName) -> bool {
        let mut current = Some(child);
        while let Some(step) = current {
            if step == ancestor {
                return true;
            }
            current = self.descriptors.get(step).and_then(|descriptor| descriptor.parent.as_ref());
        }
        false
    }

    /// Returns the given types plus every registered subtype, restricted to concrete types.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownType`] when any input is not registered.
    pub fn concrete_subtypes(
        &self,
        types: &[TypeName],
    ) -> Result<BTreeSet<TypeName>, RegistryError> {
        for name in types {
            if !self.descriptors.contains_key(name) {
                return Err(RegistryError::UnknownType(name.clone()));
            }
        }
        Ok(self
            .descriptors
            .values()
            .filter(|descriptor| !descriptor.is_abstract)
            .filter(|descriptor| types.iter().any(|ty| self.is_subtype(&descriptor.name, ty)))
            .map(|descriptor| descriptor.name.clone())
            .collect())
    }

    /// Returns every concrete subtype of `base` with its join path, built once per base.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when `base` is unknown or abstract.
    pub fn specific_lookups(&self, base: &TypeName) -> Result<Arc<SpecificLookups>, RegistryError> {
        if let Some(cached) = self.lookups.read().get(base) {
            return Ok(Arc::clone(cached));
        }
        let descriptor =
            self.descriptors.get(base).ok_or_else(|| RegistryError::UnknownType(base.clone()))?;
        if descriptor.is_abstract {
            return Err(RegistryError::AbstractBase(base.clone()));
        }
        let mut built = SpecificLookups::new();
        self.collect_lookups(base, &JoinPath::new(Vec::new()), &mut built);
        let mut guard = self.lookups.write();
        let entry = guard.entry(base.clone()).or_insert_with(|| Arc::new(built));
        Ok(Arc::clone(entry))
    }

    /// Parses a display-form join path relative to `base`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidJoin`] when a step does not name a join child.
    pub fn parse_join(&self, base: &TypeName, raw: &str) -> Result<JoinPath, RegistryError> {
        let mut current = base.clone();
        let mut steps = Vec::new();
        for step in raw.split(JOIN_DELIMITER) {
            let next = self
                .join_children(&current)
                .into_iter()
                .find(|child| child.step_name() == step)
                .ok_or_else(|| RegistryError::InvalidJoin(raw.to_string()))?;
            steps.push(next.clone());
            current = next;
        }
        Ok(JoinPath::new(steps))
    }

    /// Depth-first walk collecting join paths below `model`.
    fn collect_lookups(&self, model: &TypeName, prefix: &JoinPath, out: &mut SpecificLookups) {
        for child in self.join_children(model) {
            let path = prefix.child(child.clone());
            self.collect_lookups(&child, &path, out);
            out.insert(child, path);
        }
    }

    /// Returns concrete types whose nearest concrete ancestor is `model`.
    fn join_children(&self, model: &TypeName) -> Vec<TypeName> {
        self.descriptors
            .values()
            .filter(|descriptor| !descriptor.is_abstract)
            .filter(|descriptor| self.concrete_parent(&descriptor.name).as_ref() == Some(model))
            .map(|descriptor| descriptor.name.clone())
            .collect()
    }

    /// Returns the nearest concrete ancestor, skipping abstract types.
    fn concrete_parent(&self, name: &TypeName) -> Option<TypeName> {
        let mut current = self.descriptors.get(name)?.parent.as_ref();
        while let Some(step) = current {
            let descriptor = self.descriptors.get(step)?;
            if !descriptor.is_abstract {
                return Some(step.clone());
            }
            current = descriptor.parent.as_ref();
        }
        None
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    fn registry() -> TypeRegistry {
        let page = TypeName::from("core.Page");
        let listing = TypeName::from("core.Listing");
        TypeRegistry::new(vec![
            TypeDescriptor::concrete("core.Page", None),
            TypeDescriptor::abstract_type("core.Listing", Some(page.clone())),
            TypeDescriptor::concrete("blog.BlogIndex", Some(listing)),
            TypeDescriptor::concrete("blog.BlogPost", Some(page)),
            TypeDescriptor::concrete("blog.FeaturedPost", Some(TypeName::from("blog.BlogPost"))),
        ])
        .unwrap()
    }

    #[test]
    fn lookups_skip_abstract_intermediates() {
        let registry = registry();
        let lookups = registry.specific_lookups(&TypeName::from("core.Page")).unwrap();
        let index = lookups.get(&TypeName::from("blog.BlogIndex")).unwrap();
        assert_eq!(index.to_string(), "blogindex");
        let featured = lookups.get(&TypeName::from("blog.FeaturedPost")).unwrap();
        assert_eq!(featured.to_string(), "blogpost__featuredpost");
        assert_eq!(lookups.len(), 3);
    }

    #[test]
    fn lookups_are_cached_per_base() {
        let registry = registry();
        let base = TypeName::from("core.Page");
        let first = registry.specific_lookups(&base).unwrap();
        let second = registry.specific_lookups(&base).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn cycles_are_rejected() {
        let err = TypeRegistry::new(vec![
            TypeDescriptor::concrete("a.A", Some(TypeName::from("a.B"))),
            TypeDescriptor::concrete("a.B", Some(TypeName::from("a.A"))),
        ])
        .unwrap_err();
        assert!(matches!(err, RegistryError::Cycle(_)));
    }

    #[test]
    fn parse_join_resolves_display_form() {
        let registry = registry();
        let join = registry
            .parse_join(&TypeName::from("core.Page"), "blogpost__featuredpost")
            .unwrap();
        assert_eq!(join.target(), Some(&TypeName::from("blog.FeaturedPost")));
    }
}
