// crates/arbor-core/src/runtime/query.rs
// ============================================================================
// Module: Arbor Node Query
// Description: Immutable node query values with tree, type, and loading modifiers.
// Purpose: Build deferred tree queries that the engine evaluates against a store.
// Dependencies: crate::core, crate::runtime::type_filter
// ============================================================================

//! ## Overview
//! [`NodeQuery`] is a value: every modifier returns a new query and leaves the
//! receiver untouched, so derived queries never share mutable state. Queries
//! combine with [`NodeQuery::and`] / [`NodeQuery::or`] (also `&` and `|`),
//! which merge filters, type restrictions, and loading flags.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::ops::BitAnd;
use std::ops::BitOr;

use crate::core::filter::Condition;
use crate::core::filter::FieldValue;
use crate::core::filter::Filter;
use crate::core::identifiers::TypeName;
use crate::core::path::PathSpec;
use crate::core::record::FieldRef;
use crate::core::record::JoinPath;
use crate::core::record::TreeNode;
use crate::core::tree;
use crate::core::types::RegistryError;
use crate::core::types::TypeRegistry;
use crate::runtime::type_filter::TypeFilterState;

// ============================================================================
// SECTION: Yield Mode
// ============================================================================

/// How evaluated rows are yielded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldMode {
    /// Generic rows only.
    Generic,
    /// Rows upcast to their most specific registered type.
    Specific,
    /// Stand-ins that load specific data on demand.
    DeferredSpecific,
}

// ============================================================================
// SECTION: Node Query
// ============================================================================

/// Immutable tree query.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeQuery {
    /// Path layout used by ancestor and sibling relations.
    spec: PathSpec,
    /// Row filter.
    filter: Filter,
    /// Type restrictions.
    types: TypeFilterState,
    /// Yield specific instances.
    yield_specific: bool,
    /// Defer loading of specific data.
    defer_specific_fields: bool,
    /// Defer large fields of every candidate type.
    defer_streamfields: bool,
    /// Caller-supplied join directives.
    joins: BTreeSet<JoinPath>,
    /// Caller-supplied deferred fields.
    deferred: BTreeSet<FieldRef>,
    /// Collapse duplicate rows.
    distinct: bool,
    /// Prefetch child ids.
    prefetch_children: bool,
}

impl NodeQuery {
    /// Creates a query matching every node.
    #[must_use]
    pub fn new(spec: PathSpec) -> Self {
        Self {
            spec,
            filter: Filter::everything(),
            types: TypeFilterState::new(),
            yield_specific: false,
            defer_specific_fields: false,
            defer_streamfields: false,
            joins: BTreeSet::new(),
            deferred: BTreeSet::new(),
            distinct: false,
            prefetch_children: false,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Returns the path spec.
    #[must_use]
    pub const fn path_spec(&self) -> &PathSpec {
        &self.spec
    }

    /// Returns the row filter.
    #[must_use]
    pub const fn filter_tree(&self) -> &Filter {
        &self.filter
    }

    /// Returns the type restrictions.
    #[must_use]
    pub const fn type_state(&self) -> &TypeFilterState {
        &self.types
    }

    /// Returns the yield mode.
    #[must_use]
    pub const fn yield_mode(&self) -> YieldMode {
        match (self.yield_specific, self.defer_specific_fields) {
            (false, _) => YieldMode::Generic,
            (true, false) => YieldMode::Specific,
            (true, true) => YieldMode::DeferredSpecific,
        }
    }

    /// Returns true when large candidate fields are deferred.
    #[must_use]
    pub const fn defers_streamfields(&self) -> bool {
        self.defer_streamfields
    }

    /// Returns caller-supplied join directives.
    #[must_use]
    pub const fn joins(&self) -> &BTreeSet<JoinPath> {
        &self.joins
    }

    /// Returns caller-supplied deferred fields.
    #[must_use]
    pub const fn deferred_fields(&self) -> &BTreeSet<FieldRef> {
        &self.deferred
    }

    /// Returns true when duplicate rows collapse.
    #[must_use]
    pub const fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Returns true when child ids are prefetched.
    #[must_use]
    pub const fn prefetches_children(&self) -> bool {
        self.prefetch_children
    }

    // ------------------------------------------------------------------------
    // Generic Filters
    // ------------------------------------------------------------------------

    /// Returns a query also requiring `filter`.
    #[must_use]
    pub fn filter(&self, filter: Filter) -> Self {
        let mut next = self.clone();
        next.filter = next.filter.and(filter);
        next
    }

    /// Returns a query excluding rows matching `filter`.
    #[must_use]
    pub fn exclude(&self, filter: Filter) -> Self {
        self.filter(filter.negate())
    }

    /// Rows whose field equals `value`.
    #[must_use]
    pub fn field_eq(&self, field: &str, value: FieldValue) -> Self {
        self.filter(Filter::Condition(Condition::FieldEq { field: field.to_string(), value }))
    }

    /// Rows whose field differs from `value`.
    #[must_use]
    pub fn not_field_eq(&self, field: &str, value: FieldValue) -> Self {
        self.exclude(Filter::Condition(Condition::FieldEq { field: field.to_string(), value }))
    }

    /// Rows whose string field contains `needle`.
    #[must_use]
    pub fn field_contains(&self, field: &str, needle: &str) -> Self {
        self.filter(Filter::Condition(Condition::FieldContains {
            field: field.to_string(),
            needle: needle.to_string(),
        }))
    }

    // ------------------------------------------------------------------------
    // Tree Relations
    // ------------------------------------------------------------------------

    /// Only `other`; narrows requested types to its specific type when known.
    #[must_use]
    pub fn node(&self, other: &TreeNode, specific_type: Option<&TypeName>) -> Self {
        let mut next = self.filter(tree::node(other));
        if let Some(type_name) = specific_type {
            next.types = next.types.with_requested(BTreeSet::from([type_name.clone()]));
        }
        next
    }

    /// Everything except `other`.
    #[must_use]
    pub fn not_node(&self, other: &TreeNode) -> Self {
        self.exclude(tree::node(other))
    }

    /// Descendants of `other`.
    #[must_use]
    pub fn descendant_of(&self, other: &TreeNode, inclusive: bool) -> Self {
        self.filter(tree::descendant_of(other, inclusive))
    }

    /// Everything outside the descendants of `other`.
    #[must_use]
    pub fn not_descendant_of(&self, other: &TreeNode, inclusive: bool) -> Self {
        self.exclude(tree::descendant_of(other, inclusive))
    }

    /// `root` and its descendants.
    #[must_use]
    pub fn in_subtree_of(&self, root: &TreeNode) -> Self {
        self.descendant_of(root, true)
    }

    /// Direct children of `other`.
    #[must_use]
    pub fn child_of(&self, other: &TreeNode) -> Self {
        self.filter(tree::child_of(other))
    }

    /// Everything except the direct children of `other`.
    #[must_use]
    pub fn not_child_of(&self, other: &TreeNode) -> Self {
        self.exclude(tree::child_of(other))
    }

    /// Ancestors of `other`.
    #[must_use]
    pub fn ancestor_of(&self, other: &TreeNode, inclusive: bool) -> Self {
        self.filter(tree::ancestor_of(&self.spec, other, inclusive))
    }

    /// Everything except the ancestors of `other`.
    #[must_use]
    pub fn not_ancestor_of(&self, other: &TreeNode, inclusive: bool) -> Self {
        self.exclude(tree::ancestor_of(&self.spec, other, inclusive))
    }

    /// The parent of `other`.
    #[must_use]
    pub fn parent_of(&self, other: &TreeNode) -> Self {
        self.filter(tree::parent_of(&self.spec, other))
    }

    /// Everything except the parent of `other`.
    #[must_use]
    pub fn not_parent_of(&self, other: &TreeNode) -> Self {
        self.exclude(tree::parent_of(&self.spec, other))
    }

    /// Siblings of `other`.
    #[must_use]
    pub fn sibling_of(&self, other: &TreeNode, inclusive: bool) -> Self {
        self.filter(tree::sibling_of(&self.spec, other, inclusive))
    }

    /// Everything except the siblings of `other`.
    #[must_use]
    pub fn not_sibling_of(&self, other: &TreeNode, inclusive: bool) -> Self {
        self.exclude(tree::sibling_of(&self.spec, other, inclusive))
    }

    /// Live nodes.
    #[must_use]
    pub fn live(&self) -> Self {
        self.filter(tree::live())
    }

    /// Nodes that are not live.
    #[must_use]
    pub fn not_live(&self) -> Self {
        self.exclude(tree::live())
    }

    /// Nodes shown in menus.
    #[must_use]
    pub fn in_menu(&self) -> Self {
        self.filter(tree::in_menu())
    }

    /// Nodes hidden from menus.
    #[must_use]
    pub fn not_in_menu(&self) -> Self {
        self.exclude(tree::in_menu())
    }

    /// Nodes outside every subtree rooted at a restricted node.
    #[must_use]
    pub fn public(&self, restricted: &[TreeNode]) -> Self {
        self.filter(tree::public(restricted))
    }

    /// Nodes inside some subtree rooted at a restricted node.
    #[must_use]
    pub fn not_public(&self, restricted: &[TreeNode]) -> Self {
        self.exclude(tree::public(restricted))
    }

    // ------------------------------------------------------------------------
    // Type Restrictions
    // ------------------------------------------------------------------------

    /// Nodes of the given types or any of their concrete subtypes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownType`] when a type is not registered.
    pub fn of_type(&self, registry: &TypeRegistry, types: &[TypeName]) -> Result<Self, RegistryError> {
        let resolved = registry.concrete_subtypes(types)?;
        let mut next = self.filter(type_filter(&resolved));
        next.types = next.types.with_requested(resolved);
        Ok(next)
    }

    /// Nodes not of the given types or any of their concrete subtypes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownType`] when a type is not registered.
    pub fn not_type(
        &self,
        registry: &TypeRegistry,
        types: &[TypeName],
    ) -> Result<Self, RegistryError> {
        let resolved = registry.concrete_subtypes(types)?;
        let mut next = self.exclude(type_filter(&resolved));
        next.types = next.types.with_excluded(resolved);
        Ok(next)
    }

    /// Nodes whose stored type is exactly one of the given types.
    #[must_use]
    pub fn exact_type(&self, types: &[TypeName]) -> Self {
        let exact: BTreeSet<TypeName> = types.iter().cloned().collect();
        let mut next = self.filter(type_filter(&exact));
        next.types = next.types.with_requested(exact);
        next
    }

    /// Nodes whose stored type is none of the given types.
    #[must_use]
    pub fn not_exact_type(&self, types: &[TypeName]) -> Self {
        let exact: BTreeSet<TypeName> = types.iter().cloned().collect();
        let mut next = self.exclude(type_filter(&exact));
        next.types = next.types.with_excluded(exact);
        next
    }

    // ------------------------------------------------------------------------
    // Loading Modifiers
    // ------------------------------------------------------------------------

    /// Yields rows upcast to their most specific type.
    #[must_use]
    pub fn specific(&self) -> Self {
        let mut next = self.clone();
        next.yield_specific = true;
        next.defer_specific_fields = false;
        next
    }

    /// Yields stand-ins that load specific data on demand.
    #[must_use]
    pub fn specific_deferred(&self) -> Self {
        let mut next = self.clone();
        next.yield_specific = true;
        next.defer_specific_fields = true;
        next
    }

    /// Yields generic rows.
    #[must_use]
    pub fn generic(&self) -> Self {
        let mut next = self.clone();
        next.yield_specific = false;
        next.defer_specific_fields = false;
        next
    }

    /// Defers the large fields of every candidate type.
    #[must_use]
    pub fn defer_streamfields(&self) -> Self {
        let mut next = self.clone();
        next.defer_streamfields = true;
        next
    }

    /// Adds a join directive.
    #[must_use]
    pub fn select_related(&self, join: JoinPath) -> Self {
        let mut next = self.clone();
        next.joins.insert(join);
        next
    }

    /// Leaves fields unloaded.
    #[must_use]
    pub fn defer<I>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = FieldRef>,
    {
        let mut next = self.clone();
        next.deferred.extend(fields);
        next
    }

    /// Collapses duplicate rows.
    #[must_use]
    pub fn distinct(&self) -> Self {
        let mut next = self.clone();
        next.distinct = true;
        next
    }

    /// Prefetches child node ids.
    #[must_use]
    pub fn prefetch_children(&self) -> Self {
        let mut next = self.clone();
        next.prefetch_children = true;
        next
    }

    // ------------------------------------------------------------------------
    // Combination
    // ------------------------------------------------------------------------

    /// Rows matched by both queries.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        let mut next = self.merged_flags(other);
        next.filter = self.filter.clone().and(other.filter.clone());
        next.types = self.types.intersect(&other.types);
        next
    }

    /// Rows matched by either query.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        let mut next = self.merged_flags(other);
        next.filter = self.filter.clone().or(other.filter.clone());
        next.types = self.types.union(&other.types);
        next
    }

    /// Copies `self` with loading flags and directives merged from `other`.
    fn merged_flags(&self, other: &Self) -> Self {
        let mut next = self.clone();
        next.yield_specific |= other.yield_specific;
        next.defer_specific_fields |= other.defer_specific_fields;
        next.defer_streamfields |= other.defer_streamfields;
        next.distinct |= other.distinct;
        next.prefetch_children |= other.prefetch_children;
        next.joins.extend(other.joins.iter().cloned());
        next.deferred.extend(other.deferred.iter().cloned());
        next
    }
}

/// Builds a content-type membership filter.
fn type_filter(types: &BTreeSet<TypeName>) -> Filter {
    Filter::Condition(Condition::TypeIn { types: types.clone() })
}

impl BitAnd for &NodeQuery {
    type Output = NodeQuery;

    fn bitand(self, rhs: Self) -> NodeQuery {
        self.and(rhs)
    }
}

impl BitOr for &NodeQuery {
    type Output = NodeQuery;

    fn bitor(self, rhs: Self) -> NodeQuery {
        self.or(rhs)
    }
}

impl BitAnd for NodeQuery {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self::and(&self, &rhs)
    }
}

impl BitOr for NodeQuery {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::or(&self, &rhs)
    }
}
