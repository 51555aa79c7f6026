// crates/arbor-core/src/runtime/upcast.rs
// ============================================================================
// Module: Arbor Specific-Type Upcasting
// Description: Upgrades generic tree rows to their most specific registered type.
// Purpose: Plan join directives and convert fetched rows into specific items.
// Dependencies: serde, tracing, crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Upcasting turns a generic [`TreeNode`] into a [`SpecificNode`] by walking
//! the subtype's [`JoinPath`] through the subclass rows fetched alongside it.
//! Failures never abort an evaluation: the row degrades to its generic (or
//! partially traversed) form and an [`UpcastError`] is recorded in the
//! evaluation's [`UpcastErrorList`], which is reported as a warning.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::core::filter::FieldValue;
use crate::core::identifiers::ContentTypeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::TypeName;
use crate::core::path::TreePath;
use crate::core::record::FetchedNode;
use crate::core::record::FieldMap;
use crate::core::record::FieldRef;
use crate::core::record::JoinPath;
use crate::core::record::SubclassRow;
use crate::core::record::TreeNode;
use crate::core::types::SpecificLookups;
use crate::core::types::TypeRegistry;
use crate::interfaces::TreeStore;
use crate::runtime::engine::QueryError;

// ============================================================================
// SECTION: Upcast Errors
// ============================================================================

/// Reason a row could not be upcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UpcastCode {
    /// The stored content type is not a registered subtype.
    #[serde(rename = "SPECIFIC_CLASS_UNAVAILABLE")]
    SpecificClassUnavailable,
    /// A subclass row along the join path is missing.
    #[serde(rename = "SPECIFIC_DATA_UNAVAILABLE")]
    SpecificDataUnavailable,
}

impl UpcastCode {
    /// Returns the stable code string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SpecificClassUnavailable => "SPECIFIC_CLASS_UNAVAILABLE",
            Self::SpecificDataUnavailable => "SPECIFIC_DATA_UNAVAILABLE",
        }
    }
}

impl fmt::Display for UpcastCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row that could not be fully upcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcastError {
    /// Affected node.
    pub node_id: NodeId,
    /// Path of the affected node.
    pub path: TreePath,
    /// Stored content type of the affected node.
    pub content_type_id: ContentTypeId,
    /// Failure reason.
    pub code: UpcastCode,
}

impl fmt::Display for UpcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node {} at {} (content type {}): {}",
            self.node_id, self.path, self.content_type_id, self.code
        )
    }
}

/// Upcast errors accumulated during one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct UpcastErrorList {
    /// Recorded errors in row order.
    errors: Vec<UpcastError>,
}

impl UpcastErrorList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Records an error for `node`.
    pub fn add(&mut self, node: &TreeNode, code: UpcastCode) {
        self.errors.push(UpcastError {
            node_id: node.id,
            path: node.path.clone(),
            content_type_id: node.content_type_id,
            code,
        });
    }

    /// Returns true when nothing was recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of recorded errors.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterates over recorded errors.
    pub fn iter(&self) -> impl Iterator<Item = &UpcastError> {
        self.errors.iter()
    }

    /// Emits one warning summarizing the errors, if any.
    pub fn warn(&self) {
        if self.errors.is_empty() {
            return;
        }
        tracing::warn!(count = self.errors.len(), errors = %self, "upcast incomplete");
    }
}

impl fmt::Display for UpcastErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("[]");
        }
        write!(
            f,
            "a recently evaluated node query could only return generic nodes for some items, \
             because of the following errors:"
        )?;
        for error in &self.errors {
            write!(f, "\n  {error}")?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Items
// ============================================================================

/// Node upgraded to its most specific reachable type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecificNode {
    /// Specific type of the instance.
    pub type_name: TypeName,
    /// Node identifier.
    pub id: NodeId,
    /// Materialized path.
    pub path: TreePath,
    /// Tree depth.
    pub depth: u32,
    /// Stored content type.
    pub content_type_id: ContentTypeId,
    /// Subtype fields merged over generic fields.
    pub fields: FieldMap,
    /// Fields left unloaded.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub deferred: BTreeSet<String>,
    /// Prefetched related ids copied from the generic row.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub prefetched: BTreeMap<String, Vec<NodeId>>,
}

/// Stand-in for a specific node whose subtype data is loaded on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeferredSpecific {
    /// Specific type the node resolves to.
    pub type_name: TypeName,
    /// Join path used to load subtype data.
    pub join: JoinPath,
    /// Generic row.
    pub node: TreeNode,
}

impl DeferredSpecific {
    /// Loads the subtype data and returns the specific node.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::SpecificDataUnavailable`] when a join step row is missing and
    /// [`QueryError::Store`] when the store fails.
    pub fn load<S>(&self, store: &S) -> Result<SpecificNode, QueryError>
    where
        S: TreeStore + ?Sized,
    {
        let rows = store.load_subclass_rows(self.node.id, &self.join)?;
        if rows.len() < self.join.steps().len() {
            return Err(QueryError::SpecificDataUnavailable {
                node: self.node.id,
                join: self.join.to_string(),
            });
        }
        let rows: Vec<&SubclassRow> = rows.iter().collect();
        Ok(upgrade(self.node.clone(), &rows, self.type_name.clone()))
    }
}

/// Evaluated row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeItem {
    /// Generic row.
    Generic(TreeNode),
    /// Upcast row.
    Specific(SpecificNode),
    /// Lazily upcast row.
    Deferred(DeferredSpecific),
}

impl NodeItem {
    /// Returns the node identifier.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        match self {
            Self::Generic(node) | Self::Deferred(DeferredSpecific { node, .. }) => node.id,
            Self::Specific(node) => node.id,
        }
    }

    /// Returns the materialized path.
    #[must_use]
    pub const fn path(&self) -> &TreePath {
        match self {
            Self::Generic(node) | Self::Deferred(DeferredSpecific { node, .. }) => &node.path,
            Self::Specific(node) => &node.path,
        }
    }

    /// Returns the specific type, when known.
    #[must_use]
    pub const fn type_name(&self) -> Option<&TypeName> {
        match self {
            Self::Generic(_) => None,
            Self::Specific(node) => Some(&node.type_name),
            Self::Deferred(deferred) => Some(&deferred.type_name),
        }
    }

    /// Returns a loaded field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        match self {
            Self::Generic(node) | Self::Deferred(DeferredSpecific { node, .. }) => {
                node.fields.get(name)
            }
            Self::Specific(node) => node.fields.get(name),
        }
    }

    /// Returns the specific node, when upcast.
    #[must_use]
    pub const fn as_specific(&self) -> Option<&SpecificNode> {
        match self {
            Self::Specific(node) => Some(node),
            Self::Generic(_) | Self::Deferred(_) => None,
        }
    }
}

// ============================================================================
// SECTION: Planning
// ============================================================================

/// Join plan for one specific evaluation.
#[derive(Debug, Clone)]
pub(crate) struct UpcastPlan {
    /// Base type of the tree.
    base: TypeName,
    /// Every registered concrete subtype of the base.
    all: BTreeMap<TypeName, JoinPath>,
    /// Subtypes allowed by the query's type restrictions.
    candidates: BTreeSet<TypeName>,
}

impl UpcastPlan {
    /// Builds a plan from registry lookups and the allowed candidate set.
    pub(crate) fn new(base: TypeName, lookups: &SpecificLookups, candidates: BTreeSet<TypeName>) -> Self {
        Self { base, all: lookups.clone(), candidates }
    }

    /// Returns true when no row can be upgraded.
    pub(crate) fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Returns join directives for every candidate.
    pub(crate) fn joins(&self) -> BTreeSet<JoinPath> {
        self.candidates.iter().filter_map(|name| self.all.get(name).cloned()).collect()
    }

    /// Returns every type whose content-type id must be resolved.
    pub(crate) fn resolvable_types(&self) -> BTreeSet<TypeName> {
        let mut names: BTreeSet<TypeName> = self.all.keys().cloned().collect();
        names.insert(self.base.clone());
        names
    }

    /// Returns large fields to defer: the base's generic ones plus each candidate's via its join.
    pub(crate) fn streamfield_deferrals(&self, registry: &TypeRegistry) -> BTreeSet<FieldRef> {
        let mut fields: BTreeSet<FieldRef> =
            registry.deferrable_fields(&self.base).into_iter().map(FieldRef::generic).collect();
        for name in &self.candidates {
            if let Some(join) = self.all.get(name) {
                fields.extend(
                    registry
                        .deferrable_fields(name)
                        .into_iter()
                        .map(|field| FieldRef::joined(join.clone(), field)),
                );
            }
        }
        fields
    }

    /// Converts fetched rows into specific items, recording upcast errors.
    pub(crate) fn upgrade_rows(
        &self,
        rows: Vec<FetchedNode>,
        types_by_id: &BTreeMap<ContentTypeId, TypeName>,
        errors: &mut UpcastErrorList,
    ) -> Vec<NodeItem> {
        rows.into_iter()
            .map(|fetched| {
                let Some(type_name) = types_by_id.get(&fetched.node.content_type_id) else {
                    errors.add(&fetched.node, UpcastCode::SpecificClassUnavailable);
                    return NodeItem::Generic(fetched.node);
                };
                if *type_name == self.base || !self.candidates.contains(type_name) {
                    return NodeItem::Generic(fetched.node);
                }
                match self.all.get(type_name) {
                    Some(join) => traverse(fetched, join, errors),
                    None => {
                        errors.add(&fetched.node, UpcastCode::SpecificClassUnavailable);
                        NodeItem::Generic(fetched.node)
                    }
                }
            })
            .collect()
    }

    /// Converts fetched rows into deferred stand-ins, recording upcast errors.
    pub(crate) fn defer_rows(
        &self,
        rows: Vec<FetchedNode>,
        types_by_id: &BTreeMap<ContentTypeId, TypeName>,
        errors: &mut UpcastErrorList,
    ) -> Vec<NodeItem> {
        rows.into_iter()
            .map(|fetched| {
                let node = fetched.node;
                let resolved = types_by_id
                    .get(&node.content_type_id)
                    .map(|name| (name, self.all.get(name)));
                match resolved {
                    Some((name, _)) if *name == self.base => NodeItem::Generic(node),
                    Some((name, Some(join))) => NodeItem::Deferred(DeferredSpecific {
                        type_name: name.clone(),
                        join: join.clone(),
                        node,
                    }),
                    Some((_, None)) | None => {
                        errors.add(&node, UpcastCode::SpecificClassUnavailable);
                        NodeItem::Generic(node)
                    }
                }
            })
            .collect()
    }
}

/// Walks the join steps of one row, degrading on the first missing step.
fn traverse(fetched: FetchedNode, join: &JoinPath, errors: &mut UpcastErrorList) -> NodeItem {
    let Some(target) = join.target() else {
        return NodeItem::Generic(fetched.node);
    };
    let mut reached: Vec<&SubclassRow> = Vec::with_capacity(join.steps().len());
    for step in join.steps() {
        if let Some(row) = fetched.joined.get(step) {
            reached.push(row);
            continue;
        }
        errors.add(&fetched.node, UpcastCode::SpecificDataUnavailable);
        return match reached.len().checked_sub(1).and_then(|last| join.steps().get(last)) {
            Some(partial) => NodeItem::Specific(upgrade(fetched.node, &reached, partial.clone())),
            None => NodeItem::Generic(fetched.node),
        };
    }
    NodeItem::Specific(upgrade(fetched.node, &reached, target.clone()))
}

/// Builds a specific node from subclass rows, then copies absent generic attributes.
fn upgrade(node: TreeNode, rows: &[&SubclassRow], type_name: TypeName) -> SpecificNode {
    let mut fields = FieldMap::new();
    let mut deferred = BTreeSet::new();
    for row in rows {
        fields.extend(row.fields.iter().map(|(key, value)| (key.clone(), value.clone())));
        deferred.extend(row.deferred.iter().cloned());
    }
    for (key, value) in node.fields {
        fields.entry(key).or_insert(value);
    }
    deferred.extend(node.deferred.into_iter().filter(|field| !fields.contains_key(field)));
    SpecificNode {
        type_name,
        id: node.id,
        path: node.path,
        depth: node.depth,
        content_type_id: node.content_type_id,
        fields,
        deferred,
        prefetched: node.prefetched,
    }
}
