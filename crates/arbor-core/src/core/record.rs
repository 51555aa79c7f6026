// crates/arbor-core/src/core/record.rs
// ============================================================================
// Module: Arbor Records
// Description: Tree node, subclass row, member, and fetch request structures.
// Purpose: Define the record shapes exchanged between the runtime and stores.
// Dependencies: serde, crate::core::{filter, identifiers, path}
// ============================================================================

//! ## Overview
//! Generic tree rows ([`TreeNode`]) carry the columns every node shares.
//! Subtype-specific columns live in [`SubclassRow`]s keyed by type name and
//! are reached through explicit [`JoinPath`] steps. A [`FetchRequest`] bundles
//! the filter, join directives, deferred fields, and limits for one round trip.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::filter::FieldValue;
use crate::core::filter::Filter;
use crate::core::filter::RecordView;
use crate::core::identifiers::ContentTypeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RecordKey;
use crate::core::identifiers::TenantId;
use crate::core::identifiers::TypeName;
use crate::core::path::TreePath;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Delimiter between join steps in the display form of a [`JoinPath`].
pub const JOIN_DELIMITER: &str = "__";

/// Relation name under which child node ids are prefetched.
pub const CHILDREN_RELATION: &str = "children";

/// Field holding the publication flag.
pub const LIVE_FIELD: &str = "live";

/// Field holding the menu visibility flag.
pub const IN_MENU_FIELD: &str = "show_in_menus";

// ============================================================================
// SECTION: Field Maps
// ============================================================================

/// Named field values of a record.
pub type FieldMap = BTreeMap<String, FieldValue>;

// ============================================================================
// SECTION: Tree Nodes
// ============================================================================

/// Generic tree row.
///
/// # Invariants
/// - `depth == path.len() / steplen` for the tree's path spec.
/// - Field names listed in `deferred` are absent from `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Node identifier.
    pub id: NodeId,
    /// Materialized path.
    pub path: TreePath,
    /// Tree depth (roots are depth 1).
    pub depth: u32,
    /// Stored content type of the node.
    pub content_type_id: ContentTypeId,
    /// Loaded generic field values.
    #[serde(default)]
    pub fields: FieldMap,
    /// Fields intentionally left unloaded.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deferred: BTreeSet<String>,
    /// Eagerly fetched related ids keyed by relation name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prefetched: BTreeMap<String, Vec<NodeId>>,
}

impl RecordView for TreeNode {
    fn record_key(&self) -> RecordKey {
        RecordKey::from(self.id)
    }

    fn tree_path(&self) -> Option<&TreePath> {
        Some(&self.path)
    }

    fn tree_depth(&self) -> Option<u32> {
        Some(self.depth)
    }

    fn content_type_id(&self) -> ContentTypeId {
        self.content_type_id
    }

    fn native_tenant(&self) -> Option<TenantId> {
        None
    }

    fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Subtype-specific columns for one node and one type in its hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubclassRow {
    /// Type owning these columns.
    pub type_name: TypeName,
    /// Loaded subtype field values.
    #[serde(default)]
    pub fields: FieldMap,
    /// Subtype fields intentionally left unloaded.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deferred: BTreeSet<String>,
}

impl SubclassRow {
    /// Creates a subclass row.
    #[must_use]
    pub fn new(type_name: TypeName, fields: FieldMap) -> Self {
        Self { type_name, fields, deferred: BTreeSet::new() }
    }
}

/// Generic row plus every subclass row reached by the request's join directives.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedNode {
    /// Generic row.
    pub node: TreeNode,
    /// Joined subclass rows keyed by type name.
    pub joined: BTreeMap<TypeName, SubclassRow>,
}

/// Input for allocating a new tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    /// Stored content type.
    pub content_type_id: ContentTypeId,
    /// Generic field values.
    pub fields: FieldMap,
}

// ============================================================================
// SECTION: Join Paths
// ============================================================================

/// Ordered join steps from the base type down to a concrete subtype.
///
/// # Invariants
/// - Non-empty for every registered subtype; the last step is the subtype itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JoinPath(Vec<TypeName>);

impl JoinPath {
    /// Creates a join path from ordered steps.
    #[must_use]
    pub const fn new(steps: Vec<TypeName>) -> Self {
        Self(steps)
    }

    /// Returns the ordered steps.
    #[must_use]
    pub fn steps(&self) -> &[TypeName] {
        &self.0
    }

    /// Returns the final step type.
    #[must_use]
    pub fn target(&self) -> Option<&TypeName> {
        self.0.last()
    }

    /// Returns a path extended by one step.
    #[must_use]
    pub fn child(&self, step: TypeName) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        Self(steps)
    }

    /// Returns every non-empty prefix of this path, shortest first.
    #[must_use]
    pub fn prefixes(&self) -> Vec<Self> {
        (1 ..= self.0.len()).map(|end| Self(self.0[.. end].to_vec())).collect()
    }
}

impl fmt::Display for JoinPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(TypeName::step_name).collect();
        f.write_str(&names.join(JOIN_DELIMITER))
    }
}

/// Field reference, optionally reached through a join path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    /// Join path to the owning subclass row; `None` for generic columns.
    pub join: Option<JoinPath>,
    /// Field name.
    pub field: String,
}

impl FieldRef {
    /// References a generic column.
    #[must_use]
    pub fn generic(field: impl Into<String>) -> Self {
        Self { join: None, field: field.into() }
    }

    /// References a subclass column through a join path.
    #[must_use]
    pub fn joined(join: JoinPath, field: impl Into<String>) -> Self {
        Self { join: Some(join), field: field.into() }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.join {
            Some(join) => write!(f, "{join}{JOIN_DELIMITER}{}", self.field),
            None => f.write_str(&self.field),
        }
    }
}

// ============================================================================
// SECTION: Fetch Requests
// ============================================================================

/// One store round trip.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchRequest {
    /// Row filter.
    pub filter: Filter,
    /// Join directives; every prefix of each path is joined.
    pub joins: BTreeSet<JoinPath>,
    /// Fields left unloaded.
    pub deferred: BTreeSet<FieldRef>,
    /// Collapse duplicate rows.
    pub distinct: bool,
    /// Prefetch child node ids under [`CHILDREN_RELATION`].
    pub prefetch_children: bool,
    /// Maximum number of rows, in path order.
    pub limit: Option<usize>,
}

impl FetchRequest {
    /// Creates a request for the filter with no joins or deferrals.
    #[must_use]
    pub fn for_filter(filter: Filter) -> Self {
        Self { filter, ..Self::default() }
    }

    /// Returns every join step type named by the request.
    #[must_use]
    pub fn joined_types(&self) -> BTreeSet<TypeName> {
        self.joins.iter().flat_map(|join| join.steps().iter().cloned()).collect()
    }

    /// Returns the generic fields left unloaded.
    #[must_use]
    pub fn deferred_generic(&self) -> BTreeSet<String> {
        self.deferred.iter().filter(|field| field.join.is_none()).map(|f| f.field.clone()).collect()
    }

    /// Returns the subclass fields left unloaded for one type.
    #[must_use]
    pub fn deferred_for(&self, type_name: &TypeName) -> BTreeSet<String> {
        self.deferred
            .iter()
            .filter(|field| field.join.as_ref().and_then(JoinPath::target) == Some(type_name))
            .map(|field| field.field.clone())
            .collect()
    }

    /// Strips deferred fields from a fetched row set.
    pub fn apply_deferrals(&self, fetched: &mut FetchedNode) {
        for field in self.deferred_generic() {
            if fetched.node.fields.remove(&field).is_some() {
                fetched.node.deferred.insert(field);
            }
        }
        for row in fetched.joined.values_mut() {
            for field in self.deferred_for(&row.type_name) {
                if row.fields.remove(&field).is_some() {
                    row.deferred.insert(field);
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Tenant Members
// ============================================================================

/// Record owned by exactly one native tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Record content type.
    pub content_type_id: ContentTypeId,
    /// Record primary key.
    pub key: RecordKey,
    /// Owning tenant.
    pub native_tenant: TenantId,
    /// Field values.
    #[serde(default)]
    pub fields: FieldMap,
}

impl RecordView for MemberRecord {
    fn record_key(&self) -> RecordKey {
        self.key.clone()
    }

    fn tree_path(&self) -> Option<&TreePath> {
        None
    }

    fn tree_depth(&self) -> Option<u32> {
        None
    }

    fn content_type_id(&self) -> ContentTypeId {
        self.content_type_id
    }

    fn native_tenant(&self) -> Option<TenantId> {
        Some(self.native_tenant)
    }

    fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}
