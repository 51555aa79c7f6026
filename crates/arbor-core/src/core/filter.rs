// crates/arbor-core/src/core/filter.rs
// ============================================================================
// Module: Arbor Filter Algebra
// Description: Composable boolean filter trees over record conditions.
// Purpose: Represent deferred row predicates that stores compile or evaluate.
// Dependencies: serde, serde_json, smallvec
// ============================================================================

//! ## Overview
//! A [`Filter`] is an executable predicate, never a materialized list of rows.
//! Stores either compile it into their native query language or evaluate it
//! row-by-row through [`Filter::matches`]. The logical operators follow the
//! usual identities: an empty `And` is satisfied, an empty `Or` is not.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;

use crate::core::identifiers::ContentTypeId;
use crate::core::identifiers::PrimaryKeyKind;
use crate::core::identifiers::RecordKey;
use crate::core::identifiers::TenantId;
use crate::core::identifiers::TypeName;
use crate::core::path::TreePath;

// ============================================================================
// SECTION: Field Values
// ============================================================================

/// Field value stored on a record.
pub type FieldValue = Value;

// ============================================================================
// SECTION: Conditions
// ============================================================================

/// Atomic row condition.
///
/// Tree conditions match nothing on records without a path, and tenant
/// conditions match nothing on records without a native tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Condition {
    /// Primary key equals the value.
    KeyEq {
        /// Expected key.
        key: RecordKey,
    },
    /// Primary key is one of the values.
    KeyIn {
        /// Accepted keys.
        keys: BTreeSet<RecordKey>,
    },
    /// Path equals the value.
    PathEq {
        /// Expected path.
        path: TreePath,
    },
    /// Path is one of the values.
    PathIn {
        /// Accepted paths.
        paths: BTreeSet<TreePath>,
    },
    /// Path starts with the prefix.
    PathStartsWith {
        /// Required prefix.
        prefix: TreePath,
    },
    /// Depth equals the value.
    DepthEq {
        /// Expected depth.
        depth: u32,
    },
    /// Depth is at least the value.
    DepthGte {
        /// Minimum depth.
        depth: u32,
    },
    /// Content type is one of the named types.
    TypeIn {
        /// Accepted type names.
        types: BTreeSet<TypeName>,
    },
    /// Record is native to the tenant.
    NativeTenant {
        /// Owning tenant.
        tenant: TenantId,
    },
    /// Record is the target of a share link to the recipient.
    SharedWith {
        /// Receiving tenant.
        recipient: TenantId,
        /// Record type the share links point at.
        model: TypeName,
        /// Key kind used to coerce link object ids.
        key_kind: PrimaryKeyKind,
    },
    /// Field equals the value (a missing field compares as null).
    FieldEq {
        /// Field name.
        field: String,
        /// Expected value.
        value: FieldValue,
    },
    /// String field contains the needle (case-sensitive).
    FieldContains {
        /// Field name.
        field: String,
        /// Required substring.
        needle: String,
    },
}

// ============================================================================
// SECTION: Filter Tree
// ============================================================================

/// Boolean filter tree with [`Condition`] leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// All children must match. Empty `And` matches every row.
    And(SmallVec<[Box<Self>; 4]>),
    /// At least one child must match. Empty `Or` matches no row.
    Or(SmallVec<[Box<Self>; 4]>),
    /// Negates the child.
    Not(Box<Self>),
    /// Atomic condition.
    Condition(Condition),
}

impl Default for Filter {
    fn default() -> Self {
        Self::everything()
    }
}

impl From<Condition> for Filter {
    fn from(value: Condition) -> Self {
        Self::Condition(value)
    }
}

impl Filter {
    /// Returns a filter that matches every row.
    #[must_use]
    pub fn everything() -> Self {
        Self::And(SmallVec::new())
    }

    /// Returns a filter that matches no row.
    #[must_use]
    pub fn nothing() -> Self {
        Self::Or(SmallVec::new())
    }

    /// Returns true when this filter trivially matches every row.
    #[must_use]
    pub fn is_everything(&self) -> bool {
        matches!(self, Self::And(children) if children.is_empty())
    }

    /// Combines two filters with logical AND, flattening nested conjunctions.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        let mut children = SmallVec::new();
        for filter in [self, other] {
            match filter {
                Self::And(inner) => children.extend(inner),
                filter => children.push(Box::new(filter)),
            }
        }
        Self::And(children)
    }

    /// Combines two filters with logical OR, flattening nested disjunctions.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        let mut children = SmallVec::new();
        for filter in [self, other] {
            match filter {
                Self::Or(inner) => children.extend(inner),
                filter => children.push(Box::new(filter)),
            }
        }
        Self::Or(children)
    }

    /// Negates the filter, unwrapping double negation.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::Not(inner) => *inner,
            filter => Self::Not(Box::new(filter)),
        }
    }

    /// Evaluates the filter against one record.
    pub fn matches<R, C>(&self, record: &R, context: &C) -> bool
    where
        R: RecordView + ?Sized,
        C: MatchContext + ?Sized,
    {
        match self {
            Self::And(children) => children.iter().all(|child| child.matches(record, context)),
            Self::Or(children) => children.iter().any(|child| child.matches(record, context)),
            Self::Not(child) => !child.matches(record, context),
            Self::Condition(condition) => condition_matches(condition, record, context),
        }
    }
}

// ============================================================================
// SECTION: Evaluation Seams
// ============================================================================

/// Read-only view of a record for in-process filter evaluation.
pub trait RecordView {
    /// Returns the record primary key.
    fn record_key(&self) -> RecordKey;

    /// Returns the tree path, when the record is a tree node.
    fn tree_path(&self) -> Option<&TreePath>;

    /// Returns the tree depth, when the record is a tree node.
    fn tree_depth(&self) -> Option<u32>;

    /// Returns the record content type.
    fn content_type_id(&self) -> ContentTypeId;

    /// Returns the native tenant, when the record is a tenant member.
    fn native_tenant(&self) -> Option<TenantId>;

    /// Returns a field value by name.
    fn field(&self, name: &str) -> Option<&FieldValue>;
}

/// Store-side lookups needed to evaluate type and sharing conditions.
pub trait MatchContext {
    /// Resolves a content type id to its registered type name.
    fn type_name_of(&self, id: ContentTypeId) -> Option<TypeName>;

    /// Returns the keys shared with `recipient` for `model`, coerced to `kind`.
    ///
    /// Link object ids that do not parse as `kind` are skipped.
    fn shared_keys(
        &self,
        recipient: TenantId,
        model: &TypeName,
        kind: PrimaryKeyKind,
    ) -> BTreeSet<RecordKey>;
}

/// Evaluates one condition against a record.
fn condition_matches<R, C>(condition: &Condition, record: &R, context: &C) -> bool
where
    R: RecordView + ?Sized,
    C: MatchContext + ?Sized,
{
    match condition {
        Condition::KeyEq { key } => record.record_key() == *key,
        Condition::KeyIn { keys } => keys.contains(&record.record_key()),
        Condition::PathEq { path } => record.tree_path() == Some(path),
        Condition::PathIn { paths } => record.tree_path().is_some_and(|own| paths.contains(own)),
        Condition::PathStartsWith { prefix } => {
            record.tree_path().is_some_and(|own| own.starts_with(prefix))
        }
        Condition::DepthEq { depth } => record.tree_depth() == Some(*depth),
        Condition::DepthGte { depth } => record.tree_depth().is_some_and(|own| own >= *depth),
        Condition::TypeIn { types } => context
            .type_name_of(record.content_type_id())
            .is_some_and(|name| types.contains(&name)),
        Condition::NativeTenant { tenant } => record.native_tenant() == Some(*tenant),
        Condition::SharedWith { recipient, model, key_kind } => {
            let linked = context.shared_keys(*recipient, model, *key_kind);
            let own_type = context.type_name_of(record.content_type_id());
            own_type.as_ref() == Some(model) && linked.contains(&record.record_key())
        }
        Condition::FieldEq { field, value } => {
            record.field(field).unwrap_or(&FieldValue::Null) == value
        }
        Condition::FieldContains { field, needle } => record
            .field(field)
            .and_then(FieldValue::as_str)
            .is_some_and(|text| text.contains(needle.as_str())),
    }
}
