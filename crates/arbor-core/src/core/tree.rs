// crates/arbor-core/src/core/tree.rs
// ============================================================================
// Module: Arbor Tree Predicates
// Description: Filter constructors for materialized-path tree relations.
// Purpose: Express descendant, ancestor, child, parent, and sibling relations as filters.
// Dependencies: crate::core::{filter, path, record}
// ============================================================================

//! ## Overview
//! Each constructor returns a deferred [`Filter`]; nothing is evaluated until
//! a store runs it. Relations are pure prefix and depth tests over
//! [`TreeNode::path`] and [`TreeNode::depth`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::core::filter::Condition;
use crate::core::filter::Filter;
use crate::core::identifiers::RecordKey;
use crate::core::path::PathSpec;
use crate::core::record::IN_MENU_FIELD;
use crate::core::record::LIVE_FIELD;
use crate::core::record::TreeNode;

// ============================================================================
// SECTION: Relations
// ============================================================================

/// Matches exactly `other`.
#[must_use]
pub fn node(other: &TreeNode) -> Filter {
    Filter::Condition(Condition::KeyEq { key: RecordKey::from(other.id) })
}

/// Matches nodes below `other`, and `other` itself when `inclusive`.
#[must_use]
pub fn descendant_of(other: &TreeNode, inclusive: bool) -> Filter {
    let filter = Filter::Condition(Condition::PathStartsWith { prefix: other.path.clone() })
        .and(Filter::Condition(Condition::DepthGte { depth: other.depth }));
    exclude_unless(filter, other, inclusive)
}

/// Matches direct children of `other`.
#[must_use]
pub fn child_of(other: &TreeNode) -> Filter {
    descendant_of(other, false)
        .and(Filter::Condition(Condition::DepthEq { depth: other.depth.saturating_add(1) }))
}

/// Matches nodes above `other`, and `other` itself when `inclusive`.
#[must_use]
pub fn ancestor_of(spec: &PathSpec, other: &TreeNode, inclusive: bool) -> Filter {
    let paths = spec.ancestor_prefixes(&other.path).into_iter().collect();
    exclude_unless(Filter::Condition(Condition::PathIn { paths }), other, inclusive)
}

/// Matches the parent of `other`; roots have no parent and match nothing.
#[must_use]
pub fn parent_of(spec: &PathSpec, other: &TreeNode) -> Filter {
    let parent = spec.parent_of(&other.path);
    if parent.is_empty() {
        return Filter::nothing();
    }
    Filter::Condition(Condition::PathEq { path: parent })
}

/// Matches nodes sharing `other`'s parent, and `other` itself when `inclusive`.
#[must_use]
pub fn sibling_of(spec: &PathSpec, other: &TreeNode, inclusive: bool) -> Filter {
    let filter = Filter::Condition(Condition::PathStartsWith { prefix: spec.parent_of(&other.path) })
        .and(Filter::Condition(Condition::DepthEq { depth: other.depth }));
    exclude_unless(filter, other, inclusive)
}

/// Matches nodes outside every subtree rooted at a restricted node.
#[must_use]
pub fn public(restricted: &[TreeNode]) -> Filter {
    restricted
        .iter()
        .map(|root| descendant_of(root, true))
        .fold(Filter::nothing(), Filter::or)
        .negate()
}

/// Matches nodes flagged live.
#[must_use]
pub fn live() -> Filter {
    Filter::Condition(Condition::FieldEq { field: LIVE_FIELD.to_string(), value: Value::Bool(true) })
}

/// Matches nodes flagged for display in menus.
#[must_use]
pub fn in_menu() -> Filter {
    Filter::Condition(Condition::FieldEq {
        field: IN_MENU_FIELD.to_string(),
        value: Value::Bool(true),
    })
}

/// Adds an exclusion of `other` unless `inclusive`.
fn exclude_unless(filter: Filter, other: &TreeNode, inclusive: bool) -> Filter {
    if inclusive { filter } else { filter.and(node(other).negate()) }
}
