// crates/arbor-core/tests/common_ancestor.rs
// ============================================================================
// Module: Common Ancestor Tests
// Description: Tests for first_common_ancestor resolution.
// Purpose: Validate self inclusion, root fallback, and strict-mode failures.
// Dependencies: arbor-core
// ============================================================================
//! ## Overview
//! Resolves the deepest shared ancestor of query results in the fixture tree
//! and in a two-root forest.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use arbor_core::InMemoryStore;
use arbor_core::PathSpec;
use arbor_core::QueryError;
use arbor_core::TreeEngine;
use common::PAGE;
use common::TreeFixture;
use common::add_node;
use common::page_fields;
use common::registry;
use common::ty;

/// Verifies a single node with `include_self` is its own common ancestor.
#[test]
fn single_node_with_self_returns_itself() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let query = fx.engine.query().node(&fx.post, None);
    let ancestor = fx.engine.first_common_ancestor(&query, true, false)?;
    assert_eq!(ancestor.id, fx.post.id);
    Ok(())
}

/// Verifies a single node without `include_self` resolves to its parent.
#[test]
fn single_node_without_self_returns_parent() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let query = fx.engine.query().node(&fx.post, None);
    let ancestor = fx.engine.first_common_ancestor(&query, false, true)?;
    assert_eq!(ancestor.id, fx.blog.id);
    Ok(())
}

/// Verifies nodes from disjoint subtrees resolve to the shared parent.
#[test]
fn disjoint_subtrees_resolve_to_shared_parent() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let query = fx.engine.query().node(&fx.featured, None) | fx.engine.query().node(&fx.event, None);
    let ancestor = fx.engine.first_common_ancestor(&query, true, true)?;
    assert_eq!(ancestor.id, fx.home.id);
    Ok(())
}

/// Verifies a parent and its child resolve to the parent when self is included.
#[test]
fn parent_and_child_resolve_to_parent() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let query = fx.engine.query().descendant_of(&fx.blog, true);
    assert_eq!(fx.engine.first_common_ancestor(&query, true, true)?.id, fx.blog.id);
    assert_eq!(fx.engine.first_common_ancestor(&query, false, true)?.id, fx.home.id);
    Ok(())
}

/// Verifies an empty query falls back to the root unless strict.
#[test]
fn empty_query_falls_back_to_root() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let empty = fx.engine.query().child_of(&fx.post);
    assert_eq!(fx.engine.first_common_ancestor(&empty, false, false)?.id, fx.root.id);
    let strict = fx.engine.first_common_ancestor(&empty, false, true);
    assert!(matches!(strict, Err(QueryError::NotFound(_))));
    Ok(())
}

/// Verifies separate roots share no ancestor.
#[test]
fn separate_roots_have_no_common_prefix() -> Result<(), Box<dyn std::error::Error>> {
    let store = InMemoryStore::new(PathSpec::default());
    let first = add_node(&store, None, PAGE, page_fields("first", true, true));
    let second = add_node(&store, None, PAGE, page_fields("second", true, true));
    let engine = TreeEngine::new(store, registry(), ty(PAGE), PathSpec::default());
    let roots = engine.query().child_of(&first) | engine.query().node(&first, None);
    let both = &roots | &engine.query().node(&second, None);

    assert_eq!(engine.first_common_ancestor(&both, true, false)?.id, first.id);
    assert!(matches!(engine.first_common_ancestor(&both, true, true), Err(QueryError::NotFound(_))));
    assert!(matches!(engine.first_common_ancestor(&both, false, true), Err(QueryError::NotFound(_))));
    Ok(())
}
