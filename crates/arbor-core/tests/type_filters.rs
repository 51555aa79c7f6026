// crates/arbor-core/tests/type_filters.rs
// ============================================================================
// Module: Type Filter Tests
// Description: Tests for of_type, exact_type, and type-set combination.
// Purpose: Validate requested and excluded type bookkeeping on queries.
// Dependencies: arbor-core
// ============================================================================
//! ## Overview
//! Checks that type modifiers narrow rows and record the type sets consumed by
//! specific-type evaluation, and that combination never fails.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::collections::BTreeSet;

use arbor_core::NodeId;
use arbor_core::RegistryError;
use arbor_core::TypeName;
use common::ARTICLE;
use common::BLOG_POST;
use common::EVENT;
use common::FEATURED_POST;
use common::HOME;
use common::TreeFixture;
use common::ty;

/// Builds a type set.
fn set(names: &[&str]) -> BTreeSet<TypeName> {
    names.iter().map(|name| ty(name)).collect()
}

/// Verifies `of_type` includes indirect subtypes through abstract parents.
#[test]
fn of_type_includes_indirect_subtypes() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let registry = fx.engine.registry();
    let query = fx.engine.query().of_type(registry, &[ty(ARTICLE)])?;
    assert_eq!(query.type_state().requested(), &set(&[BLOG_POST, FEATURED_POST]));
    let found: Vec<NodeId> = fx.engine.nodes(&query)?.into_iter().map(|node| node.id).collect();
    assert_eq!(found, vec![fx.post.id, fx.featured.id]);
    Ok(())
}

/// Verifies `exact_type` excludes subtypes.
#[test]
fn exact_type_excludes_subtypes() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let query = fx.engine.query().exact_type(&[ty(BLOG_POST)]);
    assert_eq!(query.type_state().requested(), &set(&[BLOG_POST]));
    let found: Vec<NodeId> = fx.engine.nodes(&query)?.into_iter().map(|node| node.id).collect();
    assert_eq!(found, vec![fx.post.id]);
    Ok(())
}

/// Verifies negated type filters accumulate excluded types.
#[test]
fn negated_type_filters_accumulate_exclusions() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let registry = fx.engine.registry();
    let query = fx.engine.query().not_type(registry, &[ty(BLOG_POST)])?.not_exact_type(&[ty(EVENT)]);
    assert_eq!(query.type_state().excluded(), &set(&[BLOG_POST, FEATURED_POST, EVENT]));
    assert!(query.type_state().requested().is_empty());
    let found: Vec<NodeId> = fx.engine.nodes(&query)?.into_iter().map(|node| node.id).collect();
    assert_eq!(found, vec![fx.root.id, fx.home.id, fx.blog.id, fx.events.id]);
    Ok(())
}

/// Verifies intersecting disjoint type filters empties the requested set and the rows.
#[test]
fn intersecting_disjoint_types_yields_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let registry = fx.engine.registry();
    let events = fx.engine.query().of_type(registry, &[ty(EVENT)])?;
    let homes = fx.engine.query().of_type(registry, &[ty(HOME)])?;
    let both = &events & &homes;
    assert!(both.type_state().requested().is_empty());
    assert_eq!(fx.engine.count(&both)?, 0);
    Ok(())
}

/// Verifies union keeps requested types and only shared exclusions.
#[test]
fn union_merges_type_sets() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let registry = fx.engine.registry();
    let left = fx.engine.query().of_type(registry, &[ty(EVENT)])?.not_exact_type(&[ty(HOME)]);
    let right = fx.engine.query().exact_type(&[ty(HOME)]).not_exact_type(&[ty(BLOG_POST)]);
    let either = left.or(&right);
    assert_eq!(either.type_state().requested(), &set(&[EVENT, HOME]));
    assert!(either.type_state().excluded().is_empty());
    let found: Vec<NodeId> = fx.engine.nodes(&either)?.into_iter().map(|node| node.id).collect();
    assert_eq!(found, vec![fx.home.id, fx.event.id]);
    Ok(())
}

/// Verifies modifiers leave the receiver untouched.
#[test]
fn modifiers_return_new_queries() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let base = fx.engine.query();
    let narrowed = base.exact_type(&[ty(EVENT)]).specific();
    assert!(base.type_state().requested().is_empty());
    assert_eq!(base.yield_mode(), arbor_core::YieldMode::Generic);
    assert_eq!(narrowed.yield_mode(), arbor_core::YieldMode::Specific);
    Ok(())
}

/// Verifies unknown type names are rejected by `of_type`.
#[test]
fn of_type_rejects_unknown_types() {
    let fx = TreeFixture::build();
    let result = fx.engine.query().of_type(fx.engine.registry(), &[ty("missing")]);
    assert_eq!(result.err(), Some(RegistryError::UnknownType(ty("missing"))));
}
