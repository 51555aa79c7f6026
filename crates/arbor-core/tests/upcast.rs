// crates/arbor-core/tests/upcast.rs
// ============================================================================
// Module: Specific-Type Upcast Tests
// Description: Tests for specific and deferred-specific evaluation.
// Purpose: Validate join traversal, degradation, and error accounting.
// Dependencies: arbor-core, serde_json
// ============================================================================
//! ## Overview
//! Evaluates fixture queries with `specific()` and `specific_deferred()` and
//! checks merged fields, partial upcasts, and the accumulated error list.

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

use arbor_core::CHILDREN_RELATION;
use arbor_core::FieldRef;
use arbor_core::JoinPath;
use arbor_core::NodeItem;
use arbor_core::PathSpec;
use arbor_core::QueryError;
use arbor_core::TreeEngine;
use arbor_core::UpcastCode;
use common::BLOG_POST;
use common::EVENT;
use common::FEATURED_POST;
use common::PAGE;
use common::RecordingStore;
use common::TreeFixture;
use common::add_node;
use common::add_row;
use common::field;
use common::page_fields;
use common::registry;
use common::ty;
use serde_json::json;

/// Returns the item for a node id.
fn item<'a>(items: &'a [NodeItem], id: arbor_core::NodeId) -> &'a NodeItem {
    items.iter().find(|item| item.id() == id).expect("item present")
}

/// Verifies every registered subtype is upgraded and base rows stay generic.
#[test]
fn specific_upgrades_registered_subtypes() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let evaluation = fx.engine.evaluate(&fx.engine.query().specific())?;
    assert!(evaluation.upcast_errors.is_empty());
    assert_eq!(evaluation.items.len(), fx.all().len());

    assert!(matches!(item(&evaluation.items, fx.root.id), NodeItem::Generic(_)));
    assert!(matches!(item(&evaluation.items, fx.blog.id), NodeItem::Generic(_)));

    let featured = item(&evaluation.items, fx.featured.id).as_specific().expect("specific");
    assert_eq!(featured.type_name, ty(FEATURED_POST));
    assert_eq!(featured.fields.get("badge"), Some(&json!("gold")));
    assert_eq!(featured.fields.get("summary"), Some(&json!("Featured summary")));
    assert_eq!(featured.fields.get("title"), Some(&json!("Featured")));

    let event = item(&evaluation.items, fx.event.id);
    assert_eq!(event.type_name(), Some(&ty(EVENT)));
    assert_eq!(event.field("starts_at"), Some(&json!("2026-01-01")));
    Ok(())
}

/// Verifies unregistered content types degrade with one error per row.
#[test]
fn unknown_content_types_record_class_errors() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let first = add_node(fx.store(), Some(&fx.events), "legacy", page_fields("Old", true, false));
    let second = add_node(fx.store(), Some(&fx.events), "legacy", page_fields("Older", true, false));
    let evaluation = fx.engine.evaluate(&fx.engine.query().child_of(&fx.events).specific())?;

    assert_eq!(evaluation.items.len(), 3);
    assert!(matches!(item(&evaluation.items, first.id), NodeItem::Generic(_)));
    assert!(matches!(item(&evaluation.items, second.id), NodeItem::Generic(_)));
    assert_eq!(evaluation.upcast_errors.len(), 2);
    assert!(
        evaluation
            .upcast_errors
            .iter()
            .all(|error| error.code == UpcastCode::SpecificClassUnavailable)
    );
    assert!(evaluation.upcast_errors.to_string().contains("SPECIFIC_CLASS_UNAVAILABLE"));
    Ok(())
}

/// Verifies missing subclass rows yield generic or partially upcast rows.
#[test]
fn missing_subclass_rows_degrade_to_partial_results() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let bare = add_node(fx.store(), Some(&fx.blog), FEATURED_POST, page_fields("Bare", true, false));
    let half = add_node(fx.store(), Some(&fx.blog), FEATURED_POST, page_fields("Half", true, false));
    add_row(fx.store(), &half, BLOG_POST, field("summary", json!("half summary")));
    let evaluation = fx.engine.evaluate(&fx.engine.query().child_of(&fx.blog).specific())?;

    assert!(matches!(item(&evaluation.items, bare.id), NodeItem::Generic(_)));
    let partial = item(&evaluation.items, half.id).as_specific().expect("partial specific");
    assert_eq!(partial.type_name, ty(BLOG_POST));
    assert_eq!(partial.fields.get("summary"), Some(&json!("half summary")));
    assert_eq!(partial.fields.get("title"), Some(&json!("Half")));

    let codes: Vec<_> = evaluation.upcast_errors.iter().map(|error| (error.node_id, error.code)).collect();
    assert_eq!(codes, vec![
        (bare.id, UpcastCode::SpecificDataUnavailable),
        (half.id, UpcastCode::SpecificDataUnavailable),
    ]);
    Ok(())
}

/// Verifies registered types outside the requested set stay generic without errors.
#[test]
fn non_candidate_types_stay_generic() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let query = fx.engine.query().node(&fx.post, Some(&ty(EVENT))).specific();
    let evaluation = fx.engine.evaluate(&query)?;
    assert_eq!(evaluation.items.len(), 1);
    assert!(matches!(item(&evaluation.items, fx.post.id), NodeItem::Generic(_)));
    assert!(evaluation.upcast_errors.is_empty());
    Ok(())
}

/// Verifies an empty candidate set short-circuits to generic rows.
#[test]
fn no_candidates_returns_generic_rows() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let query = fx.engine.query().node(&fx.home, Some(&ty(PAGE))).specific();
    let evaluation = fx.engine.evaluate(&query)?;
    assert!(matches!(evaluation.items.as_slice(), [NodeItem::Generic(_)]));
    assert!(evaluation.upcast_errors.is_empty());
    Ok(())
}

/// Verifies deferred stand-ins load subclass data on demand.
#[test]
fn deferred_specific_loads_on_demand() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let bare = add_node(fx.store(), Some(&fx.blog), BLOG_POST, page_fields("Bare", true, false));
    let evaluation = fx.engine.evaluate(&fx.engine.query().child_of(&fx.blog).specific_deferred())?;
    assert!(evaluation.upcast_errors.is_empty());

    let NodeItem::Deferred(post) = item(&evaluation.items, fx.post.id) else {
        panic!("expected deferred item");
    };
    assert_eq!(post.join.to_string(), "blog_post");
    let loaded = post.load(fx.store())?;
    assert_eq!(loaded.fields.get("summary"), Some(&json!("A short summary")));

    let NodeItem::Deferred(featured) = item(&evaluation.items, fx.featured.id) else {
        panic!("expected deferred item");
    };
    assert_eq!(featured.join.to_string(), "blog_post__featured_post");

    let NodeItem::Deferred(missing) = item(&evaluation.items, bare.id) else {
        panic!("expected deferred item");
    };
    assert!(matches!(missing.load(fx.store()), Err(QueryError::SpecificDataUnavailable { .. })));
    Ok(())
}

/// Verifies large fields are deferred through each candidate's join path.
#[test]
fn defer_streamfields_leaves_large_fields_unloaded() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let query = fx.engine.query().child_of(&fx.blog).specific().defer_streamfields();
    let evaluation = fx.engine.evaluate(&query)?;

    let post = item(&evaluation.items, fx.post.id).as_specific().expect("specific");
    assert!(post.fields.get("summary").is_none());
    assert!(post.fields.get("body").is_none());
    assert!(post.deferred.contains("summary"));
    assert!(post.deferred.contains("body"));
    assert_eq!(post.fields.get("title"), Some(&json!("First post")));

    let featured = item(&evaluation.items, fx.featured.id).as_specific().expect("specific");
    assert_eq!(featured.fields.get("badge"), Some(&json!("gold")));
    assert!(featured.deferred.contains("summary"));
    Ok(())
}

/// Verifies prefetched child ids survive the upgrade.
#[test]
fn prefetched_children_are_copied_to_specific_nodes() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let query = fx.engine.query().node(&fx.home, None).prefetch_children().specific();
    let evaluation = fx.engine.evaluate(&query)?;
    let home = item(&evaluation.items, fx.home.id).as_specific().expect("specific");
    assert_eq!(home.prefetched.get(CHILDREN_RELATION), Some(&vec![fx.blog.id, fx.events.id]));
    assert_eq!(home.fields.get("hero"), Some(&json!("Welcome")));
    Ok(())
}

/// Verifies caller joins and deferrals survive alongside the candidate joins.
#[test]
fn specific_keeps_caller_joins_and_deferrals() -> Result<(), Box<dyn std::error::Error>> {
    let fx = TreeFixture::build();
    let engine =
        TreeEngine::new(RecordingStore::new(fx.store()), registry(), ty(PAGE), PathSpec::default());
    let query = engine
        .query()
        .child_of(&fx.blog)
        .of_type(engine.registry(), &[ty(BLOG_POST)])?
        .select_related(JoinPath::new(vec![ty(EVENT)]))
        .defer([FieldRef::generic("title")])
        .specific();
    let evaluation = engine.evaluate(&query)?;
    assert!(evaluation.upcast_errors.is_empty());

    let requests = engine.store().requests();
    let [request] = requests.as_slice() else {
        panic!("expected one fetch, got {}", requests.len());
    };
    let expected: BTreeSet<JoinPath> = [
        JoinPath::new(vec![ty(EVENT)]),
        JoinPath::new(vec![ty(BLOG_POST)]),
        JoinPath::new(vec![ty(BLOG_POST), ty(FEATURED_POST)]),
    ]
    .into_iter()
    .collect();
    assert_eq!(request.joins, expected);
    assert!(request.deferred.contains(&FieldRef::generic("title")));

    let featured = item(&evaluation.items, fx.featured.id).as_specific().expect("specific");
    assert_eq!(featured.type_name, ty(FEATURED_POST));
    assert_eq!(featured.fields.get("badge"), Some(&json!("gold")));
    assert!(featured.fields.get("title").is_none());
    assert!(featured.deferred.contains("title"));

    let post = item(&evaluation.items, fx.post.id).as_specific().expect("specific");
    assert_eq!(post.fields.get("summary"), Some(&json!("A short summary")));
    assert!(post.deferred.contains("title"));
    Ok(())
}
