// crates/arbor-core/tests/tree_queries.rs
// ============================================================================
// Module: Tree Relation Query Tests
// Description: Tests for materialized-path relation filters.
// Purpose: Validate descendant, ancestor, child, parent, and sibling selection.
// Dependencies: arbor-core, proptest
// ============================================================================
//! ## Overview
//! Evaluates every tree relation and its negation against the fixture tree,
//! then checks descendant/ancestor duality over randomly shaped trees.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::collections::BTreeSet;

use arbor_core::ContentTypeStore;
use arbor_core::InMemoryStore;
use arbor_core::JoinPath;
use arbor_core::NewNode;
use arbor_core::NodeId;
use arbor_core::NodeQuery;
use arbor_core::PathSpec;
use arbor_core::StoreError;
use arbor_core::SubclassRow;
use arbor_core::TreeEngine;
use arbor_core::TreeNode;
use arbor_core::TreeStore;
use common::BLOG_POST;
use common::FEATURED_POST;
use common::PAGE;
use common::RecordingStore;
use common::TreeFixture;
use common::add_node;
use common::field;
use common::page_fields;
use common::registry;
use common::ty;
use proptest::prelude::*;

/// Evaluates a query and returns the matched ids in path order.
fn ids<S>(engine: &TreeEngine<S>, query: &NodeQuery) -> Vec<NodeId>
where
    S: TreeStore + ContentTypeStore,
{
    engine.nodes(query).expect("evaluate").into_iter().map(|node| node.id).collect()
}

/// Collects node ids.
fn of(nodes: &[&TreeNode]) -> Vec<NodeId> {
    nodes.iter().map(|node| node.id).collect()
}

/// Verifies descendant selection honours the inclusive flag.
#[test]
fn descendant_of_excludes_self_unless_inclusive() {
    let fx = TreeFixture::build();
    let query = fx.engine.query();

    let strict = ids(&fx.engine, &query.descendant_of(&fx.blog, false));
    assert_eq!(strict, of(&[&fx.post, &fx.featured]));

    let inclusive = ids(&fx.engine, &query.descendant_of(&fx.blog, true));
    assert_eq!(inclusive, of(&[&fx.blog, &fx.post, &fx.featured]));

    let subtree = ids(&fx.engine, &query.in_subtree_of(&fx.blog));
    assert_eq!(subtree, inclusive);
}

/// Verifies the negated descendant filter keeps everything else.
#[test]
fn not_descendant_of_is_the_complement() {
    let fx = TreeFixture::build();
    let query = fx.engine.query();
    let outside = ids(&fx.engine, &query.not_descendant_of(&fx.blog, true));
    assert_eq!(outside, of(&[&fx.root, &fx.home, &fx.events, &fx.event]));
}

/// Verifies child selection stops at one level.
#[test]
fn child_of_selects_one_level() {
    let fx = TreeFixture::build();
    let query = fx.engine.query();
    assert_eq!(ids(&fx.engine, &query.child_of(&fx.home)), of(&[&fx.blog, &fx.events]));
    assert_eq!(ids(&fx.engine, &query.child_of(&fx.post)), Vec::<NodeId>::new());
    let others = ids(&fx.engine, &query.not_child_of(&fx.home));
    assert!(!others.contains(&fx.blog.id));
    assert!(others.contains(&fx.post.id));
}

/// Verifies ancestors are the step-boundary prefixes of a path.
#[test]
fn ancestor_of_walks_step_prefixes() {
    let fx = TreeFixture::build();
    let query = fx.engine.query();
    let strict = ids(&fx.engine, &query.ancestor_of(&fx.featured, false));
    assert_eq!(strict, of(&[&fx.root, &fx.home, &fx.blog]));
    let inclusive = ids(&fx.engine, &query.ancestor_of(&fx.featured, true));
    assert_eq!(inclusive, of(&[&fx.root, &fx.home, &fx.blog, &fx.featured]));
    assert_eq!(ids(&fx.engine, &query.ancestor_of(&fx.root, false)), Vec::<NodeId>::new());
}

/// Verifies roots have no parent.
#[test]
fn parent_of_root_matches_nothing() {
    let fx = TreeFixture::build();
    let query = fx.engine.query();
    assert_eq!(ids(&fx.engine, &query.parent_of(&fx.event)), of(&[&fx.events]));
    assert_eq!(ids(&fx.engine, &query.parent_of(&fx.root)), Vec::<NodeId>::new());
    assert_eq!(ids(&fx.engine, &query.not_parent_of(&fx.root)).len(), fx.all().len());
}

/// Verifies siblings share the parent prefix and depth.
#[test]
fn sibling_of_includes_self_by_choice() {
    let fx = TreeFixture::build();
    let query = fx.engine.query();
    assert_eq!(ids(&fx.engine, &query.sibling_of(&fx.blog, true)), of(&[&fx.blog, &fx.events]));
    assert_eq!(ids(&fx.engine, &query.sibling_of(&fx.blog, false)), of(&[&fx.events]));
    assert_eq!(ids(&fx.engine, &query.sibling_of(&fx.root, true)), of(&[&fx.root]));
}

/// Verifies single-node selection and its negation.
#[test]
fn node_and_not_node_partition_the_tree() {
    let fx = TreeFixture::build();
    let query = fx.engine.query();
    assert_eq!(ids(&fx.engine, &query.node(&fx.event, None)), of(&[&fx.event]));
    let rest = ids(&fx.engine, &query.not_node(&fx.event));
    assert_eq!(rest.len(), fx.all().len() - 1);
    assert!(!rest.contains(&fx.event.id));
}

/// Verifies live, menu, and public shorthands.
#[test]
fn live_menu_and_public_shorthands() {
    let fx = TreeFixture::build();
    let query = fx.engine.query();
    assert!(!ids(&fx.engine, &query.live()).contains(&fx.featured.id));
    assert_eq!(ids(&fx.engine, &query.not_live()), of(&[&fx.featured]));
    assert_eq!(ids(&fx.engine, &query.in_menu()), of(&[&fx.home, &fx.blog, &fx.events]));
    assert!(ids(&fx.engine, &query.not_in_menu()).contains(&fx.root.id));

    let restricted = [fx.blog.clone()];
    let public = ids(&fx.engine, &query.public(&restricted));
    assert_eq!(public, of(&[&fx.root, &fx.home, &fx.events, &fx.event]));
    let private = ids(&fx.engine, &query.not_public(&restricted));
    assert_eq!(private, of(&[&fx.blog, &fx.post, &fx.featured]));
    assert_eq!(ids(&fx.engine, &query.public(&[])).len(), fx.all().len());
}

/// Verifies query combination with `&` and `|`.
#[test]
fn combined_queries_intersect_and_union_rows() {
    let fx = TreeFixture::build();
    let query = fx.engine.query();
    let under_home = query.descendant_of(&fx.home, false);
    let live = query.live();
    let both = &under_home & &live;
    assert_eq!(ids(&fx.engine, &both), of(&[&fx.blog, &fx.post, &fx.events, &fx.event]));
    let either = query.child_of(&fx.blog) | query.node(&fx.root, None);
    assert_eq!(ids(&fx.engine, &either), of(&[&fx.root, &fx.post, &fx.featured]));
}

/// Verifies overlapping unions yield each node once, with or without `distinct`.
#[test]
fn overlapping_unions_yield_each_node_once() {
    let fx = TreeFixture::build();
    let query = fx.engine.query();
    let overlapping = query.descendant_of(&fx.blog, false) | query.child_of(&fx.blog);
    let expected = of(&[&fx.post, &fx.featured]);
    assert_eq!(ids(&fx.engine, &overlapping), expected);
    assert_eq!(ids(&fx.engine, &overlapping.distinct()), expected);
}

/// Verifies a node and its subclass rows are written together.
#[test]
fn add_node_with_rows_writes_every_step() {
    let fx = TreeFixture::build();
    let store = fx.store();
    let content_type_id = store.ensure_content_type(&ty(FEATURED_POST)).expect("content type");
    let rows = vec![
        SubclassRow::new(ty(BLOG_POST), field("summary", serde_json::json!("s"))),
        SubclassRow::new(ty(FEATURED_POST), field("badge", serde_json::json!("silver"))),
    ];
    let node = store
        .add_node_with_rows(
            Some(fx.blog.id),
            NewNode { content_type_id, fields: page_fields("New", true, false) },
            &rows,
        )
        .expect("add node");
    let join = JoinPath::new(vec![ty(BLOG_POST), ty(FEATURED_POST)]);
    assert_eq!(store.load_subclass_rows(node.id, &join).expect("rows"), rows);
    assert_eq!(ids(&fx.engine, &fx.engine.query().child_of(&fx.blog)).len(), 3);
}

/// Verifies a rejected subclass row removes the node it was written for.
#[test]
fn add_node_with_rows_removes_node_when_a_row_fails() {
    let fx = TreeFixture::build();
    let before = ids(&fx.engine, &fx.engine.query());
    let store = RecordingStore::rejecting_rows(fx.store());
    let content_type_id = store.ensure_content_type(&ty(BLOG_POST)).expect("content type");
    let result = store.add_node_with_rows(
        Some(fx.blog.id),
        NewNode { content_type_id, fields: page_fields("Orphan", true, false) },
        &[SubclassRow::new(ty(BLOG_POST), field("summary", serde_json::json!("s")))],
    );
    assert!(matches!(result, Err(StoreError::Invalid(_))));
    assert_eq!(ids(&fx.engine, &fx.engine.query()), before);
}

/// Verifies moves rebase the whole subtree and reject cycles.
#[test]
fn moving_a_subtree_rewrites_paths() {
    let fx = TreeFixture::build();
    let moved = fx.store().move_subtree(fx.blog.id, Some(fx.events.id)).expect("move");
    assert_eq!(moved.depth, fx.events.depth + 1);
    let query = fx.engine.query();
    let under_events = ids(&fx.engine, &query.descendant_of(&fx.events, false));
    assert_eq!(under_events.len(), 4);
    assert!(under_events.contains(&fx.featured.id));
    let err = fx.store().move_subtree(fx.home.id, Some(fx.post.id));
    assert!(err.is_err());
}

/// Verifies deletes remove the descendant subtree.
#[test]
fn deleting_a_subtree_removes_descendants() {
    let fx = TreeFixture::build();
    let removed = fx.store().delete_subtree(fx.blog.id).expect("delete");
    assert_eq!(removed, 3);
    assert_eq!(fx.engine.count(&fx.engine.query()).expect("count"), 4);
}

/// Builds a tree where node `i + 1` hangs under node `choices[i] % (i + 1)`.
fn random_tree(choices: &[u8]) -> (TreeEngine<InMemoryStore>, Vec<TreeNode>) {
    let store = InMemoryStore::new(PathSpec::default());
    let mut nodes = vec![add_node(&store, None, PAGE, page_fields("root", true, true))];
    for (index, choice) in choices.iter().enumerate() {
        let parent = nodes[usize::from(*choice) % (index + 1)].clone();
        nodes.push(add_node(&store, Some(&parent), PAGE, page_fields("n", true, true)));
    }
    let engine = TreeEngine::new(store, registry(), ty(PAGE), PathSpec::default());
    (engine, nodes)
}

proptest! {
    #[test]
    fn descendant_and_ancestor_are_dual(choices in proptest::collection::vec(any::<u8>(), 0 .. 12)) {
        let (engine, nodes) = random_tree(&choices);
        let query = engine.query();
        for a in &nodes {
            let ancestors: BTreeSet<NodeId> =
                ids(&engine, &query.ancestor_of(a, false)).into_iter().collect();
            for b in &nodes {
                let descendants: BTreeSet<NodeId> =
                    ids(&engine, &query.descendant_of(b, false)).into_iter().collect();
                prop_assert_eq!(descendants.contains(&a.id), ancestors.contains(&b.id));
            }
        }
    }

    #[test]
    fn every_node_is_a_child_of_its_parent(choices in proptest::collection::vec(any::<u8>(), 1 .. 12)) {
        let (engine, nodes) = random_tree(&choices);
        let query = engine.query();
        for node in &nodes {
            let own = ids(&engine, &query.descendant_of(node, false));
            prop_assert!(!own.contains(&node.id));
            let parents = engine.nodes(&query.parent_of(node)).expect("parent");
            for parent in parents {
                prop_assert!(ids(&engine, &query.child_of(&parent)).contains(&node.id));
            }
        }
    }
}
