// crates/arbor-core/tests/common/mod.rs
// ============================================================================
// Module: Arbor Core Test Fixtures
// Description: Shared type registry and page tree fixtures.
// Purpose: Build a small, fully populated tree for integration tests.
// Dependencies: arbor-core, serde_json
// ============================================================================

//! ## Overview
//! The fixture tree:
//!
//! ```text
//! root (page)
//! └── home (home)
//!     ├── blog (page)
//!     │   ├── post (blog_post)
//!     │   └── featured (featured_post)
//!     └── events (page)
//!         └── event (event)
//! ```

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Shared fixtures are used by a subset of test binaries."
)]

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use arbor_core::ContentTypeId;
use arbor_core::ContentTypeStore;
use arbor_core::FetchRequest;
use arbor_core::FetchedNode;
use arbor_core::FieldMap;
use arbor_core::Filter;
use arbor_core::InMemoryStore;
use arbor_core::JoinPath;
use arbor_core::NewNode;
use arbor_core::NodeId;
use arbor_core::PathSpec;
use arbor_core::PrimaryKeyKind;
use arbor_core::StoreError;
use arbor_core::SubclassRow;
use arbor_core::TreeEngine;
use arbor_core::TreeNode;
use arbor_core::TreePath;
use arbor_core::TreeStore;
use arbor_core::TypeDescriptor;
use arbor_core::TypeName;
use arbor_core::TypeRegistry;
use serde_json::json;

/// Base page type.
pub const PAGE: &str = "page";
/// Home page type.
pub const HOME: &str = "home";
/// Abstract article mixin.
pub const ARTICLE: &str = "article";
/// Blog post type.
pub const BLOG_POST: &str = "blog_post";
/// Featured post type, a subtype of blog post.
pub const FEATURED_POST: &str = "featured_post";
/// Event page type.
pub const EVENT: &str = "event";
/// Integer-keyed tenant member type.
pub const SNIPPET: &str = "snippet";
/// UUID-keyed tenant member type.
pub const DOCUMENT: &str = "document";

/// Returns a type name.
pub fn ty(name: &str) -> TypeName {
    TypeName::new(name)
}

/// Builds the registry shared by every test.
pub fn registry() -> Arc<TypeRegistry> {
    let descriptors = vec![
        TypeDescriptor::concrete(PAGE, None),
        TypeDescriptor::concrete(HOME, Some(ty(PAGE))),
        TypeDescriptor::abstract_type(ARTICLE, Some(ty(PAGE))).with_deferrable(["body"]),
        TypeDescriptor::concrete(BLOG_POST, Some(ty(ARTICLE))).with_deferrable(["summary"]),
        TypeDescriptor::concrete(FEATURED_POST, Some(ty(BLOG_POST))),
        TypeDescriptor::concrete(EVENT, Some(ty(PAGE))),
        TypeDescriptor::concrete(SNIPPET, None),
        TypeDescriptor::concrete(DOCUMENT, None).with_primary_key(PrimaryKeyKind::Uuid),
    ];
    Arc::new(TypeRegistry::new(descriptors).expect("fixture registry"))
}

/// Builds generic fields for a page.
pub fn page_fields(title: &str, live: bool, in_menu: bool) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("title".to_string(), json!(title));
    fields.insert("live".to_string(), json!(live));
    fields.insert("show_in_menus".to_string(), json!(in_menu));
    fields
}

/// Adds a node of `type_name` under `parent` (or as a root).
pub fn add_node(
    store: &InMemoryStore,
    parent: Option<&TreeNode>,
    type_name: &str,
    fields: FieldMap,
) -> TreeNode {
    let content_type_id = store.ensure_content_type(&ty(type_name)).expect("content type");
    let new = NewNode { content_type_id, fields };
    match parent {
        Some(parent) => store.add_child(parent.id, new).expect("add child"),
        None => store.add_root(new).expect("add root"),
    }
}

/// Saves one subclass row for `node`.
pub fn add_row(store: &InMemoryStore, node: &TreeNode, type_name: &str, fields: FieldMap) {
    store.save_subclass_row(node.id, &SubclassRow::new(ty(type_name), fields)).expect("subclass row");
}

/// Single-entry field map.
pub fn field(name: &str, value: serde_json::Value) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert(name.to_string(), value);
    fields
}

/// Populated fixture tree.
pub struct TreeFixture {
    /// Engine over the in-memory store.
    pub engine: TreeEngine<InMemoryStore>,
    /// Tree root.
    pub root: TreeNode,
    /// Home page.
    pub home: TreeNode,
    /// Blog index.
    pub blog: TreeNode,
    /// Plain blog post.
    pub post: TreeNode,
    /// Featured blog post.
    pub featured: TreeNode,
    /// Events index.
    pub events: TreeNode,
    /// Event page.
    pub event: TreeNode,
}

impl TreeFixture {
    /// Builds the fixture tree with every subclass row present.
    pub fn build() -> Self {
        let store = InMemoryStore::new(PathSpec::default());
        let root = add_node(&store, None, PAGE, page_fields("Root", true, false));
        let home = add_node(&store, Some(&root), HOME, page_fields("Home", true, true));
        add_row(&store, &home, HOME, field("hero", json!("Welcome")));
        let blog = add_node(&store, Some(&home), PAGE, page_fields("Blog", true, true));
        let post = add_node(&store, Some(&blog), BLOG_POST, page_fields("First post", true, false));
        let mut post_fields = field("summary", json!("A short summary"));
        post_fields.insert("body".to_string(), json!("Long body text"));
        add_row(&store, &post, BLOG_POST, post_fields);
        let featured =
            add_node(&store, Some(&blog), FEATURED_POST, page_fields("Featured", false, false));
        add_row(&store, &featured, BLOG_POST, field("summary", json!("Featured summary")));
        add_row(&store, &featured, FEATURED_POST, field("badge", json!("gold")));
        let events = add_node(&store, Some(&home), PAGE, page_fields("Events", true, true));
        let event = add_node(&store, Some(&events), EVENT, page_fields("Launch", true, false));
        add_row(&store, &event, EVENT, field("starts_at", json!("2026-01-01")));
        let engine = TreeEngine::new(store, registry(), ty(PAGE), PathSpec::default());
        Self { engine, root, home, blog, post, featured, events, event }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &InMemoryStore {
        self.engine.store()
    }

    /// Returns every fixture node in path order.
    pub fn all(&self) -> Vec<&TreeNode> {
        vec![&self.root, &self.home, &self.blog, &self.post, &self.featured, &self.events, &self.event]
    }
}

/// Store wrapper that records every fetch request it serves.
pub struct RecordingStore<'a> {
    /// Store serving the requests.
    inner: &'a InMemoryStore,
    /// Fetch requests in call order.
    requests: Mutex<Vec<FetchRequest>>,
    /// Reject every subclass row write.
    reject_rows: bool,
}

impl<'a> RecordingStore<'a> {
    /// Wraps `inner` with an empty request log.
    pub fn new(inner: &'a InMemoryStore) -> Self {
        Self { inner, requests: Mutex::new(Vec::new()), reject_rows: false }
    }

    /// Wraps `inner` so every subclass row write fails.
    pub fn rejecting_rows(inner: &'a InMemoryStore) -> Self {
        Self { reject_rows: true, ..Self::new(inner) }
    }

    /// Returns the recorded requests.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl ContentTypeStore for RecordingStore<'_> {
    fn ensure_content_type(&self, name: &TypeName) -> Result<ContentTypeId, StoreError> {
        self.inner.ensure_content_type(name)
    }

    fn content_type_ids(
        &self,
        names: &BTreeSet<TypeName>,
    ) -> Result<BTreeMap<TypeName, ContentTypeId>, StoreError> {
        self.inner.content_type_ids(names)
    }

    fn content_type_names(
        &self,
        ids: &BTreeSet<ContentTypeId>,
    ) -> Result<BTreeMap<ContentTypeId, TypeName>, StoreError> {
        self.inner.content_type_names(ids)
    }
}

impl TreeStore for RecordingStore<'_> {
    fn fetch_nodes(&self, request: &FetchRequest) -> Result<Vec<FetchedNode>, StoreError> {
        self.requests.lock().expect("requests lock").push(request.clone());
        self.inner.fetch_nodes(request)
    }

    fn count_nodes(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.inner.count_nodes(filter)
    }

    fn fetch_paths(&self, filter: &Filter) -> Result<Vec<TreePath>, StoreError> {
        self.inner.fetch_paths(filter)
    }

    fn load_subclass_rows(
        &self,
        node: NodeId,
        join: &JoinPath,
    ) -> Result<Vec<SubclassRow>, StoreError> {
        self.inner.load_subclass_rows(node, join)
    }

    fn add_root(&self, node: NewNode) -> Result<TreeNode, StoreError> {
        self.inner.add_root(node)
    }

    fn add_child(&self, parent: NodeId, node: NewNode) -> Result<TreeNode, StoreError> {
        self.inner.add_child(parent, node)
    }

    fn save_subclass_row(&self, node: NodeId, row: &SubclassRow) -> Result<(), StoreError> {
        if self.reject_rows {
            return Err(StoreError::Invalid(format!("row {} rejected", row.type_name)));
        }
        self.inner.save_subclass_row(node, row)
    }

    fn move_subtree(
        &self,
        node: NodeId,
        new_parent: Option<NodeId>,
    ) -> Result<TreeNode, StoreError> {
        self.inner.move_subtree(node, new_parent)
    }

    fn delete_subtree(&self, node: NodeId) -> Result<u64, StoreError> {
        self.inner.delete_subtree(node)
    }
}
