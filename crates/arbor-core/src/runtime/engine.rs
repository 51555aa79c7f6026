// crates/arbor-core/src/runtime/engine.rs
// ============================================================================
// Module: Arbor Tree Engine
// Description: Evaluates node queries against a tree store.
// Purpose: Run generic, specific, and deferred-specific evaluations and resolve ancestors.
// Dependencies: thiserror, tracing, crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! [`TreeEngine`] binds a store, the type registry, and the tree's base type.
//! Evaluation is synchronous: one fetch per query plus, for specific yields,
//! one batch content-type lookup. Upcast failures are collected in the
//! returned [`Evaluation`] and reported as a warning, never as an error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use crate::core::filter::Condition;
use crate::core::filter::Filter;
use crate::core::identifiers::ContentTypeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::TypeName;
use crate::core::path::PathError;
use crate::core::path::PathSpec;
use crate::core::path::TreePath;
use crate::core::record::FetchRequest;
use crate::core::record::TreeNode;
use crate::core::types::RegistryError;
use crate::core::types::TypeRegistry;
use crate::interfaces::ContentTypeStore;
use crate::interfaces::StoreError;
use crate::interfaces::TreeStore;
use crate::runtime::query::NodeQuery;
use crate::runtime::query::YieldMode;
use crate::runtime::upcast::NodeItem;
use crate::runtime::upcast::UpcastErrorList;
use crate::runtime::upcast::UpcastPlan;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Query evaluation errors.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No node satisfies the request.
    #[error("node not found: {0}")]
    NotFound(String),
    /// Stored tree data contradicts the path invariants.
    #[error("tree inconsistency: {0}")]
    Inconsistent(String),
    /// Deferred subtype data is missing.
    #[error("specific data unavailable for node {node} via {join}")]
    SpecificDataUnavailable {
        /// Affected node.
        node: NodeId,
        /// Join path that failed.
        join: String,
    },
    /// Member queries over different models were combined.
    #[error("cannot combine queries over {left} and {right}")]
    IncompatibleModels {
        /// Left model.
        left: String,
        /// Right model.
        right: String,
    },
    /// Type registry error.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Path error.
    #[error(transparent)]
    Path(#[from] PathError),
    /// Store error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Evaluated query rows plus the upcast errors recorded while producing them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    /// Rows in path order.
    pub items: Vec<NodeItem>,
    /// Rows that could not be fully upcast.
    pub upcast_errors: UpcastErrorList,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Query engine over one tree.
#[derive(Debug, Clone)]
pub struct TreeEngine<S> {
    /// Backing store.
    store: S,
    /// Registered record types.
    registry: Arc<TypeRegistry>,
    /// Generic node type of the tree.
    base_type: TypeName,
    /// Path layout.
    path_spec: PathSpec,
}

impl<S> TreeEngine<S>
where
    S: TreeStore + ContentTypeStore,
{
    /// Creates an engine.
    #[must_use]
    pub const fn new(
        store: S,
        registry: Arc<TypeRegistry>,
        base_type: TypeName,
        path_spec: PathSpec,
    ) -> Self {
        Self { store, registry, base_type, path_spec }
    }

    /// Returns the backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the type registry.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Returns the base type.
    #[must_use]
    pub const fn base_type(&self) -> &TypeName {
        &self.base_type
    }

    /// Returns the path layout.
    #[must_use]
    pub const fn path_spec(&self) -> &PathSpec {
        &self.path_spec
    }

    /// Returns a query over every node of this tree.
    #[must_use]
    pub fn query(&self) -> NodeQuery {
        NodeQuery::new(self.path_spec.clone())
    }

    /// Evaluates a query according to its yield mode.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] when the registry or store fails.
    pub fn evaluate(&self, query: &NodeQuery) -> Result<Evaluation, QueryError> {
        let mut request = base_request(query);
        let mode = query.yield_mode();
        if mode == YieldMode::Generic {
            return self.evaluate_generic(&request);
        }
        let lookups = self.registry.specific_lookups(&self.base_type)?;
        let candidates = query.type_state().candidates(lookups.keys());
        let plan = UpcastPlan::new(self.base_type.clone(), &lookups, candidates);
        if mode == YieldMode::Specific && plan.is_empty() {
            return self.evaluate_generic(&request);
        }
        if mode == YieldMode::Specific {
            request.joins.extend(plan.joins());
            if query.defers_streamfields() {
                request.deferred.extend(plan.streamfield_deferrals(&self.registry));
            }
        }
        let types_by_id = self.types_by_id(&plan.resolvable_types())?;
        let rows = self.store.fetch_nodes(&request)?;
        let mut upcast_errors = UpcastErrorList::new();
        let items = match mode {
            YieldMode::DeferredSpecific => plan.defer_rows(rows, &types_by_id, &mut upcast_errors),
            YieldMode::Specific | YieldMode::Generic => {
                plan.upgrade_rows(rows, &types_by_id, &mut upcast_errors)
            }
        };
        upcast_errors.warn();
        Ok(Evaluation { items, upcast_errors })
    }

    /// Evaluates a query and returns generic rows only.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Store`] when the store fails.
    pub fn nodes(&self, query: &NodeQuery) -> Result<Vec<TreeNode>, QueryError> {
        let rows = self.store.fetch_nodes(&base_request(query))?;
        Ok(rows.into_iter().map(|fetched| fetched.node).collect())
    }

    /// Counts rows matching a query.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Store`] when the store fails.
    pub fn count(&self, query: &NodeQuery) -> Result<u64, QueryError> {
        Ok(self.store.count_nodes(query.filter_tree())?)
    }

    /// Returns true when any row matches.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Store`] when the store fails.
    pub fn exists(&self, query: &NodeQuery) -> Result<bool, QueryError> {
        Ok(self.count(query)? > 0)
    }

    /// Returns the first root node in path order.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Store`] when the store fails.
    pub fn first_root_node(&self) -> Result<Option<TreeNode>, QueryError> {
        let request = FetchRequest {
            limit: Some(1),
            ..FetchRequest::for_filter(Filter::Condition(Condition::DepthEq { depth: 1 }))
        };
        Ok(self.store.fetch_nodes(&request)?.into_iter().next().map(|fetched| fetched.node))
    }

    /// Returns the node stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Store`] when the store fails.
    pub fn node_at_path(&self, path: &TreePath) -> Result<Option<TreeNode>, QueryError> {
        let request = FetchRequest {
            limit: Some(1),
            ..FetchRequest::for_filter(Filter::Condition(Condition::PathEq { path: path.clone() }))
        };
        Ok(self.store.fetch_nodes(&request)?.into_iter().next().map(|fetched| fetched.node))
    }

    /// Returns the node with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotFound`] when absent and [`QueryError::Store`] on store failure.
    pub fn get(&self, id: NodeId) -> Result<TreeNode, QueryError> {
        let request = FetchRequest {
            limit: Some(1),
            ..FetchRequest::for_filter(Filter::Condition(Condition::KeyEq { key: id.into() }))
        };
        self.store
            .fetch_nodes(&request)?
            .into_iter()
            .next()
            .map(|fetched| fetched.node)
            .ok_or_else(|| QueryError::NotFound(format!("node {id}")))
    }

    /// Returns the deepest node that is an ancestor of every row in the query.
    ///
    /// With `include_self` a matched node may be its own ancestor. Outside strict mode an
    /// empty query or a missing common prefix falls back to the first root node.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotFound`] in strict mode when the query is empty or the rows
    /// share no ancestor, and [`QueryError::Inconsistent`] when the computed ancestor path
    /// names no stored node.
    pub fn first_common_ancestor(
        &self,
        query: &NodeQuery,
        include_self: bool,
        strict: bool,
    ) -> Result<TreeNode, QueryError> {
        if !self.exists(query)? {
            return self.root_fallback(strict, "common ancestor of an empty query");
        }
        let paths: BTreeSet<TreePath> = self
            .store
            .fetch_paths(query.filter_tree())?
            .into_iter()
            .map(|path| if include_self { path } else { self.path_spec.parent_of(&path) })
            .collect();
        let common = self.path_spec.common_prefix(&paths);
        if common.is_empty() {
            return self.root_fallback(strict, "no common ancestor");
        }
        self.node_at_path(&common)?.ok_or_else(|| {
            QueryError::Inconsistent(format!("no node stored at common ancestor path {common}"))
        })
    }

    /// Returns the first root, or `NotFound` in strict mode.
    fn root_fallback(&self, strict: bool, reason: &str) -> Result<TreeNode, QueryError> {
        if strict {
            return Err(QueryError::NotFound(reason.to_string()));
        }
        self.first_root_node()?
            .ok_or_else(|| QueryError::NotFound(format!("{reason}: tree has no root")))
    }

    /// Evaluates a request as generic rows.
    fn evaluate_generic(&self, request: &FetchRequest) -> Result<Evaluation, QueryError> {
        let rows = self.store.fetch_nodes(request)?;
        let items = rows.into_iter().map(|fetched| NodeItem::Generic(fetched.node)).collect();
        Ok(Evaluation { items, upcast_errors: UpcastErrorList::new() })
    }

    /// Resolves every registered type to its content type id in one batch.
    fn types_by_id(
        &self,
        names: &BTreeSet<TypeName>,
    ) -> Result<BTreeMap<ContentTypeId, TypeName>, QueryError> {
        let ids = self.store.content_type_ids(names)?;
        Ok(ids.into_iter().map(|(name, id)| (id, name)).collect())
    }
}

/// Builds the fetch request for a query's own filter and directives.
fn base_request(query: &NodeQuery) -> FetchRequest {
    FetchRequest {
        filter: query.filter_tree().clone(),
        joins: query.joins().clone(),
        deferred: query.deferred_fields().clone(),
        distinct: query.is_distinct(),
        prefetch_children: query.prefetches_children(),
        limit: None,
    }
}
