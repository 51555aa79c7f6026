// crates/arbor-core/src/runtime/store.rs
// ============================================================================
// Module: Arbor In-Memory Store
// Description: Mutex-guarded in-memory implementation of every store interface.
// Purpose: Back tests, demos, and the CLI's memory mode without a database.
// Dependencies: tracing, uuid, crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! [`InMemoryStore`] keeps every table in one [`StoreState`] behind a mutex
//! and evaluates filters row by row through [`Filter::matches`]. Rows are
//! returned in path order (nodes) or `(content type, key)` order (members).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use uuid::Uuid;

use crate::core::filter::Filter;
use crate::core::filter::MatchContext;
use crate::core::identifiers::ContentTypeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::PrimaryKeyKind;
use crate::core::identifiers::RecordKey;
use crate::core::identifiers::TenantId;
use crate::core::identifiers::TypeName;
use crate::core::path::PathSpec;
use crate::core::path::TreePath;
use crate::core::record::CHILDREN_RELATION;
use crate::core::record::FetchRequest;
use crate::core::record::FetchedNode;
use crate::core::record::JoinPath;
use crate::core::record::MemberRecord;
use crate::core::record::NewNode;
use crate::core::record::SubclassRow;
use crate::core::record::TreeNode;
use crate::core::tenant::SharedTenantMember;
use crate::core::tenant::Tenant;
use crate::core::tenant::TenantDraft;
use crate::interfaces::ContentTypeStore;
use crate::interfaces::MemberStore;
use crate::interfaces::StoreError;
use crate::interfaces::TenantStore;
use crate::interfaces::TreeStore;

// ============================================================================
// SECTION: State
// ============================================================================

/// Tables of the in-memory store.
#[derive(Debug, Default)]
struct StoreState {
    /// Content type ids by name.
    content_types: BTreeMap<TypeName, ContentTypeId>,
    /// Last allocated content type id.
    last_content_type: u64,
    /// Tree nodes by id.
    nodes: BTreeMap<NodeId, TreeNode>,
    /// Last allocated node id.
    last_node: u64,
    /// Subclass rows by node and type.
    subclass_rows: BTreeMap<(NodeId, TypeName), SubclassRow>,
    /// Tenants by id.
    tenants: BTreeMap<TenantId, Tenant>,
    /// Last allocated tenant id.
    last_tenant: u64,
    /// Members by content type and key.
    members: BTreeMap<(ContentTypeId, RecordKey), MemberRecord>,
    /// Share links in insertion order.
    shares: Vec<SharedTenantMember>,
}

impl MatchContext for StoreState {
    fn type_name_of(&self, id: ContentTypeId) -> Option<TypeName> {
        self.content_types.iter().find(|(_, value)| **value == id).map(|(name, _)| name.clone())
    }

    fn shared_keys(
        &self,
        recipient: TenantId,
        model: &TypeName,
        kind: PrimaryKeyKind,
    ) -> BTreeSet<RecordKey> {
        let Some(content_type) = self.content_types.get(model) else {
            return BTreeSet::new();
        };
        self.shares
            .iter()
            .filter(|share| share.recipient == recipient && share.content_type_id == *content_type)
            .filter_map(|share| {
                let key = RecordKey::parse_as(&share.object_id, kind);
                if key.is_none() {
                    tracing::debug!(
                        object_id = %share.object_id,
                        model = %model,
                        "skipping share link with unparsable object id"
                    );
                }
                key
            })
            .collect()
    }
}

impl StoreState {
    /// Returns matching nodes in path order.
    fn matching_nodes(&self, filter: &Filter) -> Vec<&TreeNode> {
        let mut nodes: Vec<&TreeNode> =
            self.nodes.values().filter(|node| filter.matches(*node, self)).collect();
        nodes.sort_by(|left, right| left.path.cmp(&right.path));
        nodes
    }

    /// Returns the node at `id`.
    fn node(&self, id: NodeId) -> Result<&TreeNode, StoreError> {
        self.nodes.get(&id).ok_or_else(|| StoreError::NotFound(format!("node {id}")))
    }

    /// Returns children of `parent` (roots when `None`) in path order.
    fn children_of(&self, parent: Option<&TreeNode>) -> Vec<&TreeNode> {
        let (prefix, depth) = match parent {
            Some(parent) => (parent.path.clone(), parent.depth + 1),
            None => (TreePath::empty(), 1),
        };
        let mut children: Vec<&TreeNode> = self
            .nodes
            .values()
            .filter(|node| node.depth == depth && node.path.starts_with(&prefix))
            .collect();
        children.sort_by(|left, right| left.path.cmp(&right.path));
        children
    }

    /// Allocates the next path below `parent`.
    fn next_path(&self, spec: &PathSpec, parent: Option<&TreeNode>) -> Result<TreePath, StoreError> {
        let last = self.children_of(parent).last().map(|node| node.path.clone());
        let prefix = parent.map_or_else(TreePath::empty, |node| node.path.clone());
        spec.next_child(&prefix, last.as_ref()).map_err(|err| StoreError::Invalid(err.to_string()))
    }

    /// Inserts a node at a freshly allocated path.
    fn insert_node(&mut self, spec: &PathSpec, path: TreePath, new: NewNode) -> Result<TreeNode, StoreError> {
        self.last_node += 1;
        let id = NodeId::new(nonzero(self.last_node)?);
        let node = TreeNode {
            id,
            depth: spec.depth_of(&path),
            path,
            content_type_id: new.content_type_id,
            fields: new.fields,
            deferred: BTreeSet::new(),
            prefetched: BTreeMap::new(),
        };
        self.nodes.insert(id, node.clone());
        Ok(node)
    }

    /// Rejects a tenant whose label or host/port collides with another tenant.
    fn check_tenant_unique(&self, tenant_id: Option<TenantId>, draft: &TenantDraft) -> Result<(), StoreError> {
        for other in self.tenants.values().filter(|other| Some(other.id) != tenant_id) {
            if other.label == draft.label {
                return Err(StoreError::Conflict(format!("tenant label {} exists", draft.label)));
            }
            if draft.hostname.is_some() && other.hostname == draft.hostname && other.port == draft.port {
                return Err(StoreError::Conflict(format!(
                    "tenant host {}:{} exists",
                    draft.hostname.as_deref().unwrap_or_default(),
                    draft.port
                )));
            }
        }
        Ok(())
    }
}

/// Converts a counter into a non-zero id.
fn nonzero(raw: u64) -> Result<NonZeroU64, StoreError> {
    NonZeroU64::new(raw).ok_or_else(|| StoreError::Store("id counter overflow".to_string()))
}

/// Converts a row count into `u64`.
fn count_of(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// In-memory store for tests and examples.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    /// Path layout of the tree.
    spec: PathSpec,
    /// Tables protected by a mutex.
    state: Arc<Mutex<StoreState>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(PathSpec::default())
    }
}

impl InMemoryStore {
    /// Creates an empty store using `spec` for path allocation.
    #[must_use]
    pub fn new(spec: PathSpec) -> Self {
        Self { spec, state: Arc::new(Mutex::new(StoreState::default())) }
    }

    /// Returns the path layout.
    #[must_use]
    pub const fn path_spec(&self) -> &PathSpec {
        &self.spec
    }

    /// Locks the tables.
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Store("in-memory store mutex poisoned".to_string()))
    }
}

impl ContentTypeStore for InMemoryStore {
    fn ensure_content_type(&self, name: &TypeName) -> Result<ContentTypeId, StoreError> {
        let mut state = self.lock()?;
        if let Some(id) = state.content_types.get(name) {
            return Ok(*id);
        }
        state.last_content_type += 1;
        let id = ContentTypeId::new(nonzero(state.last_content_type)?);
        state.content_types.insert(name.clone(), id);
        drop(state);
        Ok(id)
    }

    fn content_type_ids(
        &self,
        names: &BTreeSet<TypeName>,
    ) -> Result<BTreeMap<TypeName, ContentTypeId>, StoreError> {
        let state = self.lock()?;
        Ok(names
            .iter()
            .filter_map(|name| state.content_types.get(name).map(|id| (name.clone(), *id)))
            .collect())
    }

    fn content_type_names(
        &self,
        ids: &BTreeSet<ContentTypeId>,
    ) -> Result<BTreeMap<ContentTypeId, TypeName>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .content_types
            .iter()
            .filter(|(_, id)| ids.contains(id))
            .map(|(name, id)| (*id, name.clone()))
            .collect())
    }
}

impl TreeStore for InMemoryStore {
    fn fetch_nodes(&self, request: &FetchRequest) -> Result<Vec<FetchedNode>, StoreError> {
        let state = self.lock()?;
        let joined_types = request.joined_types();
        let mut rows = Vec::new();
        // `matching_nodes` yields each node once, so `distinct` needs no pass here.
        for node in state.matching_nodes(&request.filter) {
            if request.limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
            let joined = joined_types
                .iter()
                .filter_map(|ty| {
                    state.subclass_rows.get(&(node.id, ty.clone())).map(|row| (ty.clone(), row.clone()))
                })
                .collect();
            let mut fetched = FetchedNode { node: node.clone(), joined };
            request.apply_deferrals(&mut fetched);
            if request.prefetch_children {
                let children = state.children_of(Some(node)).iter().map(|child| child.id).collect();
                fetched.node.prefetched.insert(CHILDREN_RELATION.to_string(), children);
            }
            rows.push(fetched);
        }
        drop(state);
        Ok(rows)
    }

    fn count_nodes(&self, filter: &Filter) -> Result<u64, StoreError> {
        let state = self.lock()?;
        Ok(count_of(state.matching_nodes(filter).len()))
    }

    fn fetch_paths(&self, filter: &Filter) -> Result<Vec<TreePath>, StoreError> {
        let state = self.lock()?;
        Ok(state.matching_nodes(filter).into_iter().map(|node| node.path.clone()).collect())
    }

    fn load_subclass_rows(&self, node: NodeId, join: &JoinPath) -> Result<Vec<SubclassRow>, StoreError> {
        let state = self.lock()?;
        state.node(node)?;
        let mut rows = Vec::new();
        for step in join.steps() {
            match state.subclass_rows.get(&(node, step.clone())) {
                Some(row) => rows.push(row.clone()),
                None => break,
            }
        }
        drop(state);
        Ok(rows)
    }

    fn add_root(&self, node: NewNode) -> Result<TreeNode, StoreError> {
        let mut state = self.lock()?;
        let path = state.next_path(&self.spec, None)?;
        state.insert_node(&self.spec, path, node)
    }

    fn add_child(&self, parent: NodeId, node: NewNode) -> Result<TreeNode, StoreError> {
        let mut state = self.lock()?;
        let parent = state.node(parent)?.clone();
        let path = state.next_path(&self.spec, Some(&parent))?;
        state.insert_node(&self.spec, path, node)
    }

    fn save_subclass_row(&self, node: NodeId, row: &SubclassRow) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.node(node)?;
        state.subclass_rows.insert((node, row.type_name.clone()), row.clone());
        drop(state);
        Ok(())
    }

    fn move_subtree(&self, node: NodeId, new_parent: Option<NodeId>) -> Result<TreeNode, StoreError> {
        let mut state = self.lock()?;
        let moved = state.node(node)?.clone();
        let parent = match new_parent {
            Some(id) => Some(state.node(id)?.clone()),
            None => None,
        };
        if let Some(parent) = &parent
            && parent.path.starts_with(&moved.path)
        {
            return Err(StoreError::Invalid(format!("cannot move node {node} below itself")));
        }
        let new_path = state.next_path(&self.spec, parent.as_ref())?;
        let old_path = moved.path;
        for entry in state.nodes.values_mut().filter(|entry| entry.path.starts_with(&old_path)) {
            entry.path = self.spec.rebase(&entry.path, &old_path, &new_path);
            entry.depth = self.spec.depth_of(&entry.path);
        }
        Ok(state.node(node)?.clone())
    }

    fn delete_subtree(&self, node: NodeId) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let root = state.node(node)?.path.clone();
        let doomed: BTreeSet<NodeId> =
            state.nodes.values().filter(|entry| entry.path.starts_with(&root)).map(|entry| entry.id).collect();
        state.nodes.retain(|id, _| !doomed.contains(id));
        state.subclass_rows.retain(|(id, _), _| !doomed.contains(id));
        drop(state);
        Ok(count_of(doomed.len()))
    }
}

impl TenantStore for InMemoryStore {
    fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let state = self.lock()?;
        Ok(state.tenants.values().cloned().collect())
    }

    fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, StoreError> {
        let state = self.lock()?;
        Ok(state.tenants.get(&id).cloned())
    }

    fn insert_tenant(&self, uuid: Uuid, draft: &TenantDraft) -> Result<Tenant, StoreError> {
        let mut state = self.lock()?;
        state.check_tenant_unique(None, draft)?;
        state.last_tenant += 1;
        let tenant = Tenant {
            id: TenantId::new(nonzero(state.last_tenant)?),
            uuid,
            label: draft.label.clone(),
            hostname: draft.hostname.clone(),
            port: draft.port,
            is_open: draft.is_open,
        };
        state.tenants.insert(tenant.id, tenant.clone());
        drop(state);
        Ok(tenant)
    }

    fn update_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if !state.tenants.contains_key(&tenant.id) {
            return Err(StoreError::NotFound(format!("tenant {}", tenant.id)));
        }
        state.check_tenant_unique(Some(tenant.id), &TenantDraft::from(tenant))?;
        state.tenants.insert(tenant.id, tenant.clone());
        drop(state);
        Ok(())
    }

    fn delete_tenant(&self, id: TenantId) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if state.tenants.remove(&id).is_none() {
            return Ok(false);
        }
        state.members.retain(|_, member| member.native_tenant != id);
        state.shares.retain(|share| share.sender != id && share.recipient != id);
        drop(state);
        Ok(true)
    }

    fn save_share(&self, share: &SharedTenantMember) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let duplicate = state.shares.iter().any(|existing| {
            existing.recipient == share.recipient
                && existing.content_type_id == share.content_type_id
                && existing.object_id == share.object_id
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "object {} is already shared with tenant {}",
                share.object_id, share.recipient
            )));
        }
        state.shares.push(share.clone());
        drop(state);
        Ok(())
    }

    fn list_shares(&self, recipient: TenantId) -> Result<Vec<SharedTenantMember>, StoreError> {
        let state = self.lock()?;
        Ok(state.shares.iter().filter(|share| share.recipient == recipient).cloned().collect())
    }
}

impl MemberStore for InMemoryStore {
    fn save_member(&self, member: &MemberRecord) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.members.insert((member.content_type_id, member.key.clone()), member.clone());
        drop(state);
        Ok(())
    }

    fn fetch_members(&self, filter: &Filter) -> Result<Vec<MemberRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state.members.values().filter(|member| filter.matches(*member, &*state)).cloned().collect())
    }

    fn count_members(&self, filter: &Filter) -> Result<u64, StoreError> {
        let state = self.lock()?;
        Ok(count_of(state.members.values().filter(|member| filter.matches(*member, &*state)).count()))
    }
}
