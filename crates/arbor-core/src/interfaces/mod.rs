// crates/arbor-core/src/interfaces/mod.rs
// ============================================================================
// Module: Arbor Interfaces
// Description: Backend-agnostic record store interfaces.
// Purpose: Define the contract surfaces used by the Arbor runtime.
// Dependencies: thiserror, uuid, crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how Arbor reads and writes tree nodes, content types,
//! tenants, and tenant members without embedding backend-specific details.
//! Implementations must return rows in path order and fail closed on invalid
//! stored data.
//!
//! Security posture: stored rows are untrusted input; implementations validate
//! identifiers and paths before handing rows to the runtime.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::core::filter::Filter;
use crate::core::identifiers::ContentTypeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::TenantId;
use crate::core::identifiers::TypeName;
use crate::core::path::TreePath;
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

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Record store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("record store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("record store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("record store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data is invalid.
    #[error("record store invalid data: {0}")]
    Invalid(String),
    /// Write conflicts with a uniqueness constraint.
    #[error("record store conflict: {0}")]
    Conflict(String),
    /// Referenced record does not exist.
    #[error("record store missing record: {0}")]
    NotFound(String),
    /// Store reported an error.
    #[error("record store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Content Types
// ============================================================================

/// Content type registry keyed by type name.
pub trait ContentTypeStore {
    /// Returns the id for a type name, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup or insert fails.
    fn ensure_content_type(&self, name: &TypeName) -> Result<ContentTypeId, StoreError>;

    /// Resolves many type names in one batch; unknown names are omitted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn content_type_ids(
        &self,
        names: &BTreeSet<TypeName>,
    ) -> Result<BTreeMap<TypeName, ContentTypeId>, StoreError>;

    /// Resolves many content type ids in one batch; unknown ids are omitted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn content_type_names(
        &self,
        ids: &BTreeSet<ContentTypeId>,
    ) -> Result<BTreeMap<ContentTypeId, TypeName>, StoreError>;
}

// ============================================================================
// SECTION: Tree Store
// ============================================================================

/// Materialized-path tree storage.
pub trait TreeStore {
    /// Fetches generic rows plus joined subclass rows in path order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn fetch_nodes(&self, request: &FetchRequest) -> Result<Vec<FetchedNode>, StoreError>;

    /// Counts rows matching the filter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn count_nodes(&self, filter: &Filter) -> Result<u64, StoreError>;

    /// Returns the paths of matching rows in path order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn fetch_paths(&self, filter: &Filter) -> Result<Vec<TreePath>, StoreError>;

    /// Loads subclass rows along a join path, stopping at the first missing step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn load_subclass_rows(
        &self,
        node: NodeId,
        join: &JoinPath,
    ) -> Result<Vec<SubclassRow>, StoreError>;

    /// Appends a new root node.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when allocation or the insert fails.
    fn add_root(&self, node: NewNode) -> Result<TreeNode, StoreError>;

    /// Appends a new last child under `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the parent is missing.
    fn add_child(&self, parent: NodeId, node: NewNode) -> Result<TreeNode, StoreError>;

    /// Inserts or replaces the subclass row of a node.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the node is missing.
    fn save_subclass_row(&self, node: NodeId, row: &SubclassRow) -> Result<(), StoreError>;

    /// Adds a node with its subclass rows; a failed row write leaves no node behind.
    ///
    /// The default removes the node again when a row fails to save. Backends
    /// with transactions should write the node and rows in one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the node or any row cannot be written.
    fn add_node_with_rows(
        &self,
        parent: Option<NodeId>,
        node: NewNode,
        rows: &[SubclassRow],
    ) -> Result<TreeNode, StoreError> {
        let added = match parent {
            Some(parent) => self.add_child(parent, node)?,
            None => self.add_root(node)?,
        };
        for row in rows {
            if let Err(err) = self.save_subclass_row(added.id, row) {
                self.delete_subtree(added.id)?;
                return Err(err);
            }
        }
        Ok(added)
    }

    /// Moves a subtree to become the last child of `new_parent` (or a new root).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when moving a node below itself.
    fn move_subtree(
        &self,
        node: NodeId,
        new_parent: Option<NodeId>,
    ) -> Result<TreeNode, StoreError>;

    /// Deletes a node and its entire descendant subtree, returning the removed count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the node is missing.
    fn delete_subtree(&self, node: NodeId) -> Result<u64, StoreError>;

    /// Reports store readiness for liveness/readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Tenant Store
// ============================================================================

/// Tenant and share-link storage.
pub trait TenantStore {
    /// Lists every tenant ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError>;

    /// Loads one tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, StoreError>;

    /// Inserts a tenant from a validated draft.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when a uniqueness constraint fails.
    fn insert_tenant(&self, uuid: Uuid, draft: &TenantDraft) -> Result<Tenant, StoreError>;

    /// Replaces a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the tenant is missing.
    fn update_tenant(&self, tenant: &Tenant) -> Result<(), StoreError>;

    /// Deletes a tenant with its members and share links; returns false when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    fn delete_tenant(&self, id: TenantId) -> Result<bool, StoreError>;

    /// Inserts a share link.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the link already exists.
    fn save_share(&self, share: &SharedTenantMember) -> Result<(), StoreError>;

    /// Lists share links received by a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn list_shares(&self, recipient: TenantId) -> Result<Vec<SharedTenantMember>, StoreError>;
}

// ============================================================================
// SECTION: Member Store
// ============================================================================

/// Tenant member storage.
pub trait MemberStore {
    /// Inserts or replaces a member keyed by `(content_type_id, key)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn save_member(&self, member: &MemberRecord) -> Result<(), StoreError>;

    /// Fetches matching members ordered by content type then key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn fetch_members(&self, filter: &Filter) -> Result<Vec<MemberRecord>, StoreError>;

    /// Counts matching members.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn count_members(&self, filter: &Filter) -> Result<u64, StoreError>;
}

// ============================================================================
// SECTION: Shared Handles
// ============================================================================

impl<T: ContentTypeStore + ?Sized> ContentTypeStore for Arc<T> {
    fn ensure_content_type(&self, name: &TypeName) -> Result<ContentTypeId, StoreError> {
        (**self).ensure_content_type(name)
    }

    fn content_type_ids(
        &self,
        names: &BTreeSet<TypeName>,
    ) -> Result<BTreeMap<TypeName, ContentTypeId>, StoreError> {
        (**self).content_type_ids(names)
    }

    fn content_type_names(
        &self,
        ids: &BTreeSet<ContentTypeId>,
    ) -> Result<BTreeMap<ContentTypeId, TypeName>, StoreError> {
        (**self).content_type_names(ids)
    }
}

impl<T: TreeStore + ?Sized> TreeStore for Arc<T> {
    fn fetch_nodes(&self, request: &FetchRequest) -> Result<Vec<FetchedNode>, StoreError> {
        (**self).fetch_nodes(request)
    }

    fn count_nodes(&self, filter: &Filter) -> Result<u64, StoreError> {
        (**self).count_nodes(filter)
    }

    fn fetch_paths(&self, filter: &Filter) -> Result<Vec<TreePath>, StoreError> {
        (**self).fetch_paths(filter)
    }

    fn load_subclass_rows(
        &self,
        node: NodeId,
        join: &JoinPath,
    ) -> Result<Vec<SubclassRow>, StoreError> {
        (**self).load_subclass_rows(node, join)
    }

    fn add_root(&self, node: NewNode) -> Result<TreeNode, StoreError> {
        (**self).add_root(node)
    }

    fn add_child(&self, parent: NodeId, node: NewNode) -> Result<TreeNode, StoreError> {
        (**self).add_child(parent, node)
    }

    fn save_subclass_row(&self, node: NodeId, row: &SubclassRow) -> Result<(), StoreError> {
        (**self).save_subclass_row(node, row)
    }

    fn add_node_with_rows(
        &self,
        parent: Option<NodeId>,
        node: NewNode,
        rows: &[SubclassRow],
    ) -> Result<TreeNode, StoreError> {
        (**self).add_node_with_rows(parent, node, rows)
    }

    fn move_subtree(
        &self,
        node: NodeId,
        new_parent: Option<NodeId>,
    ) -> Result<TreeNode, StoreError> {
        (**self).move_subtree(node, new_parent)
    }

    fn delete_subtree(&self, node: NodeId) -> Result<u64, StoreError> {
        (**self).delete_subtree(node)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        (**self).readiness()
    }
}

impl<T: TenantStore + ?Sized> TenantStore for Arc<T> {
    fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        (**self).list_tenants()
    }

    fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, StoreError> {
        (**self).get_tenant(id)
    }

    fn insert_tenant(&self, uuid: Uuid, draft: &TenantDraft) -> Result<Tenant, StoreError> {
        (**self).insert_tenant(uuid, draft)
    }

    fn update_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        (**self).update_tenant(tenant)
    }

    fn delete_tenant(&self, id: TenantId) -> Result<bool, StoreError> {
        (**self).delete_tenant(id)
    }

    fn save_share(&self, share: &SharedTenantMember) -> Result<(), StoreError> {
        (**self).save_share(share)
    }

    fn list_shares(&self, recipient: TenantId) -> Result<Vec<SharedTenantMember>, StoreError> {
        (**self).list_shares(recipient)
    }
}

impl<T: MemberStore + ?Sized> MemberStore for Arc<T> {
    fn save_member(&self, member: &MemberRecord) -> Result<(), StoreError> {
        (**self).save_member(member)
    }

    fn fetch_members(&self, filter: &Filter) -> Result<Vec<MemberRecord>, StoreError> {
        (**self).fetch_members(filter)
    }

    fn count_members(&self, filter: &Filter) -> Result<u64, StoreError> {
        (**self).count_members(filter)
    }
}
