// crates/arbor-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Record Store
// Description: Durable tree, tenant, and member storage backed by SQLite WAL.
// Purpose: Persist Arbor records and evaluate filters inside the database.
// Dependencies: arbor-core, rusqlite, serde, serde_json, thiserror, tracing, uuid
// ============================================================================

//! ## Overview
//! [`SqliteRecordStore`] implements every Arbor store interface on one
//! `SQLite` connection. Filters are compiled to SQL by
//! [`crate::filter_sql`]; joined subclass rows and child ids are loaded with
//! follow-up statements under the same lock. The path layout is recorded in
//! `store_meta` and checked on every open.
//! Security posture: database contents are untrusted; ids, paths, and field
//! payloads are validated when rows are decoded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::num::NonZeroU64;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use arbor_core::CHILDREN_RELATION;
use arbor_core::ContentTypeId;
use arbor_core::ContentTypeStore;
use arbor_core::FetchRequest;
use arbor_core::FetchedNode;
use arbor_core::FieldMap;
use arbor_core::Filter;
use arbor_core::JoinPath;
use arbor_core::MemberRecord;
use arbor_core::MemberStore;
use arbor_core::NewNode;
use arbor_core::NodeId;
use arbor_core::PathSpec;
use arbor_core::PrimaryKeyKind;
use arbor_core::RecordKey;
use arbor_core::SharedTenantMember;
use arbor_core::StoreError;
use arbor_core::SubclassRow;
use arbor_core::Tenant;
use arbor_core::TenantDraft;
use arbor_core::TenantId;
use arbor_core::TenantStore;
use arbor_core::TreeNode;
use arbor_core::TreePath;
use arbor_core::TreeStore;
use arbor_core::TypeName;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::filter_sql::RowTarget;
use crate::filter_sql::compile;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum encoded field payload accepted per row.
pub const MAX_FIELDS_BYTES: usize = 1024 * 1024;

/// Columns selected for generic tree rows.
const NODE_COLUMNS: &str = "n.id, n.path, n.depth, n.content_type_id, n.fields_json";
/// Columns selected for member rows.
const MEMBER_COLUMNS: &str =
    "m.content_type_id, m.key_kind, m.key_text, m.native_tenant_id, m.fields_json";
/// Columns selected for tenants.
const TENANT_COLUMNS: &str = "id, uuid, label, hostname, port, is_open";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` record store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a config with default pragmas for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored rows violate store invariants.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version or layout mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid input data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Write collides with a uniqueness constraint.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
    /// Referenced row is missing.
    #[error("sqlite store missing row: {0}")]
    NotFound(String),
    /// Field payload exceeded the size limit.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
            SqliteStoreError::TooLarge { max_bytes, actual_bytes } => Self::Invalid(format!(
                "fields_json exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

/// Maps an engine error into [`SqliteStoreError::Db`].
pub(crate) fn db_error(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed record store with WAL support.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Path layout used for path allocation and validation.
    spec: PathSpec,
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Opens an `SQLite`-backed record store for the given path layout.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized, or when it was created with a different path layout.
    pub fn new(config: SqliteStoreConfig, spec: PathSpec) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection, &spec)?;
        tracing::debug!(
            path = %config.path.display(),
            steplen = spec.steplen(),
            "opened sqlite record store"
        );
        Ok(Self { config, spec, connection: Arc::new(Mutex::new(connection)) })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Returns the path layout.
    #[must_use]
    pub const fn path_spec(&self) -> &PathSpec {
        &self.spec
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Content Types
// ============================================================================

impl ContentTypeStore for SqliteRecordStore {
    fn ensure_content_type(&self, name: &TypeName) -> Result<ContentTypeId, StoreError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO content_types (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
                params![name.as_str()],
            )
            .map_err(db_error)?;
        let raw: i64 = guard
            .query_row("SELECT id FROM content_types WHERE name = ?1", params![name.as_str()], |row| {
                row.get(0)
            })
            .map_err(db_error)?;
        drop(guard);
        Ok(ContentTypeId::new(row_id(raw, "content type")?))
    }

    fn content_type_ids(
        &self,
        names: &BTreeSet<TypeName>,
    ) -> Result<BTreeMap<TypeName, ContentTypeId>, StoreError> {
        Ok(self
            .content_types()?
            .into_iter()
            .filter(|(name, _)| names.contains(name))
            .collect())
    }

    fn content_type_names(
        &self,
        ids: &BTreeSet<ContentTypeId>,
    ) -> Result<BTreeMap<ContentTypeId, TypeName>, StoreError> {
        Ok(self
            .content_types()?
            .into_iter()
            .filter(|(_, id)| ids.contains(id))
            .map(|(name, id)| (id, name))
            .collect())
    }
}

impl SqliteRecordStore {
    /// Loads the full content type table.
    fn content_types(&self) -> Result<BTreeMap<TypeName, ContentTypeId>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement =
            guard.prepare("SELECT name, id FROM content_types ORDER BY id").map_err(db_error)?;
        let rows = statement
            .query_map(params![], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        drop(statement);
        drop(guard);
        rows.into_iter()
            .map(|(name, raw)| Ok((TypeName::new(name), ContentTypeId::new(row_id(raw, "content type")?))))
            .collect()
    }
}

// ============================================================================
// SECTION: Tree Store
// ============================================================================

impl TreeStore for SqliteRecordStore {
    fn fetch_nodes(&self, request: &FetchRequest) -> Result<Vec<FetchedNode>, StoreError> {
        self.fetch_node_rows(request).map_err(StoreError::from)
    }

    fn count_nodes(&self, filter: &Filter) -> Result<u64, StoreError> {
        let guard = self.lock()?;
        let compiled = compile(&guard, RowTarget::Node, filter)?;
        let count: i64 = guard
            .query_row(
                &format!("SELECT COUNT(*) FROM tree_nodes n WHERE {}", compiled.sql),
                params_from_iter(compiled.params.iter()),
                |row| row.get(0),
            )
            .map_err(db_error)?;
        drop(guard);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn fetch_paths(&self, filter: &Filter) -> Result<Vec<TreePath>, StoreError> {
        let guard = self.lock()?;
        let compiled = compile(&guard, RowTarget::Node, filter)?;
        let mut statement = guard
            .prepare(&format!("SELECT n.path FROM tree_nodes n WHERE {} ORDER BY n.path", compiled.sql))
            .map_err(db_error)?;
        let raw = statement
            .query_map(params_from_iter(compiled.params.iter()), |row| row.get::<_, String>(0))
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        drop(statement);
        drop(guard);
        raw.iter()
            .map(|path| {
                self.spec.parse(path).map_err(|err| StoreError::Corrupt(err.to_string()))
            })
            .collect()
    }

    fn load_subclass_rows(
        &self,
        node: NodeId,
        join: &JoinPath,
    ) -> Result<Vec<SubclassRow>, StoreError> {
        let guard = self.lock()?;
        ensure_node(&guard, node)?;
        let mut statement = guard
            .prepare("SELECT fields_json FROM specific_rows WHERE node_id = ?1 AND type_name = ?2")
            .map_err(db_error)?;
        let mut rows = Vec::new();
        for step in join.steps() {
            let fields: Option<String> = statement
                .query_row(params![sql_int(node.get())?, step.as_str()], |row| row.get(0))
                .optional()
                .map_err(db_error)?;
            let Some(fields) = fields else {
                break;
            };
            rows.push(SubclassRow::new(step.clone(), decode_fields(&fields)?));
        }
        drop(statement);
        drop(guard);
        Ok(rows)
    }

    fn add_root(&self, node: NewNode) -> Result<TreeNode, StoreError> {
        self.insert_node(None, node, &[]).map_err(StoreError::from)
    }

    fn add_child(&self, parent: NodeId, node: NewNode) -> Result<TreeNode, StoreError> {
        self.insert_node(Some(parent), node, &[]).map_err(StoreError::from)
    }

    fn add_node_with_rows(
        &self,
        parent: Option<NodeId>,
        node: NewNode,
        rows: &[SubclassRow],
    ) -> Result<TreeNode, StoreError> {
        self.insert_node(parent, node, rows).map_err(StoreError::from)
    }

    fn save_subclass_row(&self, node: NodeId, row: &SubclassRow) -> Result<(), StoreError> {
        let fields = encode_fields(&row.fields)?;
        let guard = self.lock()?;
        ensure_node(&guard, node)?;
        guard
            .execute(
                "INSERT INTO specific_rows (node_id, type_name, fields_json) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(node_id, type_name) DO UPDATE SET fields_json = excluded.fields_json",
                params![sql_int(node.get())?, row.type_name.as_str(), fields],
            )
            .map_err(db_error)?;
        drop(guard);
        Ok(())
    }

    fn move_subtree(
        &self,
        node: NodeId,
        new_parent: Option<NodeId>,
    ) -> Result<TreeNode, StoreError> {
        self.move_node(node, new_parent).map_err(StoreError::from)
    }

    fn delete_subtree(&self, node: NodeId) -> Result<u64, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_error)?;
        let root = load_node(&tx, &self.spec, node)?;
        let removed = tx
            .execute(
                "DELETE FROM tree_nodes WHERE substr(path, 1, ?1) = ?2",
                params![sql_int(count_of(root.path.len()))?, root.path.as_str()],
            )
            .map_err(db_error)?;
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(count_of(removed))
    }

    fn readiness(&self) -> Result<(), StoreError> {
        let guard = self.lock()?;
        guard.query_row("SELECT 1", params![], |row| row.get::<_, i64>(0)).map_err(db_error)?;
        drop(guard);
        Ok(())
    }
}

impl SqliteRecordStore {
    /// Fetches matching rows plus joins, deferrals, and prefetched children.
    fn fetch_node_rows(&self, request: &FetchRequest) -> Result<Vec<FetchedNode>, SqliteStoreError> {
        let guard = self.lock()?;
        let compiled = compile(&guard, RowTarget::Node, &request.filter)?;
        let mut params = compiled.params;
        let distinct = if request.distinct { "DISTINCT " } else { "" };
        let mut sql = format!(
            "SELECT {distinct}{NODE_COLUMNS} FROM tree_nodes n WHERE {} ORDER BY n.path",
            compiled.sql
        );
        if let Some(limit) = request.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }
        let mut statement = guard.prepare(&sql).map_err(db_error)?;
        let raw = statement
            .query_map(params_from_iter(params.iter()), RawNode::from_row)
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        drop(statement);
        let joined_types = request.joined_types();
        let mut rows = Vec::with_capacity(raw.len());
        for raw_node in raw {
            let node = raw_node.decode(&self.spec)?;
            let joined = if joined_types.is_empty() {
                BTreeMap::new()
            } else {
                joined_rows(&guard, node.id, &joined_types)?
            };
            let mut fetched = FetchedNode { node, joined };
            request.apply_deferrals(&mut fetched);
            if request.prefetch_children {
                let children = child_ids(&guard, &fetched.node)?;
                fetched.node.prefetched.insert(CHILDREN_RELATION.to_string(), children);
            }
            rows.push(fetched);
        }
        drop(guard);
        Ok(rows)
    }

    /// Inserts a node as the last child of `parent` (or a new root) with its subclass rows.
    fn insert_node(
        &self,
        parent: Option<NodeId>,
        node: NewNode,
        rows: &[SubclassRow],
    ) -> Result<TreeNode, SqliteStoreError> {
        let fields = encode_fields(&node.fields)?;
        let encoded_rows = rows
            .iter()
            .map(|row| Ok((row.type_name.as_str(), encode_fields(&row.fields)?)))
            .collect::<Result<Vec<_>, SqliteStoreError>>()?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_error)?;
        let parent = parent.map(|id| load_node(&tx, &self.spec, id)).transpose()?;
        let path = next_path(&tx, &self.spec, parent.as_ref())?;
        let depth = self.spec.depth_of(&path);
        tx.execute(
            "INSERT INTO tree_nodes (path, depth, content_type_id, fields_json) VALUES (?1, ?2, \
             ?3, ?4)",
            params![path.as_str(), i64::from(depth), sql_int(node.content_type_id.get())?, fields],
        )
        .map_err(db_error)?;
        let id = NodeId::new(row_id(tx.last_insert_rowid(), "tree node")?);
        for (type_name, row_fields) in &encoded_rows {
            tx.execute(
                "INSERT INTO specific_rows (node_id, type_name, fields_json) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(node_id, type_name) DO UPDATE SET fields_json = excluded.fields_json",
                params![sql_int(id.get())?, type_name, row_fields],
            )
            .map_err(db_error)?;
        }
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(TreeNode {
            id,
            path,
            depth,
            content_type_id: node.content_type_id,
            fields: node.fields,
            deferred: BTreeSet::new(),
            prefetched: BTreeMap::new(),
        })
    }

    /// Rebases a subtree under a new parent.
    fn move_node(
        &self,
        node: NodeId,
        new_parent: Option<NodeId>,
    ) -> Result<TreeNode, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_error)?;
        let moved = load_node(&tx, &self.spec, node)?;
        let parent = new_parent.map(|id| load_node(&tx, &self.spec, id)).transpose()?;
        if let Some(parent) = &parent
            && parent.path.starts_with(&moved.path)
        {
            return Err(SqliteStoreError::Invalid(format!("cannot move node {node} below itself")));
        }
        let new_path = next_path(&tx, &self.spec, parent.as_ref())?;
        let depth_shift =
            i64::from(self.spec.depth_of(&new_path)) - i64::from(self.spec.depth_of(&moved.path));
        let old_len = sql_int(count_of(moved.path.len()))?;
        tx.execute(
            "UPDATE tree_nodes SET path = ?1 || substr(path, ?2 + 1), depth = depth + ?3 WHERE \
             substr(path, 1, ?2) = ?4",
            params![new_path.as_str(), old_len, depth_shift, moved.path.as_str()],
        )
        .map_err(db_error)?;
        let updated = load_node(&tx, &self.spec, node)?;
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(updated)
    }
}

// ============================================================================
// SECTION: Tenant Store
// ============================================================================

impl TenantStore for SqliteRecordStore {
    fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(&format!("SELECT {TENANT_COLUMNS} FROM tenants ORDER BY id"))
            .map_err(db_error)?;
        let raw = statement
            .query_map(params![], RawTenant::from_row)
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        drop(statement);
        drop(guard);
        raw.into_iter().map(|tenant| tenant.decode().map_err(StoreError::from)).collect()
    }

    fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, StoreError> {
        let guard = self.lock()?;
        let tenant = load_tenant(&guard, id)?;
        drop(guard);
        Ok(tenant)
    }

    fn insert_tenant(&self, uuid: Uuid, draft: &TenantDraft) -> Result<Tenant, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_error)?;
        check_tenant_unique(&tx, None, draft)?;
        tx.execute(
            "INSERT INTO tenants (uuid, label, hostname, port, is_open) VALUES (?1, ?2, ?3, ?4, \
             ?5)",
            params![
                uuid.hyphenated().to_string(),
                draft.label,
                draft.hostname,
                i64::from(draft.port),
                draft.is_open
            ],
        )
        .map_err(db_error)?;
        let id = TenantId::new(row_id(tx.last_insert_rowid(), "tenant")?);
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(Tenant {
            id,
            uuid,
            label: draft.label.clone(),
            hostname: draft.hostname.clone(),
            port: draft.port,
            is_open: draft.is_open,
        })
    }

    fn update_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_error)?;
        if load_tenant(&tx, tenant.id)?.is_none() {
            return Err(StoreError::NotFound(format!("tenant {}", tenant.id)));
        }
        check_tenant_unique(&tx, Some(tenant.id), &TenantDraft::from(tenant))?;
        tx.execute(
            "UPDATE tenants SET uuid = ?1, label = ?2, hostname = ?3, port = ?4, is_open = ?5 \
             WHERE id = ?6",
            params![
                tenant.uuid.hyphenated().to_string(),
                tenant.label,
                tenant.hostname,
                i64::from(tenant.port),
                tenant.is_open,
                sql_int(tenant.id.get())?
            ],
        )
        .map_err(db_error)?;
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(())
    }

    fn delete_tenant(&self, id: TenantId) -> Result<bool, StoreError> {
        let guard = self.lock()?;
        let removed = guard
            .execute("DELETE FROM tenants WHERE id = ?1", params![sql_int(id.get())?])
            .map_err(db_error)?;
        drop(guard);
        Ok(removed > 0)
    }

    fn save_share(&self, share: &SharedTenantMember) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_error)?;
        let recipient = sql_int(share.recipient.get())?;
        let content_type = sql_int(share.content_type_id.get())?;
        let duplicate: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM shared_tenant_members WHERE recipient_id = ?1 AND content_type_id \
                 = ?2 AND object_id = ?3",
                params![recipient, content_type, share.object_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        if duplicate.is_some() {
            return Err(StoreError::Conflict(format!(
                "object {} is already shared with tenant {}",
                share.object_id, share.recipient
            )));
        }
        tx.execute(
            "INSERT INTO shared_tenant_members (sender_id, recipient_id, content_type_id, \
             object_id) VALUES (?1, ?2, ?3, ?4)",
            params![sql_int(share.sender.get())?, recipient, content_type, share.object_id],
        )
        .map_err(db_error)?;
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(())
    }

    fn list_shares(&self, recipient: TenantId) -> Result<Vec<SharedTenantMember>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT sender_id, recipient_id, content_type_id, object_id FROM \
                 shared_tenant_members WHERE recipient_id = ?1 ORDER BY rowid",
            )
            .map_err(db_error)?;
        let raw = statement
            .query_map(params![sql_int(recipient.get())?], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        drop(statement);
        drop(guard);
        raw.into_iter()
            .map(|(sender, recipient, content_type, object_id)| {
                Ok(SharedTenantMember {
                    sender: TenantId::new(row_id(sender, "tenant")?),
                    recipient: TenantId::new(row_id(recipient, "tenant")?),
                    content_type_id: ContentTypeId::new(row_id(content_type, "content type")?),
                    object_id,
                })
            })
            .collect()
    }
}

// ============================================================================
// SECTION: Member Store
// ============================================================================

impl MemberStore for SqliteRecordStore {
    fn save_member(&self, member: &MemberRecord) -> Result<(), StoreError> {
        let fields = encode_fields(&member.fields)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO tenant_members (content_type_id, key_kind, key_text, \
                 native_tenant_id, fields_json) VALUES (?1, ?2, ?3, ?4, ?5) ON \
                 CONFLICT(content_type_id, key_kind, key_text) DO UPDATE SET native_tenant_id = \
                 excluded.native_tenant_id, fields_json = excluded.fields_json",
                params![
                    sql_int(member.content_type_id.get())?,
                    key_kind_label(member.key.kind()),
                    member.key.to_object_id(),
                    sql_int(member.native_tenant.get())?,
                    fields
                ],
            )
            .map_err(db_error)?;
        drop(guard);
        Ok(())
    }

    fn fetch_members(&self, filter: &Filter) -> Result<Vec<MemberRecord>, StoreError> {
        let guard = self.lock()?;
        let compiled = compile(&guard, RowTarget::Member, filter)?;
        let mut statement = guard
            .prepare(&format!(
                "SELECT {MEMBER_COLUMNS} FROM tenant_members m WHERE {}",
                compiled.sql
            ))
            .map_err(db_error)?;
        let raw = statement
            .query_map(params_from_iter(compiled.params.iter()), RawMember::from_row)
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        drop(statement);
        drop(guard);
        let mut members =
            raw.into_iter().map(RawMember::decode).collect::<Result<Vec<_>, _>>()?;
        members.sort_by(|left, right| {
            (left.content_type_id, &left.key).cmp(&(right.content_type_id, &right.key))
        });
        Ok(members)
    }

    fn count_members(&self, filter: &Filter) -> Result<u64, StoreError> {
        let guard = self.lock()?;
        let compiled = compile(&guard, RowTarget::Member, filter)?;
        let count: i64 = guard
            .query_row(
                &format!("SELECT COUNT(*) FROM tenant_members m WHERE {}", compiled.sql),
                params_from_iter(compiled.params.iter()),
                |row| row.get(0),
            )
            .map_err(db_error)?;
        drop(guard);
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

// ============================================================================
// SECTION: Raw Rows
// ============================================================================

/// Undecoded `tree_nodes` row.
struct RawNode {
    /// Row id.
    id: i64,
    /// Stored path.
    path: String,
    /// Stored depth.
    depth: i64,
    /// Content type id.
    content_type_id: i64,
    /// Encoded generic fields.
    fields_json: String,
}

impl RawNode {
    /// Reads a row selected with [`NODE_COLUMNS`].
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            depth: row.get(2)?,
            content_type_id: row.get(3)?,
            fields_json: row.get(4)?,
        })
    }

    /// Validates the row against the path layout.
    fn decode(self, spec: &PathSpec) -> Result<TreeNode, SqliteStoreError> {
        let path = spec.parse(&self.path).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
        let depth = spec.depth_of(&path);
        if i64::from(depth) != self.depth {
            return Err(SqliteStoreError::Corrupt(format!(
                "node {} stores depth {} for path {path}",
                self.id, self.depth
            )));
        }
        Ok(TreeNode {
            id: NodeId::new(row_id(self.id, "tree node")?),
            path,
            depth,
            content_type_id: ContentTypeId::new(row_id(self.content_type_id, "content type")?),
            fields: decode_fields(&self.fields_json)?,
            deferred: BTreeSet::new(),
            prefetched: BTreeMap::new(),
        })
    }
}

/// Undecoded `tenant_members` row.
struct RawMember {
    /// Content type id.
    content_type_id: i64,
    /// Key kind label.
    key_kind: String,
    /// Key in canonical string form.
    key_text: String,
    /// Owning tenant id.
    native_tenant_id: i64,
    /// Encoded fields.
    fields_json: String,
}

impl RawMember {
    /// Reads a row selected with [`MEMBER_COLUMNS`].
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            content_type_id: row.get(0)?,
            key_kind: row.get(1)?,
            key_text: row.get(2)?,
            native_tenant_id: row.get(3)?,
            fields_json: row.get(4)?,
        })
    }

    /// Decodes the stored key and fields.
    fn decode(self) -> Result<MemberRecord, SqliteStoreError> {
        let kind = parse_key_kind(&self.key_kind)?;
        let key = RecordKey::parse_as(&self.key_text, kind).ok_or_else(|| {
            SqliteStoreError::Corrupt(format!("member key {} is not a valid {}", self.key_text, self.key_kind))
        })?;
        Ok(MemberRecord {
            content_type_id: ContentTypeId::new(row_id(self.content_type_id, "content type")?),
            key,
            native_tenant: TenantId::new(row_id(self.native_tenant_id, "tenant")?),
            fields: decode_fields(&self.fields_json)?,
        })
    }
}

/// Undecoded `tenants` row.
struct RawTenant {
    /// Row id.
    id: i64,
    /// External id.
    uuid: String,
    /// Label.
    label: String,
    /// Optional hostname.
    hostname: Option<String>,
    /// Port.
    port: i64,
    /// Open flag.
    is_open: bool,
}

impl RawTenant {
    /// Reads a row selected with [`TENANT_COLUMNS`].
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            uuid: row.get(1)?,
            label: row.get(2)?,
            hostname: row.get(3)?,
            port: row.get(4)?,
            is_open: row.get(5)?,
        })
    }

    /// Validates ids and the port range.
    fn decode(self) -> Result<Tenant, SqliteStoreError> {
        let uuid = Uuid::parse_str(&self.uuid)
            .map_err(|err| SqliteStoreError::Corrupt(format!("tenant {} uuid: {err}", self.id)))?;
        let port = u16::try_from(self.port)
            .map_err(|_| SqliteStoreError::Corrupt(format!("tenant {} port {}", self.id, self.port)))?;
        Ok(Tenant {
            id: TenantId::new(row_id(self.id, "tenant")?),
            uuid,
            label: self.label,
            hostname: self.hostname,
            port,
            is_open: self.is_open,
        })
    }
}

// ============================================================================
// SECTION: Row Helpers
// ============================================================================

/// Loads one node or fails with [`SqliteStoreError::NotFound`].
fn load_node(
    connection: &Connection,
    spec: &PathSpec,
    id: NodeId,
) -> Result<TreeNode, SqliteStoreError> {
    let raw = connection
        .query_row(
            &format!("SELECT {NODE_COLUMNS} FROM tree_nodes n WHERE n.id = ?1"),
            params![sql_int(id.get())?],
            RawNode::from_row,
        )
        .optional()
        .map_err(db_error)?;
    raw.ok_or_else(|| SqliteStoreError::NotFound(format!("node {id}")))?.decode(spec)
}

/// Fails with [`SqliteStoreError::NotFound`] when the node is missing.
fn ensure_node(connection: &Connection, id: NodeId) -> Result<(), SqliteStoreError> {
    let found: Option<i64> = connection
        .query_row("SELECT 1 FROM tree_nodes WHERE id = ?1", params![sql_int(id.get())?], |row| {
            row.get(0)
        })
        .optional()
        .map_err(db_error)?;
    found.map(|_| ()).ok_or_else(|| SqliteStoreError::NotFound(format!("node {id}")))
}

/// Allocates the next child path below `parent` (roots when `None`).
fn next_path(
    connection: &Connection,
    spec: &PathSpec,
    parent: Option<&TreeNode>,
) -> Result<TreePath, SqliteStoreError> {
    let (prefix, depth) = match parent {
        Some(parent) => (parent.path.clone(), parent.depth + 1),
        None => (TreePath::empty(), 1),
    };
    let last: Option<String> = connection
        .query_row(
            "SELECT path FROM tree_nodes WHERE depth = ?1 AND substr(path, 1, ?2) = ?3 ORDER BY \
             path DESC LIMIT 1",
            params![i64::from(depth), sql_int(count_of(prefix.len()))?, prefix.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error)?;
    let last = last.map(TreePath::new);
    spec.next_child(&prefix, last.as_ref()).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Loads the subclass rows of `node` for the joined types.
fn joined_rows(
    connection: &Connection,
    node: NodeId,
    types: &BTreeSet<TypeName>,
) -> Result<BTreeMap<TypeName, SubclassRow>, SqliteStoreError> {
    let mut statement = connection
        .prepare_cached("SELECT type_name, fields_json FROM specific_rows WHERE node_id = ?1")
        .map_err(db_error)?;
    let raw = statement
        .query_map(params![sql_int(node.get())?], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(db_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_error)?;
    let mut rows = BTreeMap::new();
    for (name, fields) in raw {
        let name = TypeName::new(name);
        if types.contains(&name) {
            rows.insert(name.clone(), SubclassRow::new(name, decode_fields(&fields)?));
        }
    }
    Ok(rows)
}

/// Loads child ids of `node` in path order.
fn child_ids(connection: &Connection, node: &TreeNode) -> Result<Vec<NodeId>, SqliteStoreError> {
    let mut statement = connection
        .prepare_cached(
            "SELECT id FROM tree_nodes WHERE depth = ?1 AND substr(path, 1, ?2) = ?3 ORDER BY \
             path",
        )
        .map_err(db_error)?;
    let raw = statement
        .query_map(
            params![
                i64::from(node.depth + 1),
                sql_int(count_of(node.path.len()))?,
                node.path.as_str()
            ],
            |row| row.get::<_, i64>(0),
        )
        .map_err(db_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_error)?;
    raw.into_iter().map(|id| Ok(NodeId::new(row_id(id, "tree node")?))).collect()
}

/// Loads one tenant.
fn load_tenant(connection: &Connection, id: TenantId) -> Result<Option<Tenant>, SqliteStoreError> {
    let raw = connection
        .query_row(
            &format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?1"),
            params![sql_int(id.get())?],
            RawTenant::from_row,
        )
        .optional()
        .map_err(db_error)?;
    raw.map(RawTenant::decode).transpose()
}

/// Rejects a tenant whose label or host/port collides with another tenant.
fn check_tenant_unique(
    connection: &Connection,
    own_id: Option<TenantId>,
    draft: &TenantDraft,
) -> Result<(), SqliteStoreError> {
    let own = own_id.map(|id| sql_int(id.get())).transpose()?.unwrap_or(0);
    let label_taken: Option<i64> = connection
        .query_row(
            "SELECT 1 FROM tenants WHERE label = ?1 AND id != ?2",
            params![draft.label, own],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error)?;
    if label_taken.is_some() {
        return Err(SqliteStoreError::Conflict(format!("tenant label {} exists", draft.label)));
    }
    if let Some(hostname) = &draft.hostname {
        let host_taken: Option<i64> = connection
            .query_row(
                "SELECT 1 FROM tenants WHERE hostname = ?1 AND port = ?2 AND id != ?3",
                params![hostname, i64::from(draft.port), own],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        if host_taken.is_some() {
            return Err(SqliteStoreError::Conflict(format!(
                "tenant host {hostname}:{} exists",
                draft.port
            )));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Encoding
// ============================================================================

/// Encodes a field map, enforcing [`MAX_FIELDS_BYTES`].
fn encode_fields(fields: &FieldMap) -> Result<String, SqliteStoreError> {
    let encoded =
        serde_json::to_string(fields).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    if encoded.len() > MAX_FIELDS_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_FIELDS_BYTES,
            actual_bytes: encoded.len(),
        });
    }
    Ok(encoded)
}

/// Decodes a stored field map, enforcing [`MAX_FIELDS_BYTES`].
fn decode_fields(raw: &str) -> Result<FieldMap, SqliteStoreError> {
    if raw.len() > MAX_FIELDS_BYTES {
        return Err(SqliteStoreError::TooLarge { max_bytes: MAX_FIELDS_BYTES, actual_bytes: raw.len() });
    }
    serde_json::from_str(raw).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

/// Returns the stored label of a key kind.
pub(crate) const fn key_kind_label(kind: PrimaryKeyKind) -> &'static str {
    match kind {
        PrimaryKeyKind::Integer => "integer",
        PrimaryKeyKind::Uuid => "uuid",
        PrimaryKeyKind::Text => "text",
    }
}

/// Parses a stored key kind label.
fn parse_key_kind(label: &str) -> Result<PrimaryKeyKind, SqliteStoreError> {
    match label {
        "integer" => Ok(PrimaryKeyKind::Integer),
        "uuid" => Ok(PrimaryKeyKind::Uuid),
        "text" => Ok(PrimaryKeyKind::Text),
        other => Err(SqliteStoreError::Corrupt(format!("unsupported key kind: {other}"))),
    }
}

/// Converts an id into an SQL integer.
pub(crate) fn sql_int(raw: u64) -> Result<i64, SqliteStoreError> {
    i64::try_from(raw).map_err(|_| SqliteStoreError::Invalid(format!("id {raw} exceeds i64")))
}

/// Converts a stored row id into a non-zero id.
fn row_id(raw: i64, what: &str) -> Result<NonZeroU64, SqliteStoreError> {
    u64::try_from(raw)
        .ok()
        .and_then(NonZeroU64::new)
        .ok_or_else(|| SqliteStoreError::Corrupt(format!("invalid {what} id {raw}")))
}

/// Converts a length or row count into `u64`.
fn count_of(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Setup
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    if path.components().any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH) {
        return Err(SqliteStoreError::Invalid(
            "store path contains an overlong component".to_string(),
        ));
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with durable defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(db_error)?;
    Ok(connection)
}

/// Creates the schema, or validates the version and path layout of an existing one.
fn initialize_schema(connection: &mut Connection, spec: &PathSpec) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(db_error)?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS store_meta (
            version INTEGER NOT NULL,
            steplen INTEGER NOT NULL,
            alphabet TEXT NOT NULL
        );",
    )
    .map_err(db_error)?;
    let meta: Option<(i64, i64, String)> = tx
        .query_row("SELECT version, steplen, alphabet FROM store_meta LIMIT 1", params![], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .optional()
        .map_err(db_error)?;
    let steplen = sql_int(count_of(spec.steplen()))?;
    match meta {
        None => {
            tx.execute(
                "INSERT INTO store_meta (version, steplen, alphabet) VALUES (?1, ?2, ?3)",
                params![SCHEMA_VERSION, steplen, spec.alphabet()],
            )
            .map_err(db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS content_types (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE
                );
                CREATE TABLE IF NOT EXISTS tree_nodes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    path TEXT NOT NULL UNIQUE,
                    depth INTEGER NOT NULL,
                    content_type_id INTEGER NOT NULL REFERENCES content_types(id),
                    fields_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_tree_nodes_depth ON tree_nodes (depth, path);
                CREATE TABLE IF NOT EXISTS specific_rows (
                    node_id INTEGER NOT NULL REFERENCES tree_nodes(id) ON DELETE CASCADE,
                    type_name TEXT NOT NULL,
                    fields_json TEXT NOT NULL,
                    PRIMARY KEY (node_id, type_name)
                );
                CREATE TABLE IF NOT EXISTS tenants (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    label TEXT NOT NULL UNIQUE,
                    hostname TEXT,
                    port INTEGER NOT NULL,
                    is_open INTEGER NOT NULL,
                    UNIQUE (hostname, port)
                );
                CREATE TABLE IF NOT EXISTS tenant_members (
                    content_type_id INTEGER NOT NULL REFERENCES content_types(id),
                    key_kind TEXT NOT NULL,
                    key_text TEXT NOT NULL,
                    native_tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                    fields_json TEXT NOT NULL,
                    PRIMARY KEY (content_type_id, key_kind, key_text)
                );
                CREATE INDEX IF NOT EXISTS idx_tenant_members_native
                    ON tenant_members (native_tenant_id);
                CREATE TABLE IF NOT EXISTS shared_tenant_members (
                    sender_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                    recipient_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                    content_type_id INTEGER NOT NULL REFERENCES content_types(id),
                    object_id TEXT NOT NULL,
                    UNIQUE (recipient_id, content_type_id, object_id)
                );",
            )
            .map_err(db_error)?;
        }
        Some((version, _, _)) if version != SCHEMA_VERSION => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {version}"
            )));
        }
        Some((_, stored_steplen, stored_alphabet))
            if stored_steplen != steplen || stored_alphabet != spec.alphabet() =>
        {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "store uses steplen {stored_steplen} with alphabet {stored_alphabet}"
            )));
        }
        Some(_) => {}
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}
