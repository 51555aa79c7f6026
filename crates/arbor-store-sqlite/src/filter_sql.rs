// crates/arbor-store-sqlite/src/filter_sql.rs
// ============================================================================
// Module: SQLite Filter Compiler
// Description: Compiles Arbor filter trees into SQLite predicates.
// Purpose: Push row filtering into SQL while matching in-process semantics.
// Dependencies: arbor-core, rusqlite, serde_json, tracing
// ============================================================================

//! ## Overview
//! [`compile`] turns a [`Filter`] into a `WHERE` fragment plus positional
//! parameters. Every leaf is wrapped in `COALESCE(.., 0)` so a leaf yields 0
//! or 1 and never NULL; negation therefore behaves like [`Filter::matches`].
//! Share-link conditions are resolved against the link table first, so link
//! object ids are coerced with [`RecordKey::parse_as`] exactly as the
//! in-memory store does.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use arbor_core::Condition;
use arbor_core::FieldValue;
use arbor_core::Filter;
use arbor_core::PrimaryKeyKind;
use arbor_core::RecordKey;
use arbor_core::TenantId;
use arbor_core::TypeName;
use rusqlite::Connection;
use rusqlite::params;
use rusqlite::types::Value;

use crate::store::SqliteStoreError;
use crate::store::db_error;
use crate::store::key_kind_label;
use crate::store::sql_int;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Predicate that matches no row.
const SQL_FALSE: &str = "0";
/// Predicate that matches every row.
const SQL_TRUE: &str = "1";

// ============================================================================
// SECTION: Targets
// ============================================================================

/// Table a compiled predicate runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowTarget {
    /// `tree_nodes` aliased as `n`.
    Node,
    /// `tenant_members` aliased as `m`.
    Member,
}

impl RowTarget {
    /// Returns the content type column.
    const fn content_type_column(self) -> &'static str {
        match self {
            Self::Node => "n.content_type_id",
            Self::Member => "m.content_type_id",
        }
    }

    /// Returns the JSON field column.
    const fn fields_column(self) -> &'static str {
        match self {
            Self::Node => "n.fields_json",
            Self::Member => "m.fields_json",
        }
    }
}

/// Compiled predicate and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    /// SQL boolean expression.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
}

// ============================================================================
// SECTION: Compiler
// ============================================================================

/// Compiles `filter` for `target`, resolving share links through `connection`.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Invalid`] for unsupported field names and
/// [`SqliteStoreError::Db`] when share-link resolution fails.
pub fn compile(
    connection: &Connection,
    target: RowTarget,
    filter: &Filter,
) -> Result<CompiledFilter, SqliteStoreError> {
    let mut compiler = Compiler { connection, target, params: Vec::new() };
    let sql = compiler.filter(filter)?;
    Ok(CompiledFilter { sql, params: compiler.params })
}

/// Recursive compiler state.
struct Compiler<'c> {
    /// Connection used to resolve share links.
    connection: &'c Connection,
    /// Target table.
    target: RowTarget,
    /// Parameters pushed in textual order.
    params: Vec<Value>,
}

impl Compiler<'_> {
    /// Compiles one filter node.
    fn filter(&mut self, filter: &Filter) -> Result<String, SqliteStoreError> {
        match filter {
            Filter::And(children) if children.is_empty() => Ok(SQL_TRUE.to_string()),
            Filter::Or(children) if children.is_empty() => Ok(SQL_FALSE.to_string()),
            Filter::And(children) => self.join(children, " AND "),
            Filter::Or(children) => self.join(children, " OR "),
            Filter::Not(child) => Ok(format!("NOT ({})", self.filter(child)?)),
            Filter::Condition(condition) => {
                Ok(format!("COALESCE(({}), 0)", self.condition(condition)?))
            }
        }
    }

    /// Joins compiled children with a logical operator.
    fn join(&mut self, children: &[Box<Filter>], operator: &str) -> Result<String, SqliteStoreError> {
        let mut parts = Vec::with_capacity(children.len());
        for child in children {
            parts.push(format!("({})", self.filter(child)?));
        }
        Ok(parts.join(operator))
    }

    /// Compiles one leaf condition.
    fn condition(&mut self, condition: &Condition) -> Result<String, SqliteStoreError> {
        match condition {
            Condition::KeyEq { key } => Ok(self.key_in(std::iter::once(key))),
            Condition::KeyIn { keys } => Ok(self.key_in(keys.iter())),
            Condition::PathEq { path } => Ok(self.node_only(|this| {
                let placeholder = this.push(Value::Text(path.as_str().to_string()));
                format!("n.path = {placeholder}")
            })),
            Condition::PathIn { paths } => Ok(self.node_only(|this| {
                if paths.is_empty() {
                    return SQL_FALSE.to_string();
                }
                let values = paths.iter().map(|path| Value::Text(path.as_str().to_string()));
                format!("n.path IN ({})", this.push_all(values))
            })),
            Condition::PathStartsWith { prefix } => Ok(self.node_only(|this| {
                let length = this.push(Value::Integer(sql_len(prefix.len())));
                let value = this.push(Value::Text(prefix.as_str().to_string()));
                format!("substr(n.path, 1, {length}) = {value}")
            })),
            Condition::DepthEq { depth } => Ok(self.node_only(|this| {
                format!("n.depth = {}", this.push(Value::Integer(i64::from(*depth))))
            })),
            Condition::DepthGte { depth } => Ok(self.node_only(|this| {
                format!("n.depth >= {}", this.push(Value::Integer(i64::from(*depth))))
            })),
            Condition::TypeIn { types } => Ok(self.type_in(types)),
            Condition::NativeTenant { tenant } => Ok(self.native_tenant(*tenant)),
            Condition::SharedWith { recipient, model, key_kind } => {
                self.shared_with(*recipient, model, *key_kind)
            }
            Condition::FieldEq { field, value } => self.field_eq(field, value),
            Condition::FieldContains { field, needle } => {
                let column = self.target.fields_column();
                let path = json_path(field)?;
                let kind = self.push(Value::Text(path.clone()));
                let extract = self.push(Value::Text(path));
                let needle = self.push(Value::Text(needle.clone()));
                Ok(format!(
                    "json_type({column}, {kind}) = 'text' AND instr(json_extract({column}, \
                     {extract}), {needle}) > 0"
                ))
            }
        }
    }

    /// Compiles a tree-only condition; member rows never match.
    fn node_only<F>(&mut self, build: F) -> String
    where
        F: FnOnce(&mut Self) -> String,
    {
        match self.target {
            RowTarget::Node => build(self),
            RowTarget::Member => SQL_FALSE.to_string(),
        }
    }

    /// Compiles a key membership test.
    fn key_in<'k, I>(&mut self, keys: I) -> String
    where
        I: Iterator<Item = &'k RecordKey>,
    {
        match self.target {
            RowTarget::Node => {
                let ids: Vec<Value> = keys
                    .filter_map(|key| match key {
                        RecordKey::Integer(raw) => i64::try_from(*raw).ok().map(Value::Integer),
                        RecordKey::Uuid(_) | RecordKey::Text(_) => None,
                    })
                    .collect();
                if ids.is_empty() {
                    return SQL_FALSE.to_string();
                }
                format!("n.id IN ({})", self.push_all(ids))
            }
            RowTarget::Member => {
                let mut by_kind: BTreeMap<&'static str, Vec<Value>> = BTreeMap::new();
                for key in keys {
                    by_kind
                        .entry(key_kind_label(key.kind()))
                        .or_default()
                        .push(Value::Text(key.to_object_id()));
                }
                if by_kind.is_empty() {
                    return SQL_FALSE.to_string();
                }
                let mut parts = Vec::with_capacity(by_kind.len());
                for (kind, values) in by_kind {
                    let kind = self.push(Value::Text(kind.to_string()));
                    parts.push(format!(
                        "(m.key_kind = {kind} AND m.key_text IN ({}))",
                        self.push_all(values)
                    ));
                }
                parts.join(" OR ")
            }
        }
    }

    /// Compiles a content type membership test.
    fn type_in(&mut self, types: &BTreeSet<TypeName>) -> String {
        if types.is_empty() {
            return SQL_FALSE.to_string();
        }
        let names = types.iter().map(|name| Value::Text(name.as_str().to_string()));
        format!(
            "{} IN (SELECT id FROM content_types WHERE name IN ({}))",
            self.target.content_type_column(),
            self.push_all(names)
        )
    }

    /// Compiles a native tenant test; tree rows never match.
    fn native_tenant(&mut self, tenant: TenantId) -> String {
        match self.target {
            RowTarget::Node => SQL_FALSE.to_string(),
            RowTarget::Member => match i64::try_from(tenant.get()) {
                Ok(raw) => format!("m.native_tenant_id = {}", self.push(Value::Integer(raw))),
                Err(_) => SQL_FALSE.to_string(),
            },
        }
    }

    /// Compiles a share-link test by resolving the linked keys first.
    fn shared_with(
        &mut self,
        recipient: TenantId,
        model: &TypeName,
        kind: PrimaryKeyKind,
    ) -> Result<String, SqliteStoreError> {
        let keys = shared_keys(self.connection, recipient, model, kind)?;
        if keys.is_empty() {
            return Ok(SQL_FALSE.to_string());
        }
        let column = self.target.content_type_column();
        let model = self.push(Value::Text(model.as_str().to_string()));
        let keys = self.key_in(keys.iter());
        Ok(format!("{column} = (SELECT id FROM content_types WHERE name = {model}) AND ({keys})"))
    }

    /// Compiles a field equality test; a missing field compares as null.
    fn field_eq(&mut self, field: &str, value: &FieldValue) -> Result<String, SqliteStoreError> {
        let column = self.target.fields_column();
        let path = json_path(field)?;
        let kind = self.push(Value::Text(path.clone()));
        let sql = match value {
            FieldValue::Null => format!("COALESCE(json_type({column}, {kind}), 'null') = 'null'"),
            FieldValue::Bool(true) => format!("json_type({column}, {kind}) = 'true'"),
            FieldValue::Bool(false) => format!("json_type({column}, {kind}) = 'false'"),
            FieldValue::Number(number) => {
                let extract = self.push(Value::Text(path));
                if let Some(integer) = number.as_i64() {
                    let expected = self.push(Value::Integer(integer));
                    format!(
                        "json_type({column}, {kind}) = 'integer' AND json_extract({column}, \
                         {extract}) = {expected}"
                    )
                } else {
                    let expected = self.push(Value::Real(number.as_f64().unwrap_or(f64::NAN)));
                    format!(
                        "json_type({column}, {kind}) = 'real' AND json_extract({column}, \
                         {extract}) = {expected}"
                    )
                }
            }
            FieldValue::String(text) => {
                let extract = self.push(Value::Text(path));
                let expected = self.push(Value::Text(text.clone()));
                format!(
                    "json_type({column}, {kind}) = 'text' AND json_extract({column}, {extract}) \
                     = {expected}"
                )
            }
            FieldValue::Array(_) | FieldValue::Object(_) => {
                let label = if value.is_array() { "array" } else { "object" };
                let extract = self.push(Value::Text(path));
                let encoded = serde_json::to_string(value)
                    .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
                let expected = self.push(Value::Text(encoded));
                format!(
                    "json_type({column}, {kind}) = '{label}' AND json_extract({column}, \
                     {extract}) = {expected}"
                )
            }
        };
        Ok(sql)
    }

    /// Pushes one parameter and returns its placeholder.
    fn push(&mut self, value: Value) -> &'static str {
        self.params.push(value);
        "?"
    }

    /// Pushes many parameters and returns a comma-separated placeholder list.
    fn push_all<I>(&mut self, values: I) -> String
    where
        I: IntoIterator<Item = Value>,
    {
        let before = self.params.len();
        self.params.extend(values);
        vec!["?"; self.params.len() - before].join(", ")
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads keys of `model` shared with `recipient`, skipping unparsable ids.
fn shared_keys(
    connection: &Connection,
    recipient: TenantId,
    model: &TypeName,
    kind: PrimaryKeyKind,
) -> Result<BTreeSet<RecordKey>, SqliteStoreError> {
    let mut statement = connection
        .prepare(
            "SELECT s.object_id FROM shared_tenant_members s JOIN content_types c ON c.id = \
             s.content_type_id WHERE s.recipient_id = ?1 AND c.name = ?2",
        )
        .map_err(db_error)?;
    let object_ids = statement
        .query_map(params![sql_int(recipient.get())?, model.as_str()], |row| {
            row.get::<_, String>(0)
        })
        .map_err(db_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_error)?;
    Ok(object_ids
        .into_iter()
        .filter_map(|object_id| {
            let key = RecordKey::parse_as(&object_id, kind);
            if key.is_none() {
                tracing::debug!(
                    object_id = %object_id,
                    model = %model,
                    "skipping share link with unparsable object id"
                );
            }
            key
        })
        .collect())
}

/// Builds the JSON path addressing one top-level field.
fn json_path(field: &str) -> Result<String, SqliteStoreError> {
    if field.is_empty() || field.contains(['"', '\\']) {
        return Err(SqliteStoreError::Invalid(format!("unsupported field name: {field}")));
    }
    Ok(format!("$.\"{field}\""))
}

/// Converts a string length into an SQL integer.
fn sql_len(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}
