// crates/arbor-core/src/runtime/member_query.rs
// ============================================================================
// Module: Arbor Member Queries
// Description: Tenant-scoped queries over tenant member records.
// Purpose: Build native, shared, and visible tenant filters with lazy active-tenant scoping.
// Dependencies: crate::{core, runtime::engine}
// ============================================================================

//! ## Overview
//! A [`MemberQuery`] selects member records of one model. Explicit tenant
//! scopes are applied when the modifier is called. The active-tenant scopes
//! only record an [`ActiveScope`]; the tenant id is bound when the query is
//! evaluated through [`crate::TenantContext`], because the active tenant may
//! not exist yet when the query is built.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use crate::core::filter::Condition;
use crate::core::filter::FieldValue;
use crate::core::filter::Filter;
use crate::core::identifiers::PrimaryKeyKind;
use crate::core::identifiers::RecordKey;
use crate::core::identifiers::TenantId;
use crate::core::identifiers::TypeName;
use crate::core::types::RegistryError;
use crate::core::types::TypeRegistry;
use crate::runtime::engine::QueryError;

// ============================================================================
// SECTION: Scopes
// ============================================================================

/// Deferred active-tenant scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActiveScope {
    /// Records native to the active tenant.
    NativeOnly,
    /// Records native to or shared with the active tenant.
    Visible,
}

/// Returns the filter selecting records native to `tenant`.
fn native_filter(tenant: TenantId) -> Filter {
    Filter::Condition(Condition::NativeTenant { tenant })
}

/// Returns the filter selecting records of `model` shared with `tenant`.
fn shared_filter(tenant: TenantId, model: &TypeName, key_kind: PrimaryKeyKind) -> Filter {
    Filter::Condition(Condition::SharedWith { recipient: tenant, model: model.clone(), key_kind })
}

// ============================================================================
// SECTION: Member Query
// ============================================================================

/// Immutable query over member records of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberQuery {
    /// Member model.
    model: TypeName,
    /// Primary key kind of the model.
    key_kind: PrimaryKeyKind,
    /// Explicit row filter.
    filter: Filter,
    /// Scope bound at evaluation time.
    active_scope: Option<ActiveScope>,
}

impl MemberQuery {
    /// Creates a query over every record of `model`.
    #[must_use]
    pub fn new(model: TypeName, key_kind: PrimaryKeyKind) -> Self {
        Self { model, key_kind, filter: Filter::everything(), active_scope: None }
    }

    /// Creates a query using the key kind declared for `model`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownType`] when the model is not registered.
    pub fn for_type(registry: &TypeRegistry, model: &TypeName) -> Result<Self, RegistryError> {
        let descriptor =
            registry.descriptor(model).ok_or_else(|| RegistryError::UnknownType(model.clone()))?;
        Ok(Self::new(model.clone(), descriptor.primary_key))
    }

    /// Returns the member model.
    #[must_use]
    pub const fn model(&self) -> &TypeName {
        &self.model
    }

    /// Returns the model's key kind.
    #[must_use]
    pub const fn key_kind(&self) -> PrimaryKeyKind {
        self.key_kind
    }

    /// Returns the explicit filter.
    #[must_use]
    pub const fn filter_tree(&self) -> &Filter {
        &self.filter
    }

    /// Returns the deferred active-tenant scope.
    #[must_use]
    pub const fn active_scope(&self) -> Option<ActiveScope> {
        self.active_scope
    }

    /// Returns a query narrowed by `filter`.
    #[must_use]
    pub fn filter(&self, filter: Filter) -> Self {
        Self { filter: self.filter.clone().and(filter), ..self.clone() }
    }

    /// Returns a query excluding rows matched by `filter`.
    #[must_use]
    pub fn exclude(&self, filter: Filter) -> Self {
        self.filter(filter.negate())
    }

    /// Narrows to rows whose field equals `value`.
    #[must_use]
    pub fn field_eq(&self, field: &str, value: FieldValue) -> Self {
        self.filter(Filter::Condition(Condition::FieldEq { field: field.to_string(), value }))
    }

    /// Narrows to the given keys.
    #[must_use]
    pub fn key_in<I>(&self, keys: I) -> Self
    where
        I: IntoIterator<Item = RecordKey>,
    {
        let keys: BTreeSet<RecordKey> = keys.into_iter().collect();
        self.filter(Filter::Condition(Condition::KeyIn { keys }))
    }

    /// Narrows to records native to `tenant`.
    #[must_use]
    pub fn native_to_tenant(&self, tenant: TenantId) -> Self {
        self.filter(native_filter(tenant))
    }

    /// Excludes records native to `tenant`.
    #[must_use]
    pub fn not_native_to_tenant(&self, tenant: TenantId) -> Self {
        self.exclude(native_filter(tenant))
    }

    /// Narrows to records shared with `tenant`.
    #[must_use]
    pub fn shared_with_tenant(&self, tenant: TenantId) -> Self {
        self.filter(shared_filter(tenant, &self.model, self.key_kind))
    }

    /// Excludes records shared with `tenant`.
    #[must_use]
    pub fn not_shared_with_tenant(&self, tenant: TenantId) -> Self {
        self.exclude(shared_filter(tenant, &self.model, self.key_kind))
    }

    /// Narrows to records native to or shared with `tenant`.
    #[must_use]
    pub fn visible_to_tenant(&self, tenant: TenantId) -> Self {
        self.filter(self.visible_filter(tenant))
    }

    /// Excludes records native to or shared with `tenant`.
    #[must_use]
    pub fn invisible_to_tenant(&self, tenant: TenantId) -> Self {
        self.exclude(self.visible_filter(tenant))
    }

    /// Narrows to records native to the active tenant at evaluation time.
    #[must_use]
    pub fn native_to_active_tenant(&self) -> Self {
        self.with_scope(ActiveScope::NativeOnly)
    }

    /// Narrows to records visible to the active tenant at evaluation time.
    #[must_use]
    pub fn visible_to_active_tenant(&self) -> Self {
        self.with_scope(ActiveScope::Visible)
    }

    /// Combines two queries with logical AND.
    ///
    /// Active scopes combine to the narrower one.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::IncompatibleModels`] when the models differ.
    pub fn and(&self, other: &Self) -> Result<Self, QueryError> {
        self.ensure_same_model(other)?;
        Ok(Self {
            filter: self.filter.clone().and(other.filter.clone()),
            active_scope: narrower(self.active_scope, other.active_scope),
            ..self.clone()
        })
    }

    /// Combines two queries with logical OR.
    ///
    /// Active scopes combine to the narrower one.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::IncompatibleModels`] when the models differ.
    pub fn or(&self, other: &Self) -> Result<Self, QueryError> {
        self.ensure_same_model(other)?;
        Ok(Self {
            filter: self.filter.clone().or(other.filter.clone()),
            active_scope: narrower(self.active_scope, other.active_scope),
            ..self.clone()
        })
    }

    /// Returns the filter to evaluate, binding the active scope to `active`.
    ///
    /// With a scope but no `active` tenant the scope is dropped.
    #[must_use]
    pub fn resolved_filter(&self, active: Option<TenantId>) -> Filter {
        let mut types = BTreeSet::new();
        types.insert(self.model.clone());
        let filter = Filter::Condition(Condition::TypeIn { types }).and(self.filter.clone());
        match (self.active_scope, active) {
            (Some(ActiveScope::NativeOnly), Some(tenant)) => filter.and(native_filter(tenant)),
            (Some(ActiveScope::Visible), Some(tenant)) => filter.and(self.visible_filter(tenant)),
            _ => filter,
        }
    }

    /// Returns native OR shared for `tenant`.
    fn visible_filter(&self, tenant: TenantId) -> Filter {
        native_filter(tenant).or(shared_filter(tenant, &self.model, self.key_kind))
    }

    /// Returns a copy carrying `scope`.
    fn with_scope(&self, scope: ActiveScope) -> Self {
        Self { active_scope: Some(scope), ..self.clone() }
    }

    /// Rejects combination across models.
    fn ensure_same_model(&self, other: &Self) -> Result<(), QueryError> {
        if self.model == other.model {
            return Ok(());
        }
        Err(QueryError::IncompatibleModels {
            left: self.model.to_string(),
            right: other.model.to_string(),
        })
    }
}

/// Picks the narrower of two optional scopes.
fn narrower(left: Option<ActiveScope>, right: Option<ActiveScope>) -> Option<ActiveScope> {
    match (left, right) {
        (Some(left), Some(right)) => Some(left.min(right)),
        (scope, None) | (None, scope) => scope,
    }
}

/// Applies active-tenant scoping to a query.
///
/// `native_only` selects native records; otherwise shared records are included.
#[must_use]
pub fn apply_active_tenant_filtering(query: &MemberQuery, native_only: bool) -> MemberQuery {
    if native_only { query.native_to_active_tenant() } else { query.visible_to_active_tenant() }
}
