// crates/arbor-core/src/runtime/tenancy.rs
// ============================================================================
// Module: Arbor Tenancy Runtime
// Description: Default-tenant cache, active-tenant registry, and tenant write path.
// Purpose: Resolve the tenant of each unit of work and keep tenant caches coherent.
// Dependencies: dashmap, parking_lot, tracing, uuid, crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! [`TenantContext`] is the explicit handle for everything tenant-related. A
//! unit of work (a request, a job, a task) resolves its tenant once and
//! registers it in the [`ActiveTenantRegistry`] under its [`UnitKey`]. The
//! returned [`ActiveTenantGuard`] removes the entry when dropped, on normal
//! return, on error, and during panic unwinding. Code without a registered
//! entry sees the default tenant.
//!
//! Every tenant write goes through the context, which refreshes the default
//! cache and the active entries afterwards.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::thread::ThreadId;

use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::core::identifiers::ContentTypeId;
use crate::core::identifiers::RecordKey;
use crate::core::identifiers::TenantId;
use crate::core::record::FieldMap;
use crate::core::record::MemberRecord;
use crate::core::tenant::SharedTenantMember;
use crate::core::tenant::Tenant;
use crate::core::tenant::TenantDraft;
use crate::core::tenant::TenantError;
use crate::core::tenant::TenantFilter;
use crate::core::tenant::TenantGrants;
use crate::core::tenant::resolve_for_hostname;
use crate::core::tenant::split_host_port;
use crate::core::tenant::validate_tenant;
use crate::interfaces::MemberStore;
use crate::interfaces::TenantStore;
use crate::runtime::member_query::MemberQuery;

// ============================================================================
// SECTION: Default Tenant Cache
// ============================================================================

/// Process-wide cache of the default tenant.
///
/// # Invariants
/// - The cached value is replaced as a whole, never mutated in place.
#[derive(Debug, Default)]
pub struct DefaultTenantCache {
    /// Cached default tenant.
    slot: RwLock<Option<Arc<Tenant>>>,
}

impl DefaultTenantCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached tenant, if loaded.
    #[must_use]
    pub fn get(&self) -> Option<Arc<Tenant>> {
        self.slot.read().clone()
    }

    /// Replaces the cached tenant.
    pub fn store(&self, tenant: Arc<Tenant>) {
        *self.slot.write() = Some(tenant);
    }

    /// Drops the cached tenant.
    pub fn invalidate(&self) {
        *self.slot.write() = None;
    }
}

// ============================================================================
// SECTION: Active Tenant Registry
// ============================================================================

/// Execution unit owning an active-tenant entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKey {
    /// OS thread.
    Thread(ThreadId),
    /// Caller-assigned task identifier.
    Task(u64),
}

impl UnitKey {
    /// Returns the key of the calling thread.
    #[must_use]
    pub fn current_thread() -> Self {
        Self::Thread(thread::current().id())
    }
}

/// Concurrent map of active tenants keyed by execution unit.
#[derive(Debug, Default)]
pub struct ActiveTenantRegistry {
    /// Active entries.
    entries: DashMap<UnitKey, Arc<Tenant>>,
}

impl ActiveTenantRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tenant` for `key` until the returned guard drops.
    #[must_use = "dropping the guard immediately clears the active tenant"]
    pub fn enter(&self, key: UnitKey, tenant: Arc<Tenant>) -> ActiveTenantGuard<'_> {
        self.entries.insert(key, Arc::clone(&tenant));
        ActiveTenantGuard { registry: self, key, tenant }
    }

    /// Returns the active tenant of `key`.
    #[must_use]
    pub fn get(&self, key: UnitKey) -> Option<Arc<Tenant>> {
        self.entries.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the number of active entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no unit has an active tenant.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces every entry with `fresh(entry)`, removing entries mapped to `None`.
    fn refresh<F>(&self, fresh: F)
    where
        F: Fn(&Tenant) -> Option<Arc<Tenant>>,
    {
        self.entries.retain(|_, tenant| match fresh(tenant) {
            Some(next) => {
                *tenant = next;
                true
            }
            None => false,
        });
    }

    /// Removes the entry of `key`.
    fn remove(&self, key: UnitKey) {
        self.entries.remove(&key);
    }
}

/// Scope guard that clears an active-tenant entry on drop.
#[derive(Debug)]
pub struct ActiveTenantGuard<'a> {
    /// Owning registry.
    registry: &'a ActiveTenantRegistry,
    /// Registered unit.
    key: UnitKey,
    /// Tenant registered for the unit.
    tenant: Arc<Tenant>,
}

impl ActiveTenantGuard<'_> {
    /// Returns the tenant registered by this guard.
    #[must_use]
    pub const fn tenant(&self) -> &Arc<Tenant> {
        &self.tenant
    }

    /// Returns the unit key.
    #[must_use]
    pub const fn key(&self) -> UnitKey {
        self.key
    }
}

impl Drop for ActiveTenantGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.key);
    }
}

// ============================================================================
// SECTION: Tenant Context
// ============================================================================

/// Explicit tenancy handle bound to a tenant store.
#[derive(Debug)]
pub struct TenantContext<S> {
    /// Backing store.
    store: S,
    /// Configured default tenant id.
    default_tenant_id: TenantId,
    /// Default tenant cache.
    default_cache: DefaultTenantCache,
    /// Active tenants per unit of work.
    active: ActiveTenantRegistry,
}

impl<S> TenantContext<S>
where
    S: TenantStore,
{
    /// Creates a context with empty caches.
    #[must_use]
    pub fn new(store: S, default_tenant_id: TenantId) -> Self {
        Self {
            store,
            default_tenant_id,
            default_cache: DefaultTenantCache::new(),
            active: ActiveTenantRegistry::new(),
        }
    }

    /// Returns the backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the configured default tenant id.
    #[must_use]
    pub const fn default_tenant_id(&self) -> TenantId {
        self.default_tenant_id
    }

    /// Returns the active-tenant registry.
    #[must_use]
    pub const fn active_registry(&self) -> &ActiveTenantRegistry {
        &self.active
    }

    /// Returns the default tenant, loading it once per cache generation.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Configuration`] when the default tenant does not exist.
    pub fn default_tenant(&self) -> Result<Arc<Tenant>, TenantError> {
        if let Some(tenant) = self.default_cache.get() {
            return Ok(tenant);
        }
        let tenant = self.store.get_tenant(self.default_tenant_id)?.ok_or_else(|| {
            TenantError::Configuration(format!(
                "default tenant {} does not exist; was it deleted by mistake?",
                self.default_tenant_id
            ))
        })?;
        let tenant = Arc::new(tenant);
        self.default_cache.store(Arc::clone(&tenant));
        Ok(tenant)
    }

    /// Lists tenants, optionally narrowed by an access filter.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Store`] when the store fails.
    pub fn tenants(&self, filter: Option<&TenantFilter>) -> Result<Vec<Tenant>, TenantError> {
        let tenants = self.store.list_tenants()?;
        Ok(match filter {
            Some(filter) => filter.apply(&tenants),
            None => tenants,
        })
    }

    /// Resolves the tenant serving `hostname:port`.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Configuration`] when no tenant matches and the default
    /// tenant is missing.
    pub fn tenant_for_hostname(&self, hostname: &str, port: u16) -> Result<Arc<Tenant>, TenantError> {
        let tenants = self.store.list_tenants()?;
        self.resolve_among(&tenants, hostname, port)
    }

    /// Resolves the tenant for a `host[:port]` request string.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError`] as for [`Self::tenant_for_hostname`].
    pub fn tenant_for_request(
        &self,
        host: &str,
        default_port: u16,
    ) -> Result<Arc<Tenant>, TenantError> {
        let (hostname, port) = split_host_port(host);
        self.tenant_for_hostname(&hostname, port.unwrap_or(default_port))
    }

    /// Resolves the tenant for a user restricted to the tenants open to them.
    ///
    /// A `specified` tenant wins when the user can still access it.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Configuration`] when no accessible tenant matches.
    pub fn tenant_for_user(
        &self,
        grants: &TenantGrants,
        specified: Option<TenantId>,
        hostname: &str,
        port: u16,
    ) -> Result<Arc<Tenant>, TenantError> {
        let open = self.tenants(Some(&TenantFilter::OpenToUser(grants.clone())))?;
        if let Some(id) = specified
            && let Some(tenant) = open.iter().find(|tenant| tenant.id == id)
        {
            return Ok(Arc::new(tenant.clone()));
        }
        resolve_for_hostname(&open, self.default_tenant_id, hostname, port)
            .map(|tenant| Arc::new(tenant.clone()))
            .ok_or_else(|| {
                TenantError::Configuration(format!(
                    "no tenants are configured to allow access for {hostname}:{port}; \
                     was the default tenant deleted by mistake?"
                ))
            })
    }

    /// Resolves the tenant for a unit of work and registers it until the guard drops.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError`] when resolution fails; nothing is registered in that case.
    pub fn begin_unit_of_work(
        &self,
        key: UnitKey,
        hostname: &str,
        port: u16,
    ) -> Result<ActiveTenantGuard<'_>, TenantError> {
        let tenant = self.tenant_for_hostname(hostname, port)?;
        Ok(self.active.enter(key, tenant))
    }

    /// Runs `work` on the calling thread with the resolved tenant active.
    ///
    /// The active entry is removed when `work` returns, fails, or panics.
    ///
    /// # Errors
    ///
    /// Returns resolution errors converted into `E`, or the error returned by `work`.
    pub fn run_unit_of_work<R, E, F>(&self, hostname: &str, port: u16, work: F) -> Result<R, E>
    where
        F: FnOnce(&Arc<Tenant>) -> Result<R, E>,
        E: From<TenantError>,
    {
        let guard = self.begin_unit_of_work(UnitKey::current_thread(), hostname, port)?;
        let result = work(guard.tenant());
        drop(guard);
        result
    }

    /// Returns the active tenant of the calling thread, or the default tenant.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Configuration`] when falling back to a missing default.
    pub fn active_tenant(&self) -> Result<Arc<Tenant>, TenantError> {
        self.active_tenant_for(UnitKey::current_thread())
    }

    /// Returns the active tenant of `key`, or the default tenant.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Configuration`] when falling back to a missing default.
    pub fn active_tenant_for(&self, key: UnitKey) -> Result<Arc<Tenant>, TenantError> {
        match self.active.get(key) {
            Some(tenant) => Ok(tenant),
            None => self.default_tenant(),
        }
    }

    /// Validates and inserts a tenant, then refreshes caches.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Validation`] with field errors before anything is persisted.
    pub fn create_tenant(&self, draft: TenantDraft) -> Result<Tenant, TenantError> {
        let draft = draft.normalized();
        let existing = self.store.list_tenants()?;
        validate_tenant(&draft, &existing, None).map_err(TenantError::Validation)?;
        let tenant = self.store.insert_tenant(Uuid::new_v4(), &draft)?;
        tracing::debug!(tenant = %tenant.id, label = %tenant.label, "tenant created");
        self.refresh_caches()?;
        Ok(tenant)
    }

    /// Validates and replaces a tenant, then refreshes caches.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Validation`] with field errors before anything is persisted.
    pub fn update_tenant(&self, tenant: &Tenant) -> Result<Tenant, TenantError> {
        let draft = TenantDraft::from(tenant).normalized();
        let existing = self.store.list_tenants()?;
        validate_tenant(&draft, &existing, Some(tenant.id)).map_err(TenantError::Validation)?;
        let updated = Tenant {
            label: draft.label,
            hostname: draft.hostname,
            port: draft.port,
            is_open: draft.is_open,
            ..tenant.clone()
        };
        self.store.update_tenant(&updated)?;
        tracing::debug!(tenant = %updated.id, "tenant updated");
        self.refresh_caches()?;
        Ok(updated)
    }

    /// Deletes a tenant, then refreshes caches; returns false when absent.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Store`] when the store fails.
    pub fn delete_tenant(&self, id: TenantId) -> Result<bool, TenantError> {
        let removed = self.store.delete_tenant(id)?;
        if removed {
            tracing::debug!(tenant = %id, "tenant deleted");
        }
        self.refresh_caches()?;
        Ok(removed)
    }

    /// Refreshes caches after schema migrations have run.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Store`] when the store fails.
    pub fn after_migrate(&self) -> Result<(), TenantError> {
        self.refresh_caches()
    }

    /// Reloads the default tenant and replaces every active entry with a fresh value.
    ///
    /// Entries whose tenant no longer exists fall back to the default tenant, or are
    /// removed when the default tenant is missing too.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Store`] when the store fails.
    pub fn refresh_caches(&self) -> Result<(), TenantError> {
        self.default_cache.invalidate();
        let fresh: BTreeMap<TenantId, Arc<Tenant>> = self
            .store
            .list_tenants()?
            .into_iter()
            .map(|tenant| (tenant.id, Arc::new(tenant)))
            .collect();
        let default = fresh.get(&self.default_tenant_id).cloned();
        if let Some(tenant) = &default {
            self.default_cache.store(Arc::clone(tenant));
        }
        self.active.refresh(|tenant| fresh.get(&tenant.id).cloned().or_else(|| default.clone()));
        tracing::debug!(tenants = fresh.len(), active = self.active.len(), "tenant caches refreshed");
        Ok(())
    }

    /// Shares a member with `recipient`; the sender is the member's native tenant.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Store`] wrapping a conflict when the link already exists.
    pub fn share_with_tenant(
        &self,
        member: &MemberRecord,
        recipient: TenantId,
    ) -> Result<SharedTenantMember, TenantError> {
        let share = SharedTenantMember {
            sender: member.native_tenant,
            recipient,
            content_type_id: member.content_type_id,
            object_id: member.key.to_object_id(),
        };
        self.store.save_share(&share)?;
        Ok(share)
    }

    /// Resolves a tenant among an explicit candidate list.
    fn resolve_among(
        &self,
        tenants: &[Tenant],
        hostname: &str,
        port: u16,
    ) -> Result<Arc<Tenant>, TenantError> {
        if let Some(tenant) = resolve_for_hostname(tenants, self.default_tenant_id, hostname, port) {
            tracing::debug!(tenant = %tenant.id, hostname, port, "tenant resolved");
            return Ok(Arc::new(tenant.clone()));
        }
        if tenants.iter().all(|tenant| tenant.id != self.default_tenant_id) {
            return Err(TenantError::Configuration(format!(
                "no tenant matches {hostname}:{port} and default tenant {} is not configured",
                self.default_tenant_id
            )));
        }
        Err(TenantError::NotFound { hostname: hostname.to_string(), port })
    }
}

impl<S> TenantContext<S>
where
    S: TenantStore + MemberStore,
{
    /// Saves a new member native to the calling thread's active tenant.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError`] when no tenant is active and no default exists, or the
    /// store fails.
    pub fn create_member(
        &self,
        content_type_id: ContentTypeId,
        key: RecordKey,
        fields: FieldMap,
    ) -> Result<MemberRecord, TenantError> {
        let native = self.active_tenant()?;
        let member = MemberRecord { content_type_id, key, native_tenant: native.id, fields };
        self.store.save_member(&member)?;
        Ok(member)
    }

    /// Evaluates a member query, applying deferred active-tenant scoping.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError`] when the active tenant cannot be resolved or the store fails.
    pub fn evaluate_members(&self, query: &MemberQuery) -> Result<Vec<MemberRecord>, TenantError> {
        let filter = query.resolved_filter(self.scope_tenant(query)?);
        Ok(self.store.fetch_members(&filter)?)
    }

    /// Counts members matched by a query, applying deferred active-tenant scoping.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError`] when the active tenant cannot be resolved or the store fails.
    pub fn count_members(&self, query: &MemberQuery) -> Result<u64, TenantError> {
        let filter = query.resolved_filter(self.scope_tenant(query)?);
        Ok(self.store.count_members(&filter)?)
    }

    /// Returns the active tenant id when the query has deferred scoping.
    fn scope_tenant(&self, query: &MemberQuery) -> Result<Option<TenantId>, TenantError> {
        if query.active_scope().is_none() {
            return Ok(None);
        }
        Ok(Some(self.active_tenant()?.id))
    }
}
