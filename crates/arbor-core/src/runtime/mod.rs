// crates/arbor-core/src/runtime/mod.rs
// ============================================================================
// Module: Arbor Runtime
// Description: Query evaluation, upcasting, and tenant scoping.
// Purpose: Execute tree and member queries against record stores.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules build immutable queries, evaluate them through the store
//! interfaces, upgrade generic rows to their specific types, and bind the
//! active tenant of each unit of work. Evaluation is synchronous.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod engine;
pub mod member_query;
pub mod query;
pub mod store;
pub mod tenancy;
pub mod type_filter;
pub mod upcast;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use engine::Evaluation;
pub use engine::QueryError;
pub use engine::TreeEngine;
pub use member_query::ActiveScope;
pub use member_query::MemberQuery;
pub use member_query::apply_active_tenant_filtering;
pub use query::NodeQuery;
pub use query::YieldMode;
pub use store::InMemoryStore;
pub use tenancy::ActiveTenantGuard;
pub use tenancy::ActiveTenantRegistry;
pub use tenancy::DefaultTenantCache;
pub use tenancy::TenantContext;
pub use tenancy::UnitKey;
pub use type_filter::TypeFilterState;
pub use upcast::DeferredSpecific;
pub use upcast::NodeItem;
pub use upcast::SpecificNode;
pub use upcast::UpcastCode;
pub use upcast::UpcastError;
pub use upcast::UpcastErrorList;
