// crates/arbor-core/src/lib.rs
// ============================================================================
// Module: Arbor Core Library
// Description: Public API surface for the Arbor page-tree core.
// Purpose: Expose core types, store interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Arbor core provides materialized-path tree queries, most-specific-type
//! upcasting of generic nodes, and tenant-scoped record filtering. It is
//! backend-agnostic and reaches storage only through the traits in
//! [`interfaces`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::ContentTypeStore;
pub use interfaces::MemberStore;
pub use interfaces::StoreError;
pub use interfaces::TenantStore;
pub use interfaces::TreeStore;
pub use runtime::ActiveScope;
pub use runtime::ActiveTenantGuard;
pub use runtime::ActiveTenantRegistry;
pub use runtime::DefaultTenantCache;
pub use runtime::DeferredSpecific;
pub use runtime::Evaluation;
pub use runtime::InMemoryStore;
pub use runtime::MemberQuery;
pub use runtime::NodeItem;
pub use runtime::NodeQuery;
pub use runtime::QueryError;
pub use runtime::SpecificNode;
pub use runtime::TenantContext;
pub use runtime::TreeEngine;
pub use runtime::TypeFilterState;
pub use runtime::UnitKey;
pub use runtime::UpcastCode;
pub use runtime::UpcastError;
pub use runtime::UpcastErrorList;
pub use runtime::YieldMode;
pub use runtime::apply_active_tenant_filtering;
