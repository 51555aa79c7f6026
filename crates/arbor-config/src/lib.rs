// crates/arbor-config/src/lib.rs
// ============================================================================
// Module: Arbor Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for arbor.toml semantics.
// Dependencies: arbor-core, arbor-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `arbor-config` defines the configuration model for Arbor deployments: the
//! path layout, the type hierarchy, the default tenant, and the store backend.
//! Validation is strict and fail-closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
