// crates/arbor-store-sqlite/src/lib.rs
// ============================================================================
// Module: Arbor SQLite Store
// Description: Durable record store backend using SQLite WAL.
// Purpose: Provide persistent tree, tenant, and member storage for Arbor.
// Dependencies: arbor-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides [`SqliteRecordStore`], a `SQLite` implementation of
//! every Arbor store interface. Tree and member filters are compiled into SQL
//! so that rows are selected inside the database, in path order. Security
//! posture: database contents are untrusted and validated on decode.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod filter_sql;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_FIELDS_BYTES;
pub use store::SqliteRecordStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
