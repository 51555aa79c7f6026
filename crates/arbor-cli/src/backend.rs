// crates/arbor-cli/src/backend.rs
// ============================================================================
// Module: CLI Store Backend
// Description: Builds the configured record store behind one trait object.
// Purpose: Let every command run unchanged against memory or SQLite storage.
// Dependencies: arbor-config, arbor-core, arbor-store-sqlite
// ============================================================================

//! ## Overview
//! The CLI opens exactly one store per invocation. The in-memory backend
//! starts empty and is discarded on exit; the `SQLite` backend persists.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use arbor_config::ArborConfig;
use arbor_config::StoreType;
use arbor_core::ContentTypeStore;
use arbor_core::InMemoryStore;
use arbor_core::MemberStore;
use arbor_core::PathSpec;
use arbor_core::TenantStore;
use arbor_core::TreeStore;
use arbor_store_sqlite::SqliteRecordStore;

// ============================================================================
// SECTION: Shared Store
// ============================================================================

/// Every store interface the CLI needs.
pub trait RecordStore: ContentTypeStore + TreeStore + TenantStore + MemberStore {}

impl<T> RecordStore for T where T: ContentTypeStore + TreeStore + TenantStore + MemberStore {}

/// Shared record store backed by an `Arc` trait object.
pub type SharedStore = Arc<dyn RecordStore>;

/// Opens the store selected by `config`.
///
/// # Errors
///
/// Returns a message when the `SQLite` store cannot be opened.
pub fn open_store(config: &ArborConfig, spec: &PathSpec) -> Result<SharedStore, String> {
    match config.store.store_type {
        StoreType::Memory => Ok(Arc::new(InMemoryStore::new(spec.clone()))),
        StoreType::Sqlite => {
            let sqlite_config = config
                .store
                .sqlite_config()
                .ok_or_else(|| "sqlite store requires path".to_string())?;
            let store = SqliteRecordStore::new(sqlite_config, spec.clone())
                .map_err(|err| err.to_string())?;
            tracing::debug!(path = %store.config().path.display(), "sqlite store opened");
            Ok(Arc::new(store))
        }
    }
}
