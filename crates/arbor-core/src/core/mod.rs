// crates/arbor-core/src/core/mod.rs
// ============================================================================
// Module: Arbor Core Types
// Description: Canonical tree, type, and tenant structures.
// Purpose: Provide stable, serializable types shared by the runtime and stores.
// Dependencies: serde, smallvec, uuid
// ============================================================================

//! ## Overview
//! Arbor core types define identifiers, materialized paths, filter trees,
//! records, the type registry, and the tenant model. They carry no I/O and are
//! the source of truth for every store implementation.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod filter;
pub mod identifiers;
pub mod path;
pub mod record;
pub mod tenant;
pub mod tree;
pub mod types;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use filter::Condition;
pub use filter::FieldValue;
pub use filter::Filter;
pub use filter::MatchContext;
pub use filter::RecordView;
pub use identifiers::ContentTypeId;
pub use identifiers::NodeId;
pub use identifiers::PrimaryKeyKind;
pub use identifiers::RecordKey;
pub use identifiers::TenantId;
pub use identifiers::TypeName;
pub use path::DEFAULT_ALPHABET;
pub use path::DEFAULT_STEPLEN;
pub use path::MAX_STEPLEN;
pub use path::PathError;
pub use path::PathSpec;
pub use path::TreePath;
pub use record::CHILDREN_RELATION;
pub use record::FetchRequest;
pub use record::FetchedNode;
pub use record::FieldMap;
pub use record::FieldRef;
pub use record::IN_MENU_FIELD;
pub use record::JOIN_DELIMITER;
pub use record::JoinPath;
pub use record::LIVE_FIELD;
pub use record::MemberRecord;
pub use record::NewNode;
pub use record::SubclassRow;
pub use record::TreeNode;
pub use tenant::DEFAULT_PORT;
pub use tenant::FieldError;
pub use tenant::SharedTenantMember;
pub use tenant::Tenant;
pub use tenant::TenantDraft;
pub use tenant::TenantError;
pub use tenant::TenantFilter;
pub use tenant::TenantGrants;
pub use tenant::resolve_for_hostname;
pub use tenant::split_host_port;
pub use tenant::validate_tenant;
pub use types::RegistryError;
pub use types::SpecificLookups;
pub use types::TypeDescriptor;
pub use types::TypeRegistry;
