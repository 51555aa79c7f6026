// crates/arbor-core/src/core/identifiers.rs
// ============================================================================
// Module: Arbor Identifiers
// Description: Canonical identifiers for tree nodes, content types, and tenants.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! This module defines the identifiers used throughout Arbor. Numeric
//! identifiers enforce non-zero, 1-based invariants at construction boundaries.
//! [`TypeName`] names a registered record type, and [`RecordKey`] carries a
//! tenant member primary key in one of the supported [`PrimaryKeyKind`]s.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU64;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// SECTION: Numeric Identifiers
// ============================================================================

/// Tree node identifier.
///
/// # Invariants
/// - Always >= 1 (non-zero, 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(NonZeroU64);

impl NodeId {
    /// Creates a new node identifier from a non-zero value.
    #[must_use]
    pub const fn new(id: NonZeroU64) -> Self {
        Self(id)
    }

    /// Creates a node identifier from a raw value (returns `None` if zero).
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw identifier value (always >= 1).
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.get().fmt(f)
    }
}

/// Content type identifier assigned by the content-type store.
///
/// # Invariants
/// - Always >= 1 (non-zero, 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentTypeId(NonZeroU64);

impl ContentTypeId {
    /// Creates a new content type identifier from a non-zero value.
    #[must_use]
    pub const fn new(id: NonZeroU64) -> Self {
        Self(id)
    }

    /// Creates a content type identifier from a raw value (returns `None` if zero).
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw identifier value (always >= 1).
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ContentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.get().fmt(f)
    }
}

/// Tenant identifier.
///
/// # Invariants
/// - Always >= 1 (non-zero, 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(NonZeroU64);

impl TenantId {
    /// Creates a new tenant identifier from a non-zero value.
    #[must_use]
    pub const fn new(id: NonZeroU64) -> Self {
        Self(id)
    }

    /// Creates a tenant identifier from a raw value (returns `None` if zero).
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw identifier value (always >= 1).
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.get().fmt(f)
    }
}

// ============================================================================
// SECTION: Type Names
// ============================================================================

/// Registered record type name (for example `blog.BlogPage`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(String);

impl TypeName {
    /// Creates a new type name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the type name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the join step name for this type (lowercased, without app label).
    #[must_use]
    pub fn step_name(&self) -> String {
        self.0.rsplit('.').next().unwrap_or(self.0.as_str()).to_ascii_lowercase()
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TypeName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TypeName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Record Keys
// ============================================================================

/// Primary key representation declared by a record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryKeyKind {
    /// Unsigned integer keys.
    #[default]
    Integer,
    /// UUID keys.
    Uuid,
    /// Free-form text keys.
    Text,
}

/// Record primary key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    /// Integer key.
    Integer(u64),
    /// UUID key.
    Uuid(Uuid),
    /// Text key.
    Text(String),
}

impl RecordKey {
    /// Parses a stored string identifier into a key of the requested kind.
    ///
    /// Returns `None` when the string does not parse as that kind.
    #[must_use]
    pub fn parse_as(raw: &str, kind: PrimaryKeyKind) -> Option<Self> {
        match kind {
            PrimaryKeyKind::Integer => raw.trim().parse::<u64>().ok().map(Self::Integer),
            PrimaryKeyKind::Uuid => Uuid::parse_str(raw.trim()).ok().map(Self::Uuid),
            PrimaryKeyKind::Text => Some(Self::Text(raw.to_string())),
        }
    }

    /// Returns the kind of this key.
    #[must_use]
    pub const fn kind(&self) -> PrimaryKeyKind {
        match self {
            Self::Integer(_) => PrimaryKeyKind::Integer,
            Self::Uuid(_) => PrimaryKeyKind::Uuid,
            Self::Text(_) => PrimaryKeyKind::Text,
        }
    }

    /// Returns the canonical string form stored in share links.
    #[must_use]
    pub fn to_object_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => value.fmt(f),
            Self::Uuid(value) => value.hyphenated().fmt(f),
            Self::Text(value) => value.fmt(f),
        }
    }
}

impl From<NodeId> for RecordKey {
    fn from(value: NodeId) -> Self {
        Self::Integer(value.get())
    }
}
