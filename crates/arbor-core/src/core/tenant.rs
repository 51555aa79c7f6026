// crates/arbor-core/src/core/tenant.rs
// ============================================================================
// Module: Arbor Tenants
// Description: Tenant records, share links, validation, and hostname ranking.
// Purpose: Provide the pure tenant model consumed by the tenancy runtime.
// Dependencies: serde, thiserror, uuid, crate::{core::identifiers, interfaces}
// ============================================================================

//! ## Overview
//! A [`Tenant`] partitions records by ownership and is selected per request by
//! hostname and port. Exactly one tenant is the configured default. Records of
//! one tenant can be shared with another through [`SharedTenantMember`] links.
//! Hostname resolution ranks candidates and applies a fixed tie-break in
//! [`resolve_for_hostname`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::core::identifiers::ContentTypeId;
use crate::core::identifiers::TenantId;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Port assumed when a tenant or request names none.
pub const DEFAULT_PORT: u16 = 80;

/// Exact hostname and port match.
const MATCH_HOSTNAME_PORT: u8 = 0;
/// Hostname match on the default tenant.
const MATCH_HOSTNAME_DEFAULT: u8 = 1;
/// Default tenant without a hostname match.
const MATCH_DEFAULT: u8 = 2;
/// Hostname match on a non-default tenant with another port.
const MATCH_HOSTNAME: u8 = 3;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Offending field name.
    pub field: String,
    /// Human-readable message.
    pub message: String,
}

impl FieldError {
    /// Creates a field error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Tenant resolution and write-path errors.
#[derive(Debug, Error)]
pub enum TenantError {
    /// No tenant serves the hostname/port pair.
    #[error("no tenant matches {hostname}:{port}")]
    NotFound {
        /// Requested hostname.
        hostname: String,
        /// Requested port.
        port: u16,
    },
    /// Tenancy is misconfigured (for example, the default tenant is missing).
    #[error("tenant configuration error: {0}")]
    Configuration(String),
    /// Tenant failed validation before persistence.
    #[error("tenant validation failed: {}", join_field_errors(.0))]
    Validation(Vec<FieldError>),
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Renders field errors on one line.
fn join_field_errors(errors: &[FieldError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

// ============================================================================
// SECTION: Tenants
// ============================================================================

/// Persisted tenant.
///
/// # Invariants
/// - `label` is unique across tenants.
/// - `(hostname, port)` is unique across tenants when `hostname` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier.
    pub id: TenantId,
    /// Stable external identifier.
    pub uuid: Uuid,
    /// Unique human-readable label.
    pub label: String,
    /// Hostname served by the tenant.
    pub hostname: Option<String>,
    /// Port served by the tenant.
    pub port: u16,
    /// Open tenants are reachable by every user.
    pub is_open: bool,
}

impl Tenant {
    /// Returns the root URL of the tenant, if it has a hostname.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        let hostname = self.hostname.as_deref()?;
        Some(match self.port {
            80 => format!("http://{hostname}"),
            443 => format!("https://{hostname}"),
            port => format!("http://{hostname}:{port}"),
        })
    }

    /// Returns the display label, suffixed when this is the default tenant.
    #[must_use]
    pub fn display_label(&self, default_id: TenantId) -> String {
        if self.id == default_id { format!("{} (default)", self.label) } else { self.label.clone() }
    }
}

/// Tenant fields supplied on create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDraft {
    /// Unique label.
    pub label: String,
    /// Optional hostname.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Port (defaults to 80).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Open flag.
    #[serde(default)]
    pub is_open: bool,
}

impl TenantDraft {
    /// Creates a draft with the default port and no hostname.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), hostname: None, port: DEFAULT_PORT, is_open: false }
    }

    /// Sets the hostname and port.
    #[must_use]
    pub fn with_host(mut self, hostname: impl Into<String>, port: u16) -> Self {
        self.hostname = Some(hostname.into());
        self.port = port;
        self
    }

    /// Sets the open flag.
    #[must_use]
    pub const fn open(mut self, is_open: bool) -> Self {
        self.is_open = is_open;
        self
    }

    /// Returns the draft with its hostname trimmed and lowercased.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.hostname = self
            .hostname
            .map(|host| host.trim().to_ascii_lowercase())
            .filter(|host| !host.is_empty());
        self.label = self.label.trim().to_string();
        self
    }
}

/// Serde default for tenant ports.
const fn default_port() -> u16 {
    DEFAULT_PORT
}

impl From<&Tenant> for TenantDraft {
    fn from(value: &Tenant) -> Self {
        Self {
            label: value.label.clone(),
            hostname: value.hostname.clone(),
            port: value.port,
            is_open: value.is_open,
        }
    }
}

/// Validates a normalized draft against existing tenants.
///
/// `own_id` excludes the tenant being updated from uniqueness checks.
///
/// # Errors
///
/// Returns field-level errors for empty or duplicate labels, port zero, and duplicate
/// hostname/port pairs (reported on the `hostname` field).
pub fn validate_tenant(
    draft: &TenantDraft,
    existing: &[Tenant],
    own_id: Option<TenantId>,
) -> Result<(), Vec<FieldError>> {
    let others: Vec<&Tenant> =
        existing.iter().filter(|tenant| Some(tenant.id) != own_id).collect();
    let mut errors = Vec::new();
    if draft.label.is_empty() {
        errors.push(FieldError::new("label", "label is required"));
    } else if others.iter().any(|tenant| tenant.label == draft.label) {
        errors.push(FieldError::new("label", "a tenant with this label already exists"));
    }
    if draft.port == 0 {
        errors.push(FieldError::new("port", "port must be between 1 and 65535"));
    }
    if let Some(hostname) = &draft.hostname
        && others.iter().any(|tenant| {
            tenant.port == draft.port
                && tenant.hostname.as_deref().is_some_and(|host| host.eq_ignore_ascii_case(hostname))
        })
    {
        errors.push(FieldError::new(
            "hostname",
            format!("{hostname}:{} is already served by another tenant", draft.port),
        ));
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

// ============================================================================
// SECTION: Hostname Resolution
// ============================================================================

/// Selects the tenant serving `hostname:port`.
///
/// Candidates are tenants with the hostname plus the default tenant, ranked as
/// exact hostname and port (0), hostname on the default tenant (1), default
/// tenant (2), other hostname match (3). A single candidate or a best rank of 0
/// or 1 wins outright. With a best rank of 2 the second candidate wins only when
/// there are exactly two candidates; otherwise the default wins.
#[must_use]
pub fn resolve_for_hostname<'a>(
    tenants: &'a [Tenant],
    default_id: TenantId,
    hostname: &str,
    port: u16,
) -> Option<&'a Tenant> {
    let mut ranked: Vec<(u8, &Tenant)> = tenants
        .iter()
        .filter_map(|tenant| {
            let host_match =
                tenant.hostname.as_deref().is_some_and(|host| host.eq_ignore_ascii_case(hostname));
            let is_default = tenant.id == default_id;
            let rank = match (host_match, is_default) {
                (true, _) if tenant.port == port => MATCH_HOSTNAME_PORT,
                (true, true) => MATCH_HOSTNAME_DEFAULT,
                (false, true) => MATCH_DEFAULT,
                (true, false) => MATCH_HOSTNAME,
                (false, false) => return None,
            };
            Some((rank, tenant))
        })
        .collect();
    ranked.sort_by_key(|(rank, tenant)| (*rank, tenant.id));
    let (best, _) = ranked.first()?;
    if ranked.len() == 1 || *best == MATCH_HOSTNAME_PORT || *best == MATCH_HOSTNAME_DEFAULT {
        return ranked.first().map(|(_, tenant)| *tenant);
    }
    if *best == MATCH_DEFAULT {
        let index = usize::from(ranked.len() == 2);
        return ranked.get(index).map(|(_, tenant)| *tenant);
    }
    None
}

/// Splits a `host[:port]` request string; IPv6 literals use brackets.
///
/// Returns the lowercased host and the port when present and valid.
#[must_use]
pub fn split_host_port(raw: &str) -> (String, Option<u16>) {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('[')
        && let Some((host, tail)) = rest.split_once(']')
    {
        let port = tail.strip_prefix(':').and_then(|port| port.parse().ok());
        return (host.to_ascii_lowercase(), port);
    }
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            (host.to_ascii_lowercase(), port.parse().ok())
        }
        _ => (raw.to_ascii_lowercase(), None),
    }
}

// ============================================================================
// SECTION: Share Links
// ============================================================================

/// Link sharing one tenant's record with another tenant.
///
/// # Invariants
/// - Unique per `(recipient, content_type_id, object_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedTenantMember {
    /// Owning tenant of the shared record.
    pub sender: TenantId,
    /// Receiving tenant.
    pub recipient: TenantId,
    /// Content type of the shared record.
    pub content_type_id: ContentTypeId,
    /// Shared record key in string form.
    pub object_id: String,
}

// ============================================================================
// SECTION: Tenant Access Filters
// ============================================================================

/// Tenant access granted to one user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TenantGrants {
    /// The user's own tenant.
    #[serde(default)]
    pub native_tenant: Option<TenantId>,
    /// Tenants explicitly granted to the user.
    #[serde(default)]
    pub granted: BTreeSet<TenantId>,
}

/// Selection over the tenant list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantFilter {
    /// Tenants flagged open.
    Open,
    /// Tenants not flagged open.
    Restricted,
    /// The user's native tenant.
    NativeToUser(TenantGrants),
    /// Tenants granted to the user.
    GrantedToUser(TenantGrants),
    /// Open, native, or granted tenants.
    OpenToUser(TenantGrants),
}

impl TenantFilter {
    /// Returns true when the tenant is selected.
    #[must_use]
    pub fn matches(&self, tenant: &Tenant) -> bool {
        match self {
            Self::Open => tenant.is_open,
            Self::Restricted => !tenant.is_open,
            Self::NativeToUser(grants) => grants.native_tenant == Some(tenant.id),
            Self::GrantedToUser(grants) => grants.granted.contains(&tenant.id),
            Self::OpenToUser(grants) => {
                tenant.is_open
                    || grants.native_tenant == Some(tenant.id)
                    || grants.granted.contains(&tenant.id)
            }
        }
    }

    /// Returns the selected tenants, preserving input order.
    #[must_use]
    pub fn apply(&self, tenants: &[Tenant]) -> Vec<Tenant> {
        tenants.iter().filter(|tenant| self.matches(tenant)).cloned().collect()
    }
}
