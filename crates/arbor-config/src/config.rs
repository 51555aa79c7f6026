// crates/arbor-config/src/config.rs
// ============================================================================
// Module: Arbor Configuration
// Description: Configuration loading and validation for Arbor.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: arbor-core, arbor-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section has defaults, so an empty file describes a single concrete
//! `page` type on the in-memory store. Unknown keys are rejected.
//!
//! ```toml
//! base_type = "page"
//!
//! [tree]
//! steplen = 4
//!
//! [store]
//! type = "sqlite"
//! path = "arbor.db"
//!
//! [[types]]
//! name = "page"
//!
//! [[types]]
//! name = "blog_post"
//! parent = "page"
//! deferrable_fields = ["body"]
//! ```

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::num::NonZeroU64;
use std::path::Path;
use std::path::PathBuf;

use arbor_core::DEFAULT_ALPHABET;
use arbor_core::DEFAULT_STEPLEN;
use arbor_core::JOIN_DELIMITER;
use arbor_core::PathSpec;
use arbor_core::PrimaryKeyKind;
use arbor_core::TenantId;
use arbor_core::TypeDescriptor;
use arbor_core::TypeName;
use arbor_core::TypeRegistry;
use arbor_store_sqlite::SqliteStoreConfig;
use arbor_store_sqlite::SqliteStoreMode;
use arbor_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "arbor.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "ARBOR_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of declared types.
pub const MAX_TYPES: usize = 512;
/// Maximum length of a type name.
pub const MAX_TYPE_NAME_LENGTH: usize = 128;
/// Maximum number of deferrable fields per type.
pub const MAX_DEFERRABLE_FIELDS: usize = 64;
/// Maximum length of a deferrable field name.
pub const MAX_FIELD_NAME_LENGTH: usize = 128;
/// Maximum `SQLite` busy timeout in milliseconds.
pub const MAX_BUSY_TIMEOUT_MS: u64 = 60_000;
/// Default base type for specific lookups.
const DEFAULT_BASE_TYPE: &str = "page";
/// Default `SQLite` busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Arbor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArborConfig {
    /// Materialized-path layout.
    #[serde(default)]
    pub tree: TreeConfig,
    /// Tenant resolution settings.
    #[serde(default)]
    pub tenancy: TenancyConfig,
    /// Record store backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Base type that tree queries upcast from.
    #[serde(default = "default_base_type")]
    pub base_type: String,
    /// Declared type hierarchy. Empty declares only the base type.
    #[serde(default)]
    pub types: Vec<TypeConfig>,
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            tree: TreeConfig::default(),
            tenancy: TenancyConfig::default(),
            store: StoreConfig::default(),
            base_type: default_base_type(),
            types: Vec::new(),
        }
    }
}

impl ArborConfig {
    /// Loads configuration using the default resolution rules.
    ///
    /// Resolution order: explicit `path`, then `ARBOR_CONFIG`, then
    /// `arbor.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tree.path_spec()?;
        self.store.validate()?;
        validate_type_name("base_type", &self.base_type)?;
        if self.types.len() > MAX_TYPES {
            return Err(ConfigError::Invalid(format!("types exceeds max of {MAX_TYPES}")));
        }
        for entry in &self.types {
            entry.validate()?;
        }
        validate_join_steps(&self.types)?;
        self.type_registry()?;
        Ok(())
    }

    /// Returns the configured path layout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the step width or alphabet is unusable.
    pub fn path_spec(&self) -> Result<PathSpec, ConfigError> {
        self.tree.path_spec()
    }

    /// Returns the base type name.
    #[must_use]
    pub fn base_type_name(&self) -> TypeName {
        TypeName::new(self.base_type.clone())
    }

    /// Builds the type registry and checks the base type against it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the hierarchy is inconsistent or
    /// the base type is missing or abstract.
    pub fn type_registry(&self) -> Result<TypeRegistry, ConfigError> {
        let base = self.base_type_name();
        let descriptors = if self.types.is_empty() {
            vec![TypeDescriptor::concrete(base.clone(), None)]
        } else {
            self.types.iter().map(TypeConfig::to_descriptor).collect()
        };
        let registry = TypeRegistry::new(descriptors)
            .map_err(|err| ConfigError::Invalid(format!("types: {err}")))?;
        match registry.descriptor(&base) {
            None => {
                return Err(ConfigError::Invalid(format!(
                    "base_type {base} is not a declared type"
                )));
            }
            Some(descriptor) if descriptor.is_abstract => {
                return Err(ConfigError::Invalid(format!("base_type {base} must be concrete")));
            }
            Some(_) => {}
        }
        registry
            .specific_lookups(&base)
            .map_err(|err| ConfigError::Invalid(format!("base_type: {err}")))?;
        Ok(registry)
    }

    /// Returns the default tenant id.
    #[must_use]
    pub const fn default_tenant_id(&self) -> TenantId {
        self.tenancy.default_tenant_id
    }
}

/// Materialized-path layout configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeConfig {
    /// Characters per tree level.
    #[serde(default = "default_steplen")]
    pub steplen: usize,
    /// Step digits, lowest value first.
    #[serde(default = "default_alphabet")]
    pub alphabet: String,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self { steplen: default_steplen(), alphabet: default_alphabet() }
    }
}

impl TreeConfig {
    /// Builds the validated path spec.
    fn path_spec(&self) -> Result<PathSpec, ConfigError> {
        PathSpec::new(self.steplen, &self.alphabet)
            .map_err(|err| ConfigError::Invalid(format!("tree: {err}")))
    }
}

/// Tenant resolution configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenancyConfig {
    /// Tenant used when no hostname matches.
    #[serde(default = "default_tenant_id")]
    pub default_tenant_id: TenantId,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self { default_tenant_id: default_tenant_id() }
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

impl StoreConfig {
    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid("memory store must not set path".to_string()));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                validate_path_string("store.path", &path.to_string_lossy())?;
                if self.busy_timeout_ms > MAX_BUSY_TIMEOUT_MS {
                    return Err(ConfigError::Invalid(format!(
                        "store.busy_timeout_ms exceeds max of {MAX_BUSY_TIMEOUT_MS}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Returns the `SQLite` store config when the sqlite backend is selected.
    #[must_use]
    pub fn sqlite_config(&self) -> Option<SqliteStoreConfig> {
        match (self.store_type, &self.path) {
            (StoreType::Sqlite, Some(path)) => Some(SqliteStoreConfig {
                path: path.clone(),
                busy_timeout_ms: self.busy_timeout_ms,
                journal_mode: self.journal_mode,
                sync_mode: self.sync_mode,
            }),
            _ => None,
        }
    }
}

/// Record store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store.
    #[default]
    Memory,
    /// Use the `SQLite`-backed durable store.
    Sqlite,
}

/// Declared record type.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeConfig {
    /// Type name.
    pub name: String,
    /// Parent type name.
    #[serde(default)]
    pub parent: Option<String>,
    /// Abstract types hold no rows of their own.
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Large fields skipped by deferred loading.
    #[serde(default)]
    pub deferrable_fields: Vec<String>,
    /// Primary key kind of the type's records.
    #[serde(default)]
    pub primary_key: PrimaryKeyKind,
}

impl TypeConfig {
    /// Validates a single type entry.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_type_name("types.name", &self.name)?;
        if let Some(parent) = &self.parent {
            validate_type_name("types.parent", parent)?;
        }
        if self.deferrable_fields.len() > MAX_DEFERRABLE_FIELDS {
            return Err(ConfigError::Invalid(format!(
                "types.{}.deferrable_fields exceeds max of {MAX_DEFERRABLE_FIELDS}",
                self.name
            )));
        }
        let mut seen = BTreeSet::new();
        for field in &self.deferrable_fields {
            if field.is_empty() || field.len() > MAX_FIELD_NAME_LENGTH {
                return Err(ConfigError::Invalid(format!(
                    "types.{}.deferrable_fields entries must be 1..={MAX_FIELD_NAME_LENGTH} bytes",
                    self.name
                )));
            }
            if !seen.insert(field.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "types.{}.deferrable_fields contains duplicate {field}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Converts the entry into a registry descriptor.
    fn to_descriptor(&self) -> TypeDescriptor {
        let name = TypeName::new(self.name.clone());
        let parent = self.parent.clone().map(TypeName::new);
        let descriptor = if self.is_abstract {
            TypeDescriptor::abstract_type(name, parent)
        } else {
            TypeDescriptor::concrete(name, parent)
        };
        descriptor
            .with_deferrable(self.deferrable_fields.iter().cloned())
            .with_primary_key(self.primary_key)
    }
}

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the default step width.
const fn default_steplen() -> usize {
    DEFAULT_STEPLEN
}

/// Returns the default step alphabet.
fn default_alphabet() -> String {
    DEFAULT_ALPHABET.to_string()
}

/// Returns the default base type.
fn default_base_type() -> String {
    DEFAULT_BASE_TYPE.to_string()
}

/// Returns the default tenant id.
const fn default_tenant_id() -> TenantId {
    TenantId::new(NonZeroU64::MIN)
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a dotted type name such as `blog.BlogPage`.
fn validate_type_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || value.len() > MAX_TYPE_NAME_LENGTH {
        return Err(ConfigError::Invalid(format!(
            "{field} must be 1..={MAX_TYPE_NAME_LENGTH} bytes"
        )));
    }
    let well_formed = value.split('.').all(|segment| {
        !segment.is_empty() && segment.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    });
    if !well_formed {
        return Err(ConfigError::Invalid(format!(
            "{field} {value} must be dot-separated ASCII identifiers"
        )));
    }
    if TypeName::new(value).step_name().contains(JOIN_DELIMITER) {
        return Err(ConfigError::Invalid(format!(
            "{field} {value} must not contain {JOIN_DELIMITER}"
        )));
    }
    Ok(())
}

/// Rejects sibling types whose join steps collide.
fn validate_join_steps(types: &[TypeConfig]) -> Result<(), ConfigError> {
    let mut steps: BTreeMap<(Option<&str>, String), &str> = BTreeMap::new();
    for entry in types {
        let step = TypeName::new(entry.name.clone()).step_name();
        let key = (entry.parent.as_deref(), step);
        if let Some(existing) = steps.insert(key, &entry.name)
            && existing != entry.name
        {
            return Err(ConfigError::Invalid(format!(
                "types {existing} and {} share a join step",
                entry.name
            )));
        }
    }
    Ok(())
}
