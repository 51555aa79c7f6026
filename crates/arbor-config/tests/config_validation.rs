//! Section validation tests for arbor-config.
// crates/arbor-config/tests/config_validation.rs
// =============================================================================
// Module: Config Validation Tests
// Description: Tree, store, tenancy, and type hierarchy validation.
// Purpose: Ensure invalid configuration fails closed with clear messages.
// =============================================================================

use std::path::PathBuf;

use arbor_config::MAX_BUSY_TIMEOUT_MS;
use arbor_config::MAX_DEFERRABLE_FIELDS;
use arbor_config::MAX_TYPE_NAME_LENGTH;
use arbor_config::StoreType;
use arbor_config::TypeConfig;
use arbor_core::DEFAULT_ALPHABET;
use arbor_core::DEFAULT_STEPLEN;
use arbor_core::PrimaryKeyKind;
use arbor_core::TypeName;
use arbor_store_sqlite::SqliteStoreMode;
use arbor_store_sqlite::SqliteSyncMode;

mod common;

use common::TestResult;
use common::assert_invalid;
use common::assert_toml_invalid;
use common::minimal_config;
use common::validated;

// ============================================================================
// SECTION: Defaults
// ============================================================================

#[test]
fn empty_config_is_valid_with_defaults() -> TestResult {
    let config = validated("")?;
    if config.tree.steplen != DEFAULT_STEPLEN || config.tree.alphabet != DEFAULT_ALPHABET {
        return Err("tree defaults not applied".to_string());
    }
    if config.store.store_type != StoreType::Memory || config.store.path.is_some() {
        return Err("store should default to memory without a path".to_string());
    }
    if config.default_tenant_id().get() != 1 {
        return Err("default tenant should be 1".to_string());
    }
    let registry = config.type_registry().map_err(|err| err.to_string())?;
    let names: Vec<&TypeName> = registry.names().collect();
    if names != vec![&TypeName::new("page")] {
        return Err(format!("expected implicit page type, got {} types", names.len()));
    }
    Ok(())
}

#[test]
fn unknown_keys_are_rejected() -> TestResult {
    for toml_str in [
        "unexpected = true",
        "[tree]\nwidth = 4",
        "[store]\nkind = \"memory\"",
        "[tenancy]\ndefault = 2",
        "[[types]]\nname = \"page\"\nlabel = \"Page\"",
    ] {
        if common::config_from_toml(toml_str).is_ok() {
            return Err(format!("expected parse failure for {toml_str}"));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tree Layout
// ============================================================================

#[test]
fn tree_layout_builds_path_spec() -> TestResult {
    let config = validated("[tree]\nsteplen = 2\nalphabet = \"0123456789\"")?;
    let spec = config.path_spec().map_err(|err| err.to_string())?;
    if spec.steplen() != 2 || spec.alphabet() != "0123456789" {
        return Err("path spec does not match config".to_string());
    }
    Ok(())
}

#[test]
fn tree_steplen_out_of_range_is_rejected() -> TestResult {
    assert_toml_invalid("[tree]\nsteplen = 0", "steplen must be between 1 and 16")?;
    assert_toml_invalid("[tree]\nsteplen = 17", "steplen must be between 1 and 16")
}

#[test]
fn tree_alphabet_rules_are_enforced() -> TestResult {
    assert_toml_invalid("[tree]\nalphabet = \"0\"", "at least two characters")?;
    assert_toml_invalid("[tree]\nalphabet = \"01-\"", "ASCII alphanumerics only")?;
    assert_toml_invalid("[tree]\nalphabet = \"0112\"", "must be unique")?;
    assert_toml_invalid("[tree]\nalphabet = \"10\"", "ascending byte order")
}

// ============================================================================
// SECTION: Tenancy
// ============================================================================

#[test]
fn tenancy_default_tenant_is_configurable() -> TestResult {
    let config = validated("[tenancy]\ndefault_tenant_id = 7")?;
    if config.default_tenant_id().get() != 7 {
        return Err("default tenant id not applied".to_string());
    }
    Ok(())
}

#[test]
fn tenancy_zero_default_tenant_fails_to_parse() -> TestResult {
    if common::config_from_toml("[tenancy]\ndefault_tenant_id = 0").is_ok() {
        return Err("zero tenant id should not parse".to_string());
    }
    Ok(())
}

// ============================================================================
// SECTION: Store
// ============================================================================

#[test]
fn memory_store_rejects_path() -> TestResult {
    assert_toml_invalid(
        "[store]\ntype = \"memory\"\npath = \"arbor.db\"",
        "memory store must not set path",
    )
}

#[test]
fn sqlite_store_requires_path() -> TestResult {
    assert_toml_invalid("[store]\ntype = \"sqlite\"", "sqlite store requires path")?;
    assert_toml_invalid("[store]\ntype = \"sqlite\"\npath = \"  \"", "store.path must be non-empty")
}

#[test]
fn sqlite_store_rejects_long_path_component() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.store.store_type = StoreType::Sqlite;
    config.store.path = Some(PathBuf::from("a".repeat(256)));
    assert_invalid(config.validate(), "store.path path component too long")
}

#[test]
fn sqlite_store_rejects_excessive_busy_timeout() -> TestResult {
    let toml_str = format!(
        "[store]\ntype = \"sqlite\"\npath = \"arbor.db\"\nbusy_timeout_ms = {}",
        MAX_BUSY_TIMEOUT_MS + 1
    );
    assert_toml_invalid(&toml_str, "busy_timeout_ms exceeds max")
}

#[test]
fn sqlite_store_config_carries_pragmas() -> TestResult {
    let config = validated(
        "[store]\ntype = \"sqlite\"\npath = \"data/arbor.db\"\nbusy_timeout_ms = 250\njournal_mode = \
         \"delete\"\nsync_mode = \"normal\"",
    )?;
    let sqlite = config.store.sqlite_config().ok_or("expected sqlite config")?;
    if sqlite.path != PathBuf::from("data/arbor.db")
        || sqlite.busy_timeout_ms != 250
        || sqlite.journal_mode != SqliteStoreMode::Delete
        || sqlite.sync_mode != SqliteSyncMode::Normal
    {
        return Err("sqlite config does not match".to_string());
    }
    if minimal_config().map_err(|err| err.to_string())?.store.sqlite_config().is_some() {
        return Err("memory store should not produce sqlite config".to_string());
    }
    Ok(())
}

// ============================================================================
// SECTION: Type Hierarchy
// ============================================================================

/// Blog hierarchy used by the type tests.
const BLOG_TYPES: &str = r#"
base_type = "page"

[[types]]
name = "page"

[[types]]
name = "blog.BlogPost"
parent = "page"
deferrable_fields = ["body"]

[[types]]
name = "blog.FeaturedPost"
parent = "blog.BlogPost"

[[types]]
name = "media.Gallery"
parent = "page"
abstract = true

[[types]]
name = "documents.Document"
primary_key = "uuid"
"#;

#[test]
fn type_hierarchy_builds_registry() -> TestResult {
    let config = validated(BLOG_TYPES)?;
    let registry = config.type_registry().map_err(|err| err.to_string())?;
    let featured = TypeName::new("blog.FeaturedPost");
    if !registry.is_subtype(&featured, &TypeName::new("page")) {
        return Err("featured post should descend from page".to_string());
    }
    let post = registry
        .descriptor(&TypeName::new("blog.BlogPost"))
        .ok_or("blog post not registered")?;
    if !post.deferrable_fields.contains("body") {
        return Err("deferrable fields not carried".to_string());
    }
    let document = registry
        .descriptor(&TypeName::new("documents.Document"))
        .ok_or("document not registered")?;
    if document.primary_key != PrimaryKeyKind::Uuid {
        return Err("primary key kind not carried".to_string());
    }
    let gallery = registry
        .descriptor(&TypeName::new("media.Gallery"))
        .ok_or("gallery not registered")?;
    if !gallery.is_abstract {
        return Err("gallery should be abstract".to_string());
    }
    Ok(())
}

#[test]
fn type_unknown_parent_is_rejected() -> TestResult {
    assert_toml_invalid(
        "[[types]]\nname = \"page\"\n\n[[types]]\nname = \"post\"\nparent = \"missing\"",
        "names unknown parent missing",
    )
}

#[test]
fn type_cycle_is_rejected() -> TestResult {
    assert_toml_invalid(
        "base_type = \"a\"\n\n[[types]]\nname = \"a\"\nparent = \"b\"\n\n[[types]]\nname = \
         \"b\"\nparent = \"a\"",
        "inheritance cycle",
    )
}

#[test]
fn type_duplicate_is_rejected() -> TestResult {
    assert_toml_invalid("[[types]]\nname = \"page\"\n\n[[types]]\nname = \"page\"", "duplicate type")
}

#[test]
fn base_type_must_be_declared_and_concrete() -> TestResult {
    assert_toml_invalid("[[types]]\nname = \"post\"", "base_type page is not a declared type")?;
    assert_toml_invalid("[[types]]\nname = \"page\"\nabstract = true", "must be concrete")
}

#[test]
fn type_names_must_be_identifiers() -> TestResult {
    assert_toml_invalid("[[types]]\nname = \"blog..Post\"", "dot-separated ASCII identifiers")?;
    assert_toml_invalid("[[types]]\nname = \"blog post\"", "dot-separated ASCII identifiers")?;
    assert_toml_invalid("[[types]]\nname = \"blog.my__post\"", "must not contain __")?;
    let long = format!("[[types]]\nname = \"{}\"", "p".repeat(MAX_TYPE_NAME_LENGTH + 1));
    assert_toml_invalid(&long, "types.name must be 1..=")
}

#[test]
fn sibling_join_steps_must_differ() -> TestResult {
    assert_toml_invalid(
        "[[types]]\nname = \"page\"\n\n[[types]]\nname = \"blog.Post\"\nparent = \
         \"page\"\n\n[[types]]\nname = \"news.post\"\nparent = \"page\"",
        "share a join step",
    )
}

#[test]
fn deferrable_field_limits_are_enforced() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.types.push(TypeConfig {
        name: "page".to_string(),
        parent: None,
        is_abstract: false,
        deferrable_fields: (0 ..= MAX_DEFERRABLE_FIELDS).map(|i| format!("field{i}")).collect(),
        primary_key: PrimaryKeyKind::Integer,
    });
    assert_invalid(config.validate(), "deferrable_fields exceeds max")?;
    config.types[0].deferrable_fields = vec!["body".to_string(), "body".to_string()];
    assert_invalid(config.validate(), "contains duplicate body")
}
