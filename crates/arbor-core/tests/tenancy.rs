// crates/arbor-core/tests/tenancy.rs
// ============================================================================
// Module: Tenant Resolution Tests
// Description: Tests for hostname ranking, default fallback, and unit-of-work guards.
// Purpose: Validate tenant selection and active-tenant lifecycle guarantees.
// Dependencies: arbor-core
// ============================================================================
//! ## Overview
//! Exercises [`arbor_core::TenantContext`] against the in-memory store:
//! ranking and tie-breaks, configuration failures, guard cleanup on every
//! exit path, and cache refresh after tenant writes.
//!
//! Security posture: active-tenant entries must never outlive their unit of work.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::thread;

use arbor_core::InMemoryStore;
use arbor_core::Tenant;
use arbor_core::TenantContext;
use arbor_core::TenantDraft;
use arbor_core::TenantError;
use arbor_core::TenantFilter;
use arbor_core::TenantGrants;
use arbor_core::TenantId;
use arbor_core::UnitKey;

/// Creates a context whose default tenant is the first inserted tenant.
fn context() -> TenantContext<InMemoryStore> {
    TenantContext::new(InMemoryStore::default(), TenantId::from_raw(1).expect("nonzero"))
}

/// Creates a tenant through the write path.
fn create(ctx: &TenantContext<InMemoryStore>, label: &str, host: Option<(&str, u16)>) -> Tenant {
    let draft = match host {
        Some((hostname, port)) => TenantDraft::new(label).with_host(hostname, port),
        None => TenantDraft::new(label),
    };
    ctx.create_tenant(draft).expect("create tenant")
}

/// Verifies an unmatched hostname resolves to the default tenant.
#[test]
fn unmatched_hostname_falls_back_to_default() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = context();
    let default = create(&ctx, "Main", Some(("main.example", 80)));
    create(&ctx, "Other", Some(("other.example", 80)));
    assert_eq!(ctx.tenant_for_hostname("unknown.example", 80)?.id, default.id);
    Ok(())
}

/// Verifies exact and default-host matches win outright.
#[test]
fn exact_and_default_host_matches_win() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = context();
    let default = create(&ctx, "Main", Some(("main.example", 80)));
    let other = create(&ctx, "Other", Some(("other.example", 80)));
    assert_eq!(ctx.tenant_for_hostname("other.example", 80)?.id, other.id);
    assert_eq!(ctx.tenant_for_hostname("OTHER.example", 80)?.id, other.id);
    assert_eq!(ctx.tenant_for_hostname("main.example", 8080)?.id, default.id);
    Ok(())
}

/// Verifies a unique port-mismatched host match beats the default, but ties do not.
#[test]
fn hostname_tie_break_prefers_unique_match() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = context();
    let default = create(&ctx, "Main", Some(("main.example", 80)));
    let other = create(&ctx, "Other", Some(("other.example", 80)));
    assert_eq!(ctx.tenant_for_hostname("other.example", 8080)?.id, other.id);

    create(&ctx, "Other TLS", Some(("other.example", 8443)));
    assert_eq!(ctx.tenant_for_hostname("other.example", 8080)?.id, default.id);
    Ok(())
}

/// Verifies request host strings carry their port.
#[test]
fn request_host_strings_are_split() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = context();
    create(&ctx, "Main", Some(("main.example", 80)));
    let alt = create(&ctx, "Alt", Some(("main.example", 8000)));
    assert_eq!(ctx.tenant_for_request("Main.Example:8000", 80)?.id, alt.id);
    assert_eq!(ctx.tenant_for_request("main.example", 8000)?.id, alt.id);
    Ok(())
}

/// Verifies a missing default tenant is a configuration error.
#[test]
fn missing_default_is_a_configuration_error() {
    let ctx = TenantContext::new(InMemoryStore::default(), TenantId::from_raw(99).expect("nonzero"));
    ctx.create_tenant(TenantDraft::new("Only").with_host("only.example", 80)).expect("create");
    ctx.create_tenant(TenantDraft::new("Twin").with_host("only.example", 81)).expect("create");
    let result = ctx.tenant_for_hostname("only.example", 82);
    assert!(matches!(result, Err(TenantError::Configuration(_))));
    assert!(matches!(ctx.default_tenant(), Err(TenantError::Configuration(_))));
    assert!(matches!(ctx.active_tenant(), Err(TenantError::Configuration(_))));
}

/// Verifies the guard removes the entry after success, failure, and panic.
#[test]
fn unit_of_work_always_clears_its_entry() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = context();
    create(&ctx, "Main", Some(("main.example", 80)));
    let other = create(&ctx, "Other", Some(("other.example", 80)));

    let seen = ctx.run_unit_of_work("other.example", 80, |tenant| {
        assert_eq!(ctx.active_registry().len(), 1);
        Ok::<_, TenantError>((tenant.id, ctx.active_tenant()?.id))
    })?;
    assert_eq!(seen, (other.id, other.id));
    assert!(ctx.active_registry().is_empty());

    let failed: Result<(), TenantError> = ctx
        .run_unit_of_work("other.example", 80, |_| Err(TenantError::Configuration("boom".to_string())));
    assert!(failed.is_err());
    assert!(ctx.active_registry().is_empty());

    let unwound = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let _: Result<(), TenantError> =
            ctx.run_unit_of_work("other.example", 80, |_| panic!("request aborted"));
    }));
    assert!(unwound.is_err());
    assert!(ctx.active_registry().is_empty());
    assert_eq!(ctx.active_tenant()?.label, "Main");
    Ok(())
}

/// Verifies task-keyed entries are isolated from the calling thread.
#[test]
fn task_keys_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = context();
    let main = create(&ctx, "Main", Some(("main.example", 80)));
    let other = create(&ctx, "Other", Some(("other.example", 80)));
    let guard = ctx.begin_unit_of_work(UnitKey::Task(7), "other.example", 80)?;
    assert_eq!(guard.key(), UnitKey::Task(7));
    assert_eq!(ctx.active_tenant_for(UnitKey::Task(7))?.id, other.id);
    assert_eq!(ctx.active_tenant()?.id, main.id);
    drop(guard);
    assert_eq!(ctx.active_tenant_for(UnitKey::Task(7))?.id, main.id);
    Ok(())
}

/// Verifies concurrent threads see their own active tenant.
#[test]
fn concurrent_units_do_not_interfere() {
    let ctx = context();
    let main = create(&ctx, "Main", Some(("main.example", 80)));
    let other = create(&ctx, "Other", Some(("other.example", 80)));
    thread::scope(|scope| {
        let handles: Vec<_> = [("main.example", main.id), ("other.example", other.id)]
            .into_iter()
            .map(|(host, expected)| {
                let ctx = &ctx;
                scope.spawn(move || {
                    for _ in 0 .. 50 {
                        let id = ctx
                            .run_unit_of_work(host, 80, |_| ctx.active_tenant().map(|tenant| tenant.id))
                            .expect("unit of work");
                        assert_eq!(id, expected);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
    });
    assert!(ctx.active_registry().is_empty());
}

/// Verifies duplicate host/port pairs are rejected on the hostname field.
#[test]
fn validation_rejects_duplicates_before_persistence() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = context();
    create(&ctx, "Main", Some(("main.example", 80)));
    let duplicate = ctx.create_tenant(TenantDraft::new("Copy").with_host(" MAIN.example ", 80));
    let Err(TenantError::Validation(errors)) = duplicate else {
        panic!("expected validation error");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field, "hostname");

    let blank = ctx.create_tenant(TenantDraft::new("   "));
    let Err(TenantError::Validation(errors)) = blank else {
        panic!("expected validation error");
    };
    assert_eq!(errors[0].field, "label");
    assert_eq!(ctx.tenants(None)?.len(), 1);
    Ok(())
}

/// Verifies tenant writes refresh the default cache and active entries.
#[test]
fn writes_refresh_active_entries() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = context();
    let main = create(&ctx, "Main", Some(("main.example", 80)));
    let other = create(&ctx, "Other", Some(("other.example", 80)));
    let guard = ctx.begin_unit_of_work(UnitKey::Task(1), "other.example", 80)?;

    let renamed = ctx.update_tenant(&Tenant { label: "Renamed".to_string(), ..other.clone() })?;
    assert_eq!(ctx.active_tenant_for(UnitKey::Task(1))?.label, renamed.label);

    ctx.update_tenant(&Tenant { label: "Main v2".to_string(), ..main.clone() })?;
    assert_eq!(ctx.default_tenant()?.label, "Main v2");

    assert!(ctx.delete_tenant(other.id)?);
    assert_eq!(ctx.active_tenant_for(UnitKey::Task(1))?.id, main.id);
    assert!(!ctx.delete_tenant(other.id)?);
    drop(guard);
    ctx.after_migrate()?;
    assert!(ctx.active_registry().is_empty());
    Ok(())
}

/// Verifies user resolution is limited to open, native, and granted tenants.
#[test]
fn user_resolution_respects_access() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = context();
    let main = ctx.create_tenant(TenantDraft::new("Main").with_host("main.example", 80).open(true))?;
    let native = create(&ctx, "Native", Some(("native.example", 80)));
    let restricted = create(&ctx, "Restricted", Some(("restricted.example", 80)));
    let grants = TenantGrants { native_tenant: Some(native.id), granted: BTreeSet::new() };

    assert_eq!(ctx.tenant_for_user(&grants, None, "native.example", 80)?.id, native.id);
    assert_eq!(ctx.tenant_for_user(&grants, None, "restricted.example", 80)?.id, main.id);
    assert_eq!(ctx.tenant_for_user(&grants, Some(native.id), "main.example", 80)?.id, native.id);
    assert_eq!(ctx.tenant_for_user(&grants, Some(restricted.id), "main.example", 80)?.id, main.id);

    let open = ctx.tenants(Some(&TenantFilter::Open))?;
    assert_eq!(open.iter().map(|tenant| tenant.id).collect::<Vec<_>>(), vec![main.id]);
    let closed = ctx.tenants(Some(&TenantFilter::Restricted))?;
    assert_eq!(closed.len(), 2);

    ctx.update_tenant(&Tenant { is_open: false, ..main })?;
    let stranger = TenantGrants::default();
    let denied = ctx.tenant_for_user(&stranger, None, "main.example", 80);
    assert!(matches!(denied, Err(TenantError::Configuration(_))));
    Ok(())
}

/// Verifies tenant URLs and display labels.
#[test]
fn tenant_urls_and_labels() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = context();
    let main = create(&ctx, "Main", Some(("main.example", 80)));
    let tls = create(&ctx, "Secure", Some(("secure.example", 443)));
    let custom = create(&ctx, "Custom", Some(("custom.example", 8080)));
    let bare = create(&ctx, "Bare", None);
    assert_eq!(main.url().as_deref(), Some("http://main.example"));
    assert_eq!(tls.url().as_deref(), Some("https://secure.example"));
    assert_eq!(custom.url().as_deref(), Some("http://custom.example:8080"));
    assert_eq!(bare.url(), None);
    assert_eq!(main.display_label(ctx.default_tenant_id()), "Main (default)");
    assert_eq!(tls.display_label(ctx.default_tenant_id()), "Secure");
    Ok(())
}
