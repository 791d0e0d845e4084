use std::future::Future;

use formulary_model::{ComputationStatus, Property, Value};

use super::{check, seed_fixture, Check, OTHER_TENANT, TENANT};
use crate::memory::StoreFixture;
use crate::{EntityStore, PropertyStateRecord, StorageError};

pub(super) async fn run_persist_tests<S, F, Fut>(factory: &F) -> Vec<Check>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        check(
            "persist",
            "computed_state_is_readable_after_persist",
            computed_state_is_readable_after_persist(factory).await,
        ),
        check(
            "persist",
            "persist_bumps_version",
            persist_bumps_version(factory).await,
        ),
        check(
            "persist",
            "error_state_keeps_supplied_value",
            error_state_keeps_supplied_value(factory).await,
        ),
        check(
            "persist",
            "inherited_resolution_is_persisted",
            inherited_resolution_is_persisted(factory).await,
        ),
        check(
            "persist",
            "literal_target_is_not_computed",
            literal_target_is_not_computed(factory).await,
        ),
        check(
            "persist",
            "missing_entity_is_not_found",
            missing_entity_is_not_found(factory).await,
        ),
        check(
            "persist",
            "missing_property_is_not_found",
            missing_property_is_not_found(factory).await,
        ),
        check(
            "persist",
            "persist_is_tenant_scoped",
            persist_is_tenant_scoped(factory).await,
        ),
    ]
}

fn valid_total(value: f64) -> PropertyStateRecord {
    PropertyStateRecord {
        entity_id: "order-1".to_string(),
        property_name: "total".to_string(),
        status: ComputationStatus::Valid,
        cached_value: Some(Value::number(value)),
        evaluated_at: Some("2025-01-01T00:00:00Z".to_string()),
        error: None,
        actor: "conformance".to_string(),
    }
}

// ── 1. Written state is visible to the next fetch ────────────────────────────

async fn computed_state_is_readable_after_persist<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    s.persist_computed_property(TENANT, valid_total(50.0))
        .await
        .map_err(|e| format!("persist failed: {}", e))?;
    let e = s
        .fetch_entity(TENANT, "order-1")
        .await
        .map_err(|e| format!("fetch failed: {}", e))?;
    let Some(Property::Computed(c)) = e.property("total") else {
        return Err("total is no longer a computed property".to_string());
    };
    if c.status != ComputationStatus::Valid {
        return Err(format!("expected valid, got {}", c.status));
    }
    if c.cached_value != Some(Value::number(50.0)) {
        return Err(format!("expected 50, got {:?}", c.cached_value));
    }
    if c.cached_at.as_deref() != Some("2025-01-01T00:00:00Z") {
        return Err(format!("expected cached_at to be set, got {:?}", c.cached_at));
    }
    Ok(())
}

// ── 2. Every persist produces a new, larger version ──────────────────────────

async fn persist_bumps_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    let before = s
        .fetch_entity(TENANT, "order-1")
        .await
        .map_err(|e| format!("fetch failed: {}", e))?
        .version;
    s.persist_computed_property(TENANT, valid_total(1.0))
        .await
        .map_err(|e| format!("persist failed: {}", e))?;
    let mid = s
        .fetch_entity(TENANT, "order-1")
        .await
        .map_err(|e| format!("fetch failed: {}", e))?
        .version;
    s.persist_computed_property(TENANT, valid_total(2.0))
        .await
        .map_err(|e| format!("persist failed: {}", e))?;
    let after = s
        .fetch_entity(TENANT, "order-1")
        .await
        .map_err(|e| format!("fetch failed: {}", e))?
        .version;
    if !(before < mid && mid < after) {
        return Err(format!(
            "versions must increase: {} -> {} -> {}",
            before, mid, after
        ));
    }
    Ok(())
}

// ── 3. An error record stores the message and the kept value ─────────────────

async fn error_state_keeps_supplied_value<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    s.persist_computed_property(TENANT, valid_total(50.0))
        .await
        .map_err(|e| format!("persist failed: {}", e))?;
    let record = PropertyStateRecord {
        status: ComputationStatus::Error,
        evaluated_at: None,
        error: Some("division by zero".to_string()),
        ..valid_total(50.0)
    };
    s.persist_computed_property(TENANT, record)
        .await
        .map_err(|e| format!("persist failed: {}", e))?;
    let e = s
        .fetch_entity(TENANT, "order-1")
        .await
        .map_err(|e| format!("fetch failed: {}", e))?;
    let Some(Property::Computed(c)) = e.property("total") else {
        return Err("total is no longer a computed property".to_string());
    };
    if c.status != ComputationStatus::Error || c.error.as_deref() != Some("division by zero") {
        return Err(format!("expected error state, got {} / {:?}", c.status, c.error));
    }
    if c.cached_value != Some(Value::number(50.0)) {
        return Err(format!("last value lost: {:?}", c.cached_value));
    }
    Ok(())
}

// ── 4. Inherited properties accept a resolved value ──────────────────────────

async fn inherited_resolution_is_persisted<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    let record = PropertyStateRecord {
        property_name: "tax_rate".to_string(),
        cached_value: Some(Value::number(0.2)),
        ..valid_total(0.0)
    };
    s.persist_computed_property(TENANT, record)
        .await
        .map_err(|e| format!("persist failed: {}", e))?;
    let e = s
        .fetch_entity(TENANT, "order-1")
        .await
        .map_err(|e| format!("fetch failed: {}", e))?;
    match e.property("tax_rate") {
        Some(p) if p.current_value() == Some(&Value::number(0.2)) => Ok(()),
        other => Err(format!("expected resolved 0.2, got {:?}", other)),
    }
}

// ── 5. Literal properties carry no computation state ─────────────────────────

async fn literal_target_is_not_computed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    let record = PropertyStateRecord {
        property_name: "qty".to_string(),
        ..valid_total(0.0)
    };
    match s.persist_computed_property(TENANT, record).await {
        Err(StorageError::NotComputed { property_name, .. }) if property_name == "qty" => Ok(()),
        other => Err(format!("expected NotComputed, got {:?}", other)),
    }
}

// ── 6. Unknown entity ────────────────────────────────────────────────────────

async fn missing_entity_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    let record = PropertyStateRecord {
        entity_id: "ghost".to_string(),
        ..valid_total(0.0)
    };
    match s.persist_computed_property(TENANT, record).await {
        Err(StorageError::EntityNotFound { entity_id, .. }) if entity_id == "ghost" => Ok(()),
        other => Err(format!("expected EntityNotFound, got {:?}", other)),
    }
}

// ── 7. Unknown property ──────────────────────────────────────────────────────

async fn missing_property_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    let record = PropertyStateRecord {
        property_name: "nope".to_string(),
        ..valid_total(0.0)
    };
    match s.persist_computed_property(TENANT, record).await {
        Err(StorageError::PropertyNotFound { property_name, .. }) if property_name == "nope" => {
            Ok(())
        }
        other => Err(format!("expected PropertyNotFound, got {:?}", other)),
    }
}

// ── 8. Writes under another tenant never reach seeded data ───────────────────

async fn persist_is_tenant_scoped<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    if s
        .persist_computed_property(OTHER_TENANT, valid_total(99.0))
        .await
        .is_ok()
    {
        return Err("persist succeeded for an entity the tenant does not own".to_string());
    }
    let e = s
        .fetch_entity(TENANT, "order-1")
        .await
        .map_err(|e| format!("fetch failed: {}", e))?;
    match e.property("total") {
        Some(p) if p.current_value().is_none() => Ok(()),
        other => Err(format!("seeded total was modified: {:?}", other)),
    }
}
