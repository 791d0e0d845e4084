use std::future::Future;

use super::{check, seed_fixture, Check, OTHER_TENANT, TENANT};
use crate::memory::StoreFixture;
use crate::{EntityStore, StorageError};

pub(super) async fn run_fetch_tests<S, F, Fut>(factory: &F) -> Vec<Check>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        check(
            "fetch",
            "fetch_by_ids_returns_requested_entities",
            fetch_by_ids_returns_requested_entities(factory).await,
        ),
        check(
            "fetch",
            "missing_ids_are_omitted",
            missing_ids_are_omitted(factory).await,
        ),
        check(
            "fetch",
            "empty_id_list_returns_nothing",
            empty_id_list_returns_nothing(factory).await,
        ),
        check(
            "fetch",
            "other_tenant_sees_nothing",
            other_tenant_sees_nothing(factory).await,
        ),
        check(
            "fetch",
            "fetch_entity_not_found_has_correct_fields",
            fetch_entity_not_found_has_correct_fields(factory).await,
        ),
        check(
            "relationships",
            "targets_keep_insertion_order",
            targets_keep_insertion_order(factory).await,
        ),
        check(
            "relationships",
            "unknown_entity_has_no_relationships",
            unknown_entity_has_no_relationships(factory).await,
        ),
        check(
            "relationships",
            "relationships_are_tenant_scoped",
            relationships_are_tenant_scoped(factory).await,
        ),
    ]
}

// ── 1. fetch_entities_by_ids returns every requested, existing entity ────────

async fn fetch_by_ids_returns_requested_entities<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    let ids = vec!["order-1".to_string(), "cust-1".to_string()];
    let mut found: Vec<String> = s
        .fetch_entities_by_ids(TENANT, &ids)
        .await
        .map_err(|e| format!("fetch failed: {}", e))?
        .into_iter()
        .map(|e| e.id)
        .collect();
    found.sort();
    if found != ["cust-1", "order-1"] {
        return Err(format!("expected [cust-1, order-1], got {:?}", found));
    }
    Ok(())
}

// ── 2. Unknown ids are silently dropped ──────────────────────────────────────

async fn missing_ids_are_omitted<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    let ids = vec!["order-1".to_string(), "ghost".to_string()];
    let found = s
        .fetch_entities_by_ids(TENANT, &ids)
        .await
        .map_err(|e| format!("missing id must not be an error, got {}", e))?;
    if found.len() != 1 || found[0].id != "order-1" {
        return Err(format!("expected only order-1, got {} entities", found.len()));
    }
    Ok(())
}

// ── 3. Empty request ─────────────────────────────────────────────────────────

async fn empty_id_list_returns_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    let found = s
        .fetch_entities_by_ids(TENANT, &[])
        .await
        .map_err(|e| format!("fetch failed: {}", e))?;
    if !found.is_empty() {
        return Err(format!("expected no entities, got {}", found.len()));
    }
    Ok(())
}

// ── 4. Another tenant cannot read seeded entities ────────────────────────────

async fn other_tenant_sees_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    let ids = vec!["order-1".to_string()];
    let found = s
        .fetch_entities_by_ids(OTHER_TENANT, &ids)
        .await
        .map_err(|e| format!("fetch failed: {}", e))?;
    if !found.is_empty() {
        return Err("entity leaked across tenants".to_string());
    }
    Ok(())
}

// ── 5. fetch_entity reports tenant and id on a miss ──────────────────────────

async fn fetch_entity_not_found_has_correct_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    match s.fetch_entity(TENANT, "ghost").await {
        Err(StorageError::EntityNotFound {
            tenant_id,
            entity_id,
        }) => {
            if tenant_id != TENANT || entity_id != "ghost" {
                return Err(format!(
                    "expected {}/ghost, got {}/{}",
                    TENANT, tenant_id, entity_id
                ));
            }
            Ok(())
        }
        other => Err(format!("expected EntityNotFound, got {:?}", other)),
    }
}

// ── 6. Relationship targets come back in stored order ────────────────────────

async fn targets_keep_insertion_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    let rels = s
        .fetch_outgoing_relationships(TENANT, "order-1")
        .await
        .map_err(|e| format!("fetch failed: {}", e))?;
    match rels.get("lines") {
        Some(targets) if targets == &["line-1", "line-2", "line-3"] => {}
        other => return Err(format!("expected ordered lines, got {:?}", other)),
    }
    match rels.get("customer") {
        Some(targets) if targets == &["cust-1"] => Ok(()),
        other => Err(format!("expected customer [cust-1], got {:?}", other)),
    }
}

// ── 7. Entities without edges yield an empty map ─────────────────────────────

async fn unknown_entity_has_no_relationships<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    let rels = s
        .fetch_outgoing_relationships(TENANT, "ghost")
        .await
        .map_err(|e| format!("unknown entity must not be an error, got {}", e))?;
    if !rels.is_empty() {
        return Err(format!("expected no relationships, got {:?}", rels));
    }
    Ok(())
}

// ── 8. Relationships are tenant-scoped ───────────────────────────────────────

async fn relationships_are_tenant_scoped<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EntityStore,
    F: Fn(StoreFixture) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(seed_fixture()).await;
    let rels = s
        .fetch_outgoing_relationships(OTHER_TENANT, "order-1")
        .await
        .map_err(|e| format!("fetch failed: {}", e))?;
    if !rels.is_empty() {
        return Err("relationships leaked across tenants".to_string());
    }
    Ok(())
}
