//! Computation service against the in-memory store.
//!
//! 1. Arithmetic over own properties, written back as `valid`
//! 2. Same-pass dependencies resolve in dependency order
//! 3. Cycles mark their members `circular`, dependents `error`
//! 4. `only_stale` leaves valid properties untouched
//! 5. Relationship traversal and inherited resolution
//! 5a. Multi-hop chains and the max_depth cutoff
//! 6. Storage failures become property errors
//! 7. load, compute and persist in one call

use std::sync::Arc;

use formulary_core::parse;
use formulary_eval::{
    ComputationService, ComputeError, ComputeOptions, ContextBuilder, EngineConfig,
};
use formulary_model::{ComputationStatus, ComputedProperty, Entity, Property, Value};
use formulary_storage::conformance::{seed_fixture, TENANT};
use formulary_storage::{EntityStore, InMemoryStore, StorageError};

// ──────────────────────────────────────────────
// Fixtures
// ──────────────────────────────────────────────

fn seeded() -> (Arc<InMemoryStore>, ComputationService<Arc<InMemoryStore>>) {
    let store = Arc::new(InMemoryStore::from_fixture(seed_fixture()));
    let service = ComputationService::new(Arc::clone(&store), EngineConfig::default());
    (store, service)
}

fn computed(name: &str, expression: &str) -> Property {
    Property::Computed(ComputedProperty::new(name, expression, Vec::new()))
}

fn widget() -> Entity {
    Entity::new("w-1", TENANT, "product.widget")
        .with_property(Property::literal("qty", Value::number(10.0)))
        .with_property(Property::literal("price", Value::number(5.0)))
}

fn status_of(outcome: &formulary_eval::ComputationOutcome, name: &str) -> ComputationStatus {
    outcome
        .results
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.status)
        .unwrap_or_else(|| panic!("no result for {}", name))
}

fn cached(outcome: &formulary_eval::ComputationOutcome, name: &str) -> Option<Value> {
    outcome.properties[name].current_value().cloned()
}

// ── 1. Own-property arithmetic ──

#[tokio::test]
async fn total_is_product_of_own_properties() {
    let (_store, service) = seeded();
    let entity = widget().with_property(computed("total", "#qty * #price"));

    let outcome = service
        .compute_properties(&entity, ComputeOptions::default())
        .await;

    assert!(outcome.all_succeeded);
    assert_eq!(cached(&outcome, "total"), Some(Value::number(50.0)));
    let total = outcome.properties["total"].as_computed().unwrap();
    assert!(total.cached_at.is_some());
    assert!(total.error.is_none());
    // Input untouched.
    assert_eq!(entity.property("total").unwrap().status(), Some(ComputationStatus::Pending));
}

#[tokio::test]
async fn division_by_zero_is_an_error_status() {
    let (_store, service) = seeded();
    let entity = widget()
        .with_property(Property::literal("zero", Value::number(0.0)))
        .with_property(computed("ratio", "#qty / #zero"));

    let outcome = service
        .compute_properties(&entity, ComputeOptions::default())
        .await;

    assert!(!outcome.all_succeeded);
    assert_eq!(status_of(&outcome, "ratio"), ComputationStatus::Error);
    let error = outcome.results[0].error.as_deref().unwrap();
    assert!(error.contains("division"), "{}", error);
}

#[tokio::test]
async fn parse_failure_is_an_error_status() {
    let (_store, service) = seeded();
    let entity = widget()
        .with_property(computed("bad", "#qty *"))
        .with_property(computed("good", "#qty + 1"));

    let outcome = service
        .compute_properties(&entity, ComputeOptions::default())
        .await;

    assert_eq!(status_of(&outcome, "bad"), ComputationStatus::Error);
    assert_eq!(status_of(&outcome, "good"), ComputationStatus::Valid);
}

// ── 2. Dependency order ──

#[tokio::test]
async fn later_readers_see_earlier_results() {
    let (_store, service) = seeded();
    // `a_double` sorts before `b_base` but depends on it.
    let entity = widget()
        .with_property(computed("a_double", "#b_base * 2"))
        .with_property(computed("b_base", "#qty + 1"));

    let outcome = service
        .compute_properties(&entity, ComputeOptions::default())
        .await;

    assert!(outcome.all_succeeded);
    assert_eq!(cached(&outcome, "a_double"), Some(Value::number(22.0)));
    assert_eq!(cached(&outcome, "b_base"), Some(Value::number(11.0)));
}

// ── 3. Cycles ──

#[tokio::test]
async fn cycle_members_are_circular() {
    let (_store, service) = seeded();
    let entity = widget()
        .with_property(computed("a", "#b + 1"))
        .with_property(computed("b", "#c + 1"))
        .with_property(computed("c", "#a + 1"))
        .with_property(computed("d", "#a * 2"))
        .with_property(computed("e", "#qty"));

    let outcome = service
        .compute_properties(&entity, ComputeOptions::default())
        .await;

    for name in ["a", "b", "c"] {
        assert_eq!(status_of(&outcome, name), ComputationStatus::Circular, "{}", name);
    }
    assert_eq!(status_of(&outcome, "d"), ComputationStatus::Error);
    assert_eq!(status_of(&outcome, "e"), ComputationStatus::Valid);
    assert!(!outcome.all_succeeded);
}

#[tokio::test]
async fn self_reference_is_circular_and_then_skipped() {
    let (_store, service) = seeded();
    let entity = widget().with_property(computed("loop", "#loop + 1"));

    let first = service
        .compute_properties(&entity, ComputeOptions::default())
        .await;
    assert_eq!(status_of(&first, "loop"), ComputationStatus::Circular);

    let again = entity.with_properties(first.properties);
    let second = service
        .compute_properties(&again, ComputeOptions::default())
        .await;
    assert!(second.results.is_empty());
}

// ── 4. only_stale ──

#[tokio::test]
async fn only_stale_leaves_valid_properties_untouched() {
    let (_store, service) = seeded();
    let entity = widget()
        .with_property(computed("total", "#qty * #price"))
        .with_property(computed("double", "#qty * 2"));
    let first = service
        .compute_properties(&entity, ComputeOptions::default())
        .await;
    let stamped = first.properties["total"].as_computed().unwrap().cached_at.clone();

    let mut properties = first.properties.clone();
    assert!(properties.get_mut("double").unwrap().mark_stale());
    let entity = entity.with_properties(properties);

    let second = service
        .compute_properties(&entity, ComputeOptions { only_stale: true })
        .await;

    assert_eq!(second.results.len(), 1);
    assert_eq!(second.results[0].name, "double");
    let total = second.properties["total"].as_computed().unwrap();
    assert_eq!(total.status, ComputationStatus::Valid);
    assert_eq!(total.cached_at, stamped);
}

// ── 5. Traversal and inheritance ──

#[tokio::test]
async fn sums_across_relationships_and_resolves_inherited() {
    let (store, service) = seeded();
    let order = store.fetch_entity(TENANT, "order-1").await.unwrap();
    let order = order.with_properties({
        let mut p = order.properties.clone();
        p.insert("lines_total".into(), computed("lines_total", "SUM(self.lines.amount)"));
        p.insert("taxed".into(), computed("taxed", "#total * (1 + self.customer.rate)"));
        p
    });

    let outcome = service
        .compute_properties(&order, ComputeOptions::default())
        .await;

    assert!(outcome.all_succeeded, "{:?}", outcome.results);
    assert_eq!(cached(&outcome, "lines_total"), Some(Value::number(6.0)));
    let taxed = cached(&outcome, "taxed").and_then(|v| v.as_number()).unwrap();
    assert!((taxed - 60.0).abs() < 1e-9, "{}", taxed);
    assert_eq!(cached(&outcome, "tax_rate"), Some(Value::number(0.2)));
}

#[tokio::test]
async fn formulas_read_inherited_values_of_the_same_pass() {
    let (store, service) = seeded();
    let order = store.fetch_entity(TENANT, "order-1").await.unwrap();
    let order = order.with_properties({
        let mut p = order.properties.clone();
        p.insert(
            "with_tax".into(),
            computed("with_tax", "#qty * #price * (1 + #tax_rate)"),
        );
        p
    });
    // Never resolved before this pass.
    assert_eq!(order.property("tax_rate").unwrap().current_value(), None);

    let outcome = service
        .compute_properties(&order, ComputeOptions::default())
        .await;

    assert!(outcome.all_succeeded, "{:?}", outcome.results);
    let with_tax = cached(&outcome, "with_tax").and_then(|v| v.as_number()).unwrap();
    assert!((with_tax - 60.0).abs() < 1e-9, "{}", with_tax);
}

#[tokio::test]
async fn context_is_fetched_in_batches() {
    let (store, service) = seeded();
    let order = store.fetch_entity(TENANT, "order-1").await.unwrap();
    let order = order.with_properties({
        let mut p = order.properties.clone();
        p.insert("lines_total".into(), computed("lines_total", "SUM(self.lines.amount)"));
        p
    });
    store.reset_counters();

    service
        .compute_properties(&order, ComputeOptions::default())
        .await;

    let counters = store.counters();
    // Inherited source, then the three lines.
    assert_eq!(counters.entity_fetch_calls, 2);
    assert_eq!(counters.relationship_fetches, 1);
    assert_eq!(counters.persists, 0);
}

#[tokio::test]
async fn missing_inherited_source_is_an_error() {
    let (_store, service) = seeded();
    let entity = widget().with_property(Property::inherited("rate", "nobody"));

    let outcome = service
        .compute_properties(&entity, ComputeOptions::default())
        .await;

    assert_eq!(status_of(&outcome, "rate"), ComputationStatus::Error);
    assert!(outcome.results[0].error.as_deref().unwrap().contains("nobody"));
}

// ── 5a. Multi-hop chains ──

/// `p-1 -parent-> fam-1 -category-> cat-1`, with `markup` on the category
/// and `discount` on the family.
async fn catalog() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store
        .insert_entity(
            Entity::new("p-1", TENANT, "product.widget")
                .with_property(Property::literal("cost", Value::number(10.0)))
                .with_property(computed(
                    "price",
                    "#cost * self.parent.category.markup - self.parent.discount",
                )),
        )
        .await;
    store
        .insert_entity(
            Entity::new("fam-1", TENANT, "product.family")
                .with_property(Property::literal("discount", Value::number(1.0))),
        )
        .await;
    store
        .insert_entity(
            Entity::new("cat-1", TENANT, "product.category")
                .with_property(Property::literal("markup", Value::number(1.5))),
        )
        .await;
    store.relate(TENANT, "p-1", "parent", "fam-1").await;
    store.relate(TENANT, "fam-1", "category", "cat-1").await;
    store
}

#[tokio::test]
async fn three_hop_chain_is_fetched_one_hop_at_a_time() {
    let store = catalog().await;
    let service = ComputationService::new(Arc::clone(&store), EngineConfig::default());
    let product = store.get(TENANT, "p-1").await.unwrap();

    let outcome = service
        .compute_properties(&product, ComputeOptions::default())
        .await;

    assert!(outcome.all_succeeded, "{:?}", outcome.results);
    assert_eq!(cached(&outcome, "price"), Some(Value::number(14.0)));
    let counters = store.counters();
    // One entity batch per hop beyond the root: the family, then the category.
    assert_eq!(counters.entity_fetch_calls, 2);
    assert_eq!(counters.entity_ids_requested, 2);
    // p-1 and fam-1; `discount` and `markup` are properties, not relationships.
    assert_eq!(counters.relationship_fetches, 2);
}

#[tokio::test]
async fn max_depth_cuts_chains_short() {
    let store = catalog().await;
    let config = EngineConfig {
        max_depth: 1,
        ..EngineConfig::default()
    };
    let product = store.get(TENANT, "p-1").await.unwrap();
    let expr = Arc::new(parse("self.parent.category.markup").unwrap());

    let ctx = ContextBuilder::new(store.as_ref(), &config)
        .build(&product, std::slice::from_ref(&expr))
        .await
        .unwrap();

    // The first hop's target is loaded, nothing past it.
    assert!(ctx.entities.contains_key("fam-1"));
    assert!(!ctx.entities.contains_key("cat-1"));
    assert!(!ctx.relationships.contains_key("fam-1"));
    let counters = store.counters();
    assert_eq!(counters.entity_fetch_calls, 1);
    assert_eq!(counters.relationship_fetches, 1);
    assert_eq!(formulary_eval::evaluate(&expr, &ctx).unwrap(), None);

    let service = ComputationService::new(Arc::clone(&store), config);
    let outcome = service
        .compute_properties(&product, ComputeOptions::default())
        .await;
    assert_eq!(status_of(&outcome, "price"), ComputationStatus::Valid);
    assert_eq!(cached(&outcome, "price"), None);
}

// ── 6. Storage failures ──

#[tokio::test]
async fn storage_failure_marks_selected_properties() {
    let (store, service) = seeded();
    let entity = widget()
        .with_property(computed("total", "#qty * #price"))
        .with_property(Property::inherited("rate", "cust-1"));
    store.set_unavailable(true);

    let outcome = service
        .compute_properties(&entity, ComputeOptions::default())
        .await;

    assert_eq!(outcome.results.len(), 2);
    for r in &outcome.results {
        assert_eq!(r.status, ComputationStatus::Error);
        assert_eq!(r.error.as_deref(), Some("storage backend error: store unavailable"));
    }
}

// ── 7. recompute_entity ──

#[tokio::test]
async fn recompute_entity_persists_every_result() {
    let (store, service) = seeded();

    let outcome = service
        .recompute_entity(TENANT, "order-1", ComputeOptions::default(), "alice")
        .await
        .unwrap();
    assert!(outcome.all_succeeded);

    let stored = store.get(TENANT, "order-1").await.unwrap();
    assert_eq!(
        stored.property("total").and_then(|p| p.current_value()),
        Some(&Value::number(50.0))
    );
    assert_eq!(
        stored.property("tax_rate").and_then(|p| p.status()),
        Some(ComputationStatus::Valid)
    );
    let history = store.history(TENANT).await;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.actor == "alice"));
}

#[tokio::test]
async fn recompute_unknown_entity_fails() {
    let (_store, service) = seeded();
    let err = service
        .recompute_entity(TENANT, "ghost", ComputeOptions::default(), "alice")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ComputeError::Storage(StorageError::EntityNotFound { .. })
    ));
}

#[tokio::test]
async fn define_computed_extracts_dependencies() {
    let (_store, service) = seeded();
    let p = service
        .define_computed("taxed", "#total * (1 + self.customer.rate)")
        .await
        .unwrap();
    assert_eq!(p.status, ComputationStatus::Pending);
    assert!(p.dependencies.contains(&"total".to_string()));
    assert!(p.dependencies.contains(&"self.customer.rate".to_string()));

    assert!(service.define_computed("bad", "1 +").await.is_err());
}
