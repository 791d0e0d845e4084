//! Recalculation handler: debounce, flush, eager mode and failure isolation.
//!
//! Batched tests run on a paused clock, so sleeping advances virtual time
//! only once every task is idle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use formulary_eval::{
    BatchState, ComputationService, ComputeOptions, EngineConfig, RecalcConfig, RecalcMode,
    RecalculationHandler,
};
use formulary_model::{
    ComputationStatus, ComputedProperty, Entity, Property, PropertyRecomputed, PropertyStale,
    Value,
};
use formulary_storage::conformance::{seed_fixture, TENANT};
use formulary_storage::InMemoryStore;

type Service = ComputationService<Arc<InMemoryStore>>;

// ──────────────────────────────────────────────
// Fixtures
// ──────────────────────────────────────────────

async fn setup(mode: RecalcMode) -> (Arc<InMemoryStore>, RecalculationHandler<Arc<InMemoryStore>>) {
    let store = Arc::new(InMemoryStore::from_fixture(seed_fixture()));
    let service: Arc<Service> = Arc::new(ComputationService::new(
        Arc::clone(&store),
        EngineConfig::default(),
    ));
    // Start from computed values so notifications move them to stale.
    service
        .recompute_entity(TENANT, "order-1", ComputeOptions::default(), "setup")
        .await
        .unwrap();
    let config = RecalcConfig {
        mode,
        ..RecalcConfig::default()
    };
    (store, RecalculationHandler::new(service, config))
}

fn stale(entity_id: &str, property: &str) -> PropertyStale {
    PropertyStale {
        tenant_id: TENANT.to_string(),
        entity_id: entity_id.to_string(),
        property_name: property.to_string(),
        source_entity_id: "line-1".to_string(),
        source_property_name: "amount".to_string(),
    }
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<PropertyRecomputed>) -> Vec<PropertyRecomputed> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

async fn status(store: &InMemoryStore, entity_id: &str, property: &str) -> Option<ComputationStatus> {
    store
        .get(TENANT, entity_id)
        .await?
        .property(property)?
        .status()
}

// ── 1. Debounced batches ──

#[tokio::test(start_paused = true)]
async fn notifications_within_window_coalesce_into_one_pass() {
    let (store, handler) = setup(RecalcMode::Batched).await;
    let mut events = handler.subscribe();

    handler.handle(stale("order-1", "total")).await.unwrap();
    handler.handle(stale("order-1", "tax_rate")).await.unwrap();
    handler.handle(stale("order-1", "total")).await.unwrap();

    assert_eq!(handler.entity_state(TENANT, "order-1").await, BatchState::PendingBatch);
    assert_eq!(status(&store, "order-1", "total").await, Some(ComputationStatus::Stale));
    assert_eq!(status(&store, "order-1", "tax_rate").await, Some(ComputationStatus::Stale));
    assert_eq!(handler.stats().passes, 0);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats = handler.stats();
    assert_eq!(stats.notifications, 3);
    assert_eq!(stats.passes, 1);
    assert_eq!(handler.entity_state(TENANT, "order-1").await, BatchState::Idle);

    let mut names: Vec<String> = drain_events(&mut events)
        .into_iter()
        .map(|e| e.property_name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["tax_rate", "total"]);
    assert_eq!(status(&store, "order-1", "total").await, Some(ComputationStatus::Valid));

    handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn each_notification_resets_the_deadline() {
    let (_store, handler) = setup(RecalcMode::Batched).await;

    handler.handle(stale("order-1", "total")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    handler.handle(stale("order-1", "total")).await.unwrap();

    // Past the first deadline, before the second.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.stats().passes, 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handler.stats().passes, 1);

    handler.shutdown().await;
}

// ── 2. Flush ──

#[tokio::test(start_paused = true)]
async fn flush_processes_the_tenant_immediately() {
    let (store, handler) = setup(RecalcMode::Batched).await;
    handler.handle(stale("order-1", "total")).await.unwrap();

    let report = handler.flush(TENANT, "bob").await;

    assert_eq!(report.entities, 1);
    assert_eq!(report.failed_entities, 0);
    assert_eq!(handler.queued().await, 0);
    let history = store.history(TENANT).await;
    let last = history.last().unwrap();
    assert_eq!(last.actor, "bob");
    assert_eq!(last.property_name, "total");
    assert_eq!(last.cached_value, Some(Value::number(50.0)));

    // Nothing left for the timer.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(handler.stats().passes, 1);
    handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn change_during_a_drain_gets_its_own_pass() {
    let (store, handler) = setup(RecalcMode::Batched).await;
    store.set_fetch_delay(Duration::from_millis(100));
    handler.handle(stale("order-1", "total")).await.unwrap();

    let flushing = tokio::spawn({
        let handler = handler.clone();
        async move { handler.flush_all("bob").await }
    });
    // The drain has loaded qty = 10 and is waiting on the store.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.entity_state(TENANT, "order-1").await, BatchState::Flushing);

    let mut order = store.get(TENANT, "order-1").await.unwrap();
    order
        .properties
        .insert("qty".into(), Property::literal("qty", Value::number(20.0)));
    store.insert_entity(order).await;
    handler.handle(stale("order-1", "total")).await.unwrap();

    assert_eq!(flushing.await.unwrap().entities, 1);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let total = store.get(TENANT, "order-1").await.unwrap();
    let total = total.property("total").unwrap();
    assert_eq!(total.status(), Some(ComputationStatus::Valid));
    assert_eq!(total.current_value(), Some(&Value::number(100.0)));
    assert_eq!(handler.stats().passes, 2);
    handler.shutdown().await;
}

#[tokio::test]
async fn drain_marks_queued_properties_on_the_fresh_load() {
    let store = Arc::new(InMemoryStore::from_fixture(seed_fixture()));
    let service = ComputationService::new(Arc::clone(&store), EngineConfig::default());
    service
        .recompute_entity(TENANT, "order-1", ComputeOptions::default(), "setup")
        .await
        .unwrap();

    // Stored status is still valid; the queued name alone selects it.
    let names: std::collections::BTreeSet<String> = ["total".to_string()].into_iter().collect();
    let outcome = service
        .recompute_marked(TENANT, "order-1", &names, "bob")
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].name, "total");
    assert_eq!(outcome.results[0].status, ComputationStatus::Valid);
}

#[tokio::test(start_paused = true)]
async fn flush_of_other_tenant_leaves_queue_alone() {
    let (_store, handler) = setup(RecalcMode::Batched).await;
    handler.handle(stale("order-1", "total")).await.unwrap();

    let report = handler.flush("tenant-b", "bob").await;

    assert_eq!(report.entities, 0);
    assert_eq!(handler.queued().await, 1);
    handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn one_failing_entity_does_not_block_others() {
    let (store, handler) = setup(RecalcMode::Batched).await;
    store
        .insert_entity(
            Entity::new("broken", TENANT, "order.sales")
                .with_property(Property::literal("zero", Value::number(0.0)))
                .with_property(Property::Computed(ComputedProperty::new(
                    "ratio",
                    "1 / #zero",
                    Vec::new(),
                ))),
        )
        .await;

    handler.handle(stale("order-1", "total")).await.unwrap();
    handler.handle(stale("broken", "ratio")).await.unwrap();
    let report = handler.flush_all("bob").await;

    assert_eq!(report.entities, 2);
    assert_eq!(report.property_errors, 1);
    assert_eq!(report.failed_entities, 0);
    assert_eq!(status(&store, "broken", "ratio").await, Some(ComputationStatus::Error));
    assert_eq!(status(&store, "order-1", "total").await, Some(ComputationStatus::Valid));
    handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unavailable_store_counts_failed_entities() {
    let (store, handler) = setup(RecalcMode::Batched).await;
    handler.handle(stale("order-1", "total")).await.unwrap();
    store.set_unavailable(true);

    let report = handler.flush_all("bob").await;

    assert_eq!(report.entities, 1);
    assert_eq!(report.failed_entities, 1);
    assert_eq!(handler.stats().failures, 1);
    store.set_unavailable(false);
    handler.shutdown().await;
}

// ── 3. Eager mode ──

#[tokio::test]
async fn eager_mode_recomputes_on_every_notification() {
    let (store, handler) = setup(RecalcMode::Eager).await;
    let mut events = handler.subscribe();

    handler.handle(stale("order-1", "total")).await.unwrap();

    assert_eq!(handler.stats().passes, 1);
    assert_eq!(handler.queued().await, 0);
    let recomputed = drain_events(&mut events);
    assert_eq!(recomputed.len(), 1);
    assert_eq!(recomputed[0].property_name, "total");
    assert_eq!(recomputed[0].value, Some(Value::number(50.0)));
    assert_eq!(status(&store, "order-1", "total").await, Some(ComputationStatus::Valid));
}

// ── 4. Skips and bad input ──

#[tokio::test(start_paused = true)]
async fn circular_properties_are_not_queued() {
    let (store, handler) = setup(RecalcMode::Batched).await;
    let mut looped = ComputedProperty::new("loop", "#loop", Vec::new());
    looped.mark_circular("circular reference: loop -> loop").unwrap();
    store
        .insert_entity(
            Entity::new("cyclic", TENANT, "order.sales").with_property(Property::Computed(looped)),
        )
        .await;

    handler.handle(stale("cyclic", "loop")).await.unwrap();

    assert_eq!(handler.stats().skipped_circular, 1);
    assert_eq!(handler.queued().await, 0);
    handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_entity_is_an_error() {
    let (_store, handler) = setup(RecalcMode::Batched).await;
    assert!(handler.handle(stale("ghost", "total")).await.is_err());
    assert_eq!(handler.queued().await, 0);
    handler.shutdown().await;
}

// ── 5. Channel-driven and shutdown ──

#[tokio::test(start_paused = true)]
async fn consume_drives_the_handler_from_a_channel() {
    let (_store, handler) = setup(RecalcMode::Batched).await;
    let (tx, rx) = mpsc::channel(8);
    tx.send(stale("order-1", "total")).await.unwrap();
    tx.send(stale("ghost", "total")).await.unwrap();
    drop(tx);

    handler.consume(rx).await;

    let stats = handler.stats();
    assert_eq!(stats.notifications, 2);
    assert_eq!(stats.failures, 1);
    assert_eq!(handler.queued().await, 1);
    handler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_what_is_queued() {
    let (store, handler) = setup(RecalcMode::Batched).await;
    handler.handle(stale("order-1", "total")).await.unwrap();

    let report = handler.shutdown().await;

    assert_eq!(report.entities, 1);
    assert_eq!(status(&store, "order-1", "total").await, Some(ComputationStatus::Valid));
}
