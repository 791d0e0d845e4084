//! Recalculation handler: turns staleness notifications into recomputation
//! passes.
//!
//! Each entity moves through `idle → pending-batch → flushing → idle`. In
//! batched mode notifications are debounced per entity: every notification
//! resets the entity's deadline, and a single background worker drains
//! entities whose deadline has passed. In eager mode every notification is a
//! pass of its own.
//!
//! Passes over the same entity never overlap: each one holds that entity's
//! pass lock from load to persist, and a drain re-marks the properties it was
//! queued for on the copy it loads.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};

use formulary_model::{ComputationStatus, EntityId, PropertyRecomputed, PropertyStale, TenantId};
use formulary_storage::{EntityStore, PropertyStateRecord};

use crate::compute::{ComputationOutcome, ComputationService, ComputeOptions};
use crate::config::{RecalcConfig, RecalcMode};
use crate::error::ComputeError;

type EntityKey = (TenantId, EntityId);

const EVENT_CAPACITY: usize = 1024;

/// Where an entity is in the recalculation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    PendingBatch,
    Flushing,
}

/// Summary of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Entities taken off the queue.
    pub entities: usize,
    /// Property results written back.
    pub recomputed: usize,
    /// Results that did not end `valid`.
    pub property_errors: usize,
    /// Entities whose pass failed as a whole (load or persist).
    pub failed_entities: usize,
}

impl FlushReport {
    fn record(&mut self, result: &Result<ComputationOutcome, ComputeError>) {
        self.entities += 1;
        match result {
            Ok(outcome) => {
                self.recomputed += outcome.results.len();
                self.property_errors += outcome
                    .results
                    .iter()
                    .filter(|r| r.error.is_some())
                    .count();
            }
            Err(_) => self.failed_entities += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecalcStats {
    pub notifications: u64,
    pub skipped_circular: u64,
    pub passes: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    notifications: AtomicU64,
    skipped_circular: AtomicU64,
    passes: AtomicU64,
    failures: AtomicU64,
}

struct QueueEntry {
    properties: BTreeSet<String>,
    deadline: Instant,
}

struct Inner<S> {
    service: Arc<ComputationService<S>>,
    config: RecalcConfig,
    queue: Mutex<HashMap<EntityKey, QueueEntry>>,
    /// Drains running per entity.
    in_flight: Mutex<HashMap<EntityKey, usize>>,
    pass_locks: Mutex<HashMap<EntityKey, Arc<Mutex<()>>>>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    events: broadcast::Sender<PropertyRecomputed>,
    counters: Counters,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; clones share one queue and one worker.
pub struct RecalculationHandler<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for RecalculationHandler<S> {
    fn clone(&self) -> Self {
        RecalculationHandler {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: EntityStore> RecalculationHandler<S> {
    /// Create a handler. In batched mode this spawns the background worker
    /// and must be called inside a tokio runtime.
    pub fn new(service: Arc<ComputationService<S>>, config: RecalcConfig) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(Inner {
            service,
            config,
            queue: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            pass_locks: Mutex::new(HashMap::new()),
            wake: Notify::new(),
            shutdown,
            events,
            counters: Counters::default(),
            worker: Mutex::new(None),
        });

        if inner.config.mode == RecalcMode::Batched {
            let worker = tokio::spawn(run_worker(Arc::clone(&inner), shutdown_rx));
            // Fresh mutex, never contended here.
            if let Ok(mut slot) = inner.worker.try_lock() {
                *slot = Some(worker);
            }
        }
        RecalculationHandler { inner }
    }

    pub fn mode(&self) -> RecalcMode {
        self.inner.config.mode
    }

    /// React to one staleness notification.
    #[instrument(skip_all, fields(tenant = %event.tenant_id, entity = %event.entity_id, property = %event.property_name))]
    pub async fn handle(&self, event: PropertyStale) -> Result<(), ComputeError> {
        self.inner
            .counters
            .notifications
            .fetch_add(1, Ordering::Relaxed);
        let key = (event.tenant_id.clone(), event.entity_id.clone());
        let lock = self.inner.pass_lock(&key).await;
        let result = {
            let _pass = lock.lock().await;
            self.handle_locked(event).await
        };
        self.inner.release_pass_lock(&key, lock).await;
        result
    }

    async fn handle_locked(&self, event: PropertyStale) -> Result<(), ComputeError> {
        let inner = &self.inner;
        let mut entity = inner
            .service
            .store()
            .fetch_entity(&event.tenant_id, &event.entity_id)
            .await?;
        let Some(property) = entity.properties.get_mut(&event.property_name) else {
            warn!("notification for unknown property ignored");
            return Ok(());
        };
        if property.status() == Some(ComputationStatus::Circular) {
            inner.counters.skipped_circular.fetch_add(1, Ordering::Relaxed);
            debug!("property is circular; notification ignored");
            return Ok(());
        }
        let moved = property.mark_stale();

        match inner.config.mode {
            RecalcMode::Eager => {
                let outcome = inner
                    .service
                    .compute_properties(&entity, ComputeOptions { only_stale: true })
                    .await;
                let result = inner
                    .service
                    .persist_outcome(
                        &event.tenant_id,
                        &event.entity_id,
                        &outcome,
                        &inner.config.system_actor,
                    )
                    .await
                    .map(|()| outcome);
                inner.finish_pass(&event.tenant_id, &event.entity_id, &result);
                result.map(|_| ())
            }
            RecalcMode::Batched => {
                if moved {
                    let record = PropertyStateRecord::status_only(
                        event.entity_id.clone(),
                        event.property_name.clone(),
                        ComputationStatus::Stale,
                        property.current_value().cloned(),
                        inner.config.system_actor.clone(),
                    );
                    inner
                        .service
                        .store()
                        .persist_computed_property(&event.tenant_id, record)
                        .await
                        .map_err(|source| ComputeError::Persist {
                            entity_id: event.entity_id.clone(),
                            property_name: event.property_name.clone(),
                            source,
                        })?;
                }
                inner.enqueue(event).await;
                Ok(())
            }
        }
    }

    /// Drain every queued entity of `tenant` now, ignoring deadlines.
    pub async fn flush(&self, tenant_id: &str, actor: &str) -> FlushReport {
        let batch = self.inner.take(|key, _| key.0 == tenant_id).await;
        Arc::clone(&self.inner).drain(batch, actor).await
    }

    /// Drain every queued entity of every tenant now.
    pub async fn flush_all(&self, actor: &str) -> FlushReport {
        let batch = self.inner.take(|_, _| true).await;
        Arc::clone(&self.inner).drain(batch, actor).await
    }

    /// Handle notifications from `rx` until every sender is dropped.
    pub async fn consume(&self, mut rx: mpsc::Receiver<PropertyStale>) {
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.handle(event).await {
                self.inner.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "notification failed");
            }
        }
        debug!("notification channel closed");
    }

    /// Events for every persisted recomputation, in completion order.
    pub fn subscribe(&self) -> broadcast::Receiver<PropertyRecomputed> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> RecalcStats {
        let c = &self.inner.counters;
        RecalcStats {
            notifications: c.notifications.load(Ordering::Relaxed),
            skipped_circular: c.skipped_circular.load(Ordering::Relaxed),
            passes: c.passes.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }

    pub async fn entity_state(&self, tenant_id: &str, entity_id: &str) -> BatchState {
        let key = (tenant_id.to_string(), entity_id.to_string());
        if self.inner.in_flight.lock().await.contains_key(&key) {
            BatchState::Flushing
        } else if self.inner.queue.lock().await.contains_key(&key) {
            BatchState::PendingBatch
        } else {
            BatchState::Idle
        }
    }

    /// Number of entities waiting for their deadline.
    pub async fn queued(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Stop the worker, then drain whatever is still queued.
    pub async fn shutdown(&self) -> FlushReport {
        self.inner.shutdown.send_replace(true);
        let worker = self.inner.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "recalculation worker ended abnormally");
            }
        }
        let actor = self.inner.config.system_actor.clone();
        let report = self.flush_all(&actor).await;
        info!(entities = report.entities, "recalculation handler stopped");
        report
    }
}

impl<S: EntityStore> Inner<S> {
    async fn enqueue(&self, event: PropertyStale) {
        let deadline = Instant::now() + self.config.batch_delay();
        let mut queue = self.queue.lock().await;
        let entry = queue
            .entry((event.tenant_id, event.entity_id))
            .or_insert_with(|| QueueEntry {
                properties: BTreeSet::new(),
                deadline,
            });
        entry.properties.insert(event.property_name);
        entry.deadline = deadline;
        debug!(queued = queue.len(), "notification queued");
        drop(queue);
        self.wake.notify_one();
    }

    async fn earliest_deadline(&self) -> Option<Instant> {
        self.queue.lock().await.values().map(|e| e.deadline).min()
    }

    /// Move matching entries from the queue to the in-flight set.
    async fn take<F>(&self, mut matches: F) -> Vec<(EntityKey, BTreeSet<String>)>
    where
        F: FnMut(&EntityKey, &QueueEntry) -> bool,
    {
        let mut queue = self.queue.lock().await;
        let keys: Vec<EntityKey> = queue
            .iter()
            .filter(|(k, e)| matches(k, e))
            .map(|(k, _)| k.clone())
            .collect();
        let mut in_flight = self.in_flight.lock().await;
        keys.into_iter()
            .filter_map(|k| {
                let entry = queue.remove(&k)?;
                *in_flight.entry(k.clone()).or_default() += 1;
                Some((k, entry.properties))
            })
            .collect()
    }

    async fn pass_lock(&self, key: &EntityKey) -> Arc<Mutex<()>> {
        let mut locks = self.pass_locks.lock().await;
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Drop the entry once no other pass holds or awaits it.
    async fn release_pass_lock(&self, key: &EntityKey, lock: Arc<Mutex<()>>) {
        let mut locks = self.pass_locks.lock().await;
        drop(lock);
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    async fn leave_flight(&self, key: &EntityKey) {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(count) = in_flight.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(key);
            }
        }
    }

    /// Recompute every entity of `batch` concurrently.
    async fn drain(
        self: Arc<Self>,
        batch: Vec<(EntityKey, BTreeSet<String>)>,
        actor: &str,
    ) -> FlushReport {
        let mut report = FlushReport::default();
        if batch.is_empty() {
            return report;
        }

        let mut tasks = JoinSet::new();
        for (key, properties) in batch {
            let inner = Arc::clone(&self);
            let actor = actor.to_string();
            tasks.spawn(async move {
                debug!(
                    tenant = %key.0,
                    entity = %key.1,
                    properties = ?properties,
                    "recomputing entity"
                );
                let lock = inner.pass_lock(&key).await;
                let result = {
                    let _pass = lock.lock().await;
                    inner
                        .service
                        .recompute_marked(&key.0, &key.1, &properties, &actor)
                        .await
                };
                inner.release_pass_lock(&key, lock).await;
                inner.finish_pass(&key.0, &key.1, &result);
                inner.leave_flight(&key).await;
                result
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => report.record(&result),
                Err(e) => {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    report.entities += 1;
                    report.failed_entities += 1;
                    warn!(error = %e, "recomputation task failed");
                }
            }
        }
        info!(
            entities = report.entities,
            recomputed = report.recomputed,
            failed = report.failed_entities,
            "batch drained"
        );
        report
    }

    /// Count the pass and publish its results.
    fn finish_pass(
        &self,
        tenant_id: &str,
        entity_id: &str,
        result: &Result<ComputationOutcome, ComputeError>,
    ) {
        self.counters.passes.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(outcome) => {
                for r in &outcome.results {
                    // No subscribers is not an error.
                    let _ = self.events.send(PropertyRecomputed {
                        tenant_id: tenant_id.to_string(),
                        entity_id: entity_id.to_string(),
                        property_name: r.name.clone(),
                        status: r.status,
                        value: r.value.clone(),
                    });
                }
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(tenant = tenant_id, entity = entity_id, error = %e, "recomputation failed");
            }
        }
    }
}

async fn run_worker<S: EntityStore>(inner: Arc<Inner<S>>, mut shutdown: watch::Receiver<bool>) {
    debug!("recalculation worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let deadline = inner.earliest_deadline().await;
        let timer = async {
            match deadline {
                Some(d) => sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = inner.wake.notified() => {}
            _ = timer => {
                let now = Instant::now();
                let due = inner.take(|_, e| e.deadline <= now).await;
                let actor = inner.config.system_actor.clone();
                let report = Arc::clone(&inner).drain(due, &actor).await;
                debug!(entities = report.entities, "timer drain finished");
            }
        }
    }
    debug!("recalculation worker stopped");
}
