//! In-memory `EntityStore` used by tests and the CLI.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use formulary_model::{Entity, EntityId, Property, RelationshipMap, TenantId};

use crate::error::StorageError;
use crate::record::PropertyStateRecord;
use crate::traits::EntityStore;

// ──────────────────────────────────────────────
// Fixture format
// ──────────────────────────────────────────────

/// JSON fixture: `{"tenants": {"<tenant>": {"entities": [...], "relationships": {...}}}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreFixture {
    #[serde(default)]
    pub tenants: BTreeMap<TenantId, TenantFixture>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantFixture {
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// entity id → relationship type → ordered target ids
    #[serde(default)]
    pub relationships: BTreeMap<EntityId, RelationshipMap>,
}

// ──────────────────────────────────────────────
// Store
// ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct TenantTable {
    entities: HashMap<EntityId, Entity>,
    relationships: HashMap<EntityId, RelationshipMap>,
    history: Vec<PropertyStateRecord>,
}

/// Call counters, for asserting how much storage traffic a pass produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounters {
    /// Calls to `fetch_entities_by_ids`.
    pub entity_fetch_calls: usize,
    /// Ids requested across all `fetch_entities_by_ids` calls.
    pub entity_ids_requested: usize,
    pub relationship_fetches: usize,
    pub persists: usize,
}

/// Tenant-partitioned entity and relationship tables behind a tokio `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tenants: RwLock<HashMap<TenantId, TenantTable>>,
    entity_fetch_calls: AtomicUsize,
    entity_ids_requested: AtomicUsize,
    relationship_fetches: AtomicUsize,
    persists: AtomicUsize,
    unavailable: AtomicBool,
    fetch_delay_ms: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: StoreFixture) -> Self {
        let mut tenants = HashMap::new();
        for (tenant_id, tf) in fixture.tenants {
            let mut table = TenantTable::default();
            for mut entity in tf.entities {
                entity.tenant_id = tenant_id.clone();
                table.entities.insert(entity.id.clone(), entity);
            }
            table.relationships.extend(tf.relationships);
            tenants.insert(tenant_id, table);
        }
        InMemoryStore {
            tenants: RwLock::new(tenants),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, StorageError> {
        let fixture: StoreFixture = serde_json::from_str(json)
            .map_err(|e| StorageError::Backend(format!("invalid store fixture: {}", e)))?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn load_file(path: &Path) -> Result<Self, StorageError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Backend(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Insert or replace an entity under its own `tenant_id`.
    pub async fn insert_entity(&self, entity: Entity) {
        let mut tenants = self.tenants.write().await;
        tenants
            .entry(entity.tenant_id.clone())
            .or_default()
            .entities
            .insert(entity.id.clone(), entity);
    }

    /// Append `to` to `from`'s outgoing relationships of type `rel_type`.
    pub async fn relate(&self, tenant_id: &str, from: &str, rel_type: &str, to: &str) {
        let mut tenants = self.tenants.write().await;
        tenants
            .entry(tenant_id.to_string())
            .or_default()
            .relationships
            .entry(from.to_string())
            .or_default()
            .entry(rel_type.to_string())
            .or_default()
            .push(to.to_string());
    }

    /// Read an entity without touching the counters.
    pub async fn get(&self, tenant_id: &str, entity_id: &str) -> Option<Entity> {
        let tenants = self.tenants.read().await;
        tenants.get(tenant_id)?.entities.get(entity_id).cloned()
    }

    /// Every record persisted for the tenant, oldest first.
    pub async fn history(&self, tenant_id: &str) -> Vec<PropertyStateRecord> {
        let tenants = self.tenants.read().await;
        tenants
            .get(tenant_id)
            .map(|t| t.history.clone())
            .unwrap_or_default()
    }

    /// Make every subsequent call fail with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every entity fetch response by `delay`. The data is read
    /// before the delay, like a slow network round trip.
    pub fn set_fetch_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.fetch_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn counters(&self) -> StoreCounters {
        StoreCounters {
            entity_fetch_calls: self.entity_fetch_calls.load(Ordering::SeqCst),
            entity_ids_requested: self.entity_ids_requested.load(Ordering::SeqCst),
            relationship_fetches: self.relationship_fetches.load(Ordering::SeqCst),
            persists: self.persists.load(Ordering::SeqCst),
        }
    }

    pub fn reset_counters(&self) {
        self.entity_fetch_calls.store(0, Ordering::SeqCst);
        self.entity_ids_requested.store(0, Ordering::SeqCst);
        self.relationship_fetches.store(0, Ordering::SeqCst);
        self.persists.store(0, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn fetch_entities_by_ids(
        &self,
        tenant_id: &str,
        ids: &[String],
    ) -> Result<Vec<Entity>, StorageError> {
        self.check_available()?;
        self.entity_fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.entity_ids_requested
            .fetch_add(ids.len(), Ordering::SeqCst);

        let found: Vec<Entity> = {
            let tenants = self.tenants.read().await;
            match tenants.get(tenant_id) {
                Some(table) => ids
                    .iter()
                    .filter_map(|id| table.entities.get(id).cloned())
                    .collect(),
                None => Vec::new(),
            }
        };
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(found)
    }

    async fn fetch_outgoing_relationships(
        &self,
        tenant_id: &str,
        entity_id: &str,
    ) -> Result<RelationshipMap, StorageError> {
        self.check_available()?;
        self.relationship_fetches.fetch_add(1, Ordering::SeqCst);

        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(tenant_id)
            .and_then(|t| t.relationships.get(entity_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn persist_computed_property(
        &self,
        tenant_id: &str,
        record: PropertyStateRecord,
    ) -> Result<(), StorageError> {
        self.check_available()?;

        let mut tenants = self.tenants.write().await;
        let not_found = || StorageError::EntityNotFound {
            tenant_id: tenant_id.to_string(),
            entity_id: record.entity_id.clone(),
        };
        let table = tenants.get_mut(tenant_id).ok_or_else(not_found)?;
        let entity = table
            .entities
            .get_mut(&record.entity_id)
            .ok_or_else(not_found)?;
        let property = entity
            .properties
            .get_mut(&record.property_name)
            .ok_or_else(|| StorageError::PropertyNotFound {
                entity_id: record.entity_id.clone(),
                property_name: record.property_name.clone(),
            })?;

        match property {
            Property::Computed(c) => {
                c.status = record.status;
                c.cached_value = record.cached_value.clone();
                if let Some(at) = &record.evaluated_at {
                    c.cached_at = Some(at.clone());
                }
                c.error = record.error.clone();
            }
            Property::Inherited(p) => {
                p.status = record.status;
                p.resolved_value = record.cached_value.clone();
                p.error = record.error.clone();
            }
            Property::Literal(_) | Property::Measured(_) => {
                return Err(StorageError::NotComputed {
                    entity_id: record.entity_id.clone(),
                    property_name: record.property_name.clone(),
                });
            }
        }
        entity.version += 1;

        tracing::debug!(
            tenant = tenant_id,
            entity = %record.entity_id,
            property = %record.property_name,
            status = %record.status,
            actor = %record.actor,
            "persisted property state"
        );
        self.persists.fetch_add(1, Ordering::SeqCst);
        table.history.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formulary_model::{ComputationStatus, ComputedProperty, Value};

    fn fixture_json() -> &'static str {
        r##"{
          "tenants": {
            "acme": {
              "entities": [
                {
                  "id": "order-1",
                  "type_path": "order",
                  "properties": {
                    "qty": {"source": "literal", "name": "qty", "value": {"type": "number", "value": 10}},
                    "total": {"source": "computed", "name": "total", "expression": "#qty * 2"}
                  }
                }
              ],
              "relationships": {"order-1": {"customer": ["cust-1"]}}
            }
          }
        }"##
    }

    #[tokio::test]
    async fn fixture_assigns_tenant_and_relationships() {
        let store = InMemoryStore::from_json_str(fixture_json()).unwrap();
        let e = store.fetch_entity("acme", "order-1").await.unwrap();
        assert_eq!(e.tenant_id, "acme");
        let rels = store
            .fetch_outgoing_relationships("acme", "order-1")
            .await
            .unwrap();
        assert_eq!(rels["customer"], vec!["cust-1".to_string()]);
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let store = InMemoryStore::from_json_str(fixture_json()).unwrap();
        let found = store
            .fetch_entities_by_ids("other", &["order-1".to_string()])
            .await
            .unwrap();
        assert!(found.is_empty());
        let err = store.fetch_entity("other", "order-1").await.unwrap_err();
        assert!(matches!(err, StorageError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn persist_updates_computed_and_bumps_version() {
        let store = InMemoryStore::from_json_str(fixture_json()).unwrap();
        let record = PropertyStateRecord {
            entity_id: "order-1".into(),
            property_name: "total".into(),
            status: ComputationStatus::Valid,
            cached_value: Some(Value::number(20.0)),
            evaluated_at: Some("2025-01-01T00:00:00Z".into()),
            error: None,
            actor: "user-7".into(),
        };
        store
            .persist_computed_property("acme", record.clone())
            .await
            .unwrap();

        let e = store.get("acme", "order-1").await.unwrap();
        assert_eq!(e.version, 1);
        let c: &ComputedProperty = e.property("total").and_then(Property::as_computed).unwrap();
        assert_eq!(c.status, ComputationStatus::Valid);
        assert_eq!(c.cached_value, Some(Value::number(20.0)));
        assert_eq!(store.history("acme").await, vec![record]);
    }

    #[tokio::test]
    async fn persist_rejects_literal_targets() {
        let store = InMemoryStore::from_json_str(fixture_json()).unwrap();
        let record = PropertyStateRecord::status_only(
            "order-1",
            "qty",
            ComputationStatus::Stale,
            None,
            "system",
        );
        let err = store
            .persist_computed_property("acme", record)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotComputed { .. }));
        assert_eq!(store.counters().persists, 0);
    }

    #[tokio::test]
    async fn counters_track_traffic() {
        let store = InMemoryStore::from_json_str(fixture_json()).unwrap();
        store
            .fetch_entities_by_ids("acme", &["order-1".into(), "nope".into()])
            .await
            .unwrap();
        store
            .fetch_outgoing_relationships("acme", "order-1")
            .await
            .unwrap();
        let c = store.counters();
        assert_eq!(c.entity_fetch_calls, 1);
        assert_eq!(c.entity_ids_requested, 2);
        assert_eq!(c.relationship_fetches, 1);
        store.reset_counters();
        assert_eq!(store.counters(), StoreCounters::default());
    }

    #[tokio::test]
    async fn unavailable_store_fails_with_backend_error() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let err = store
            .fetch_outgoing_relationships("acme", "x")
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::Backend("store unavailable".into()));
    }

    #[test]
    fn malformed_fixture_is_a_backend_error() {
        let err = InMemoryStore::from_json_str("{\"tenants\": 3}").unwrap_err();
        assert!(err.to_string().starts_with("storage backend error: invalid store fixture"));
    }
}
