use async_trait::async_trait;

use formulary_model::{Entity, RelationshipMap};

use crate::error::StorageError;
use crate::record::PropertyStateRecord;

/// The storage collaborator the engine reads entities from and writes
/// computation results to.
///
/// Every call is scoped to one tenant; an implementation must never return
/// data belonging to another tenant.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so one store can be shared
/// across the recalculation worker and concurrently processed entities.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    /// Fetch entity snapshots by id. Ids with no entity are omitted, not
    /// errors; result order is unspecified.
    async fn fetch_entities_by_ids(
        &self,
        tenant_id: &str,
        ids: &[String],
    ) -> Result<Vec<Entity>, StorageError>;

    /// Outgoing relationships of one entity, keyed by relationship type.
    /// Target order within a type is stable. An unknown entity has none.
    async fn fetch_outgoing_relationships(
        &self,
        tenant_id: &str,
        entity_id: &str,
    ) -> Result<RelationshipMap, StorageError>;

    /// Write one property's computation state and bump the entity version.
    ///
    /// Returns `Err(StorageError::EntityNotFound)`, `PropertyNotFound`, or
    /// `NotComputed` when the target cannot carry a computation state.
    async fn persist_computed_property(
        &self,
        tenant_id: &str,
        record: PropertyStateRecord,
    ) -> Result<(), StorageError>;

    /// Fetch one entity, failing with `EntityNotFound` when it is absent.
    async fn fetch_entity(&self, tenant_id: &str, entity_id: &str) -> Result<Entity, StorageError> {
        let ids = [entity_id.to_string()];
        self.fetch_entities_by_ids(tenant_id, &ids)
            .await?
            .into_iter()
            .find(|e| e.id == entity_id)
            .ok_or_else(|| StorageError::EntityNotFound {
                tenant_id: tenant_id.to_string(),
                entity_id: entity_id.to_string(),
            })
    }
}

#[async_trait]
impl<S: EntityStore + ?Sized> EntityStore for std::sync::Arc<S> {
    async fn fetch_entities_by_ids(
        &self,
        tenant_id: &str,
        ids: &[String],
    ) -> Result<Vec<Entity>, StorageError> {
        (**self).fetch_entities_by_ids(tenant_id, ids).await
    }

    async fn fetch_outgoing_relationships(
        &self,
        tenant_id: &str,
        entity_id: &str,
    ) -> Result<RelationshipMap, StorageError> {
        (**self).fetch_outgoing_relationships(tenant_id, entity_id).await
    }

    async fn persist_computed_property(
        &self,
        tenant_id: &str,
        record: PropertyStateRecord,
    ) -> Result<(), StorageError> {
        (**self).persist_computed_property(tenant_id, record).await
    }
}
