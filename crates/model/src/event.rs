//! Change-notification payloads.

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, TenantId};
use crate::status::ComputationStatus;
use crate::value::Value;

/// A dependency of `entity_id.property_name` changed; its cached value is
/// outdated. Delivered by an external change-notification bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyStale {
    pub tenant_id: TenantId,
    pub entity_id: EntityId,
    pub property_name: String,
    pub source_entity_id: EntityId,
    pub source_property_name: String,
}

/// Published after a recomputed property has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecomputed {
    pub tenant_id: TenantId,
    pub entity_id: EntityId,
    pub property_name: String,
    pub status: ComputationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}
