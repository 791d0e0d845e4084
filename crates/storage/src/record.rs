use serde::{Deserialize, Serialize};

use formulary_model::{ComputationStatus, EntityId, Value};

/// The outcome of one property evaluation, as written back to the store.
///
/// Applies to computed properties (cached value) and inherited properties
/// (resolved value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyStateRecord {
    pub entity_id: EntityId,
    pub property_name: String,
    pub status: ComputationStatus,
    /// The value to cache. `None` is "no value", not "leave unchanged".
    pub cached_value: Option<Value>,
    /// ISO 8601 / RFC 3339 timestamp string. Set only for successful evaluations.
    pub evaluated_at: Option<String>,
    pub error: Option<String>,
    /// Who triggered the pass: a user id, or the configured system actor.
    pub actor: String,
}

impl PropertyStateRecord {
    /// A record that only moves the status, e.g. a staleness mark.
    pub fn status_only(
        entity_id: impl Into<EntityId>,
        property_name: impl Into<String>,
        status: ComputationStatus,
        cached_value: Option<Value>,
        actor: impl Into<String>,
    ) -> Self {
        PropertyStateRecord {
            entity_id: entity_id.into(),
            property_name: property_name.into(),
            status,
            cached_value,
            evaluated_at: None,
            error: None,
            actor: actor.into(),
        }
    }
}
