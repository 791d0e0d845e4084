/// All errors that can be returned by an `EntityStore` implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    /// No entity with this id exists for the tenant.
    #[error("entity not found: {tenant_id}/{entity_id}")]
    EntityNotFound {
        tenant_id: String,
        entity_id: String,
    },

    /// The entity exists but has no property with this name.
    #[error("property not found: {entity_id}.{property_name}")]
    PropertyNotFound {
        entity_id: String,
        property_name: String,
    },

    /// A computation state was written to a property that carries none
    /// (literal or measured).
    #[error("property {entity_id}.{property_name} is not computed")]
    NotComputed {
        entity_id: String,
        property_name: String,
    },

    /// A backend-specific storage error (connection, serialization, fixture loading).
    #[error("storage backend error: {0}")]
    Backend(String),
}
