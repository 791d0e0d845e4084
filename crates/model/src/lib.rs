//! formulary-model: shared data types.
//!
//! Runtime [`Value`]s, [`Entity`] snapshots with their [`Property`] sum type,
//! the [`ComputationStatus`] state machine, and the change-notification
//! events exchanged with the outside world. Pure data: no evaluation and no
//! I/O lives here.

pub mod entity;
pub mod event;
pub mod status;
pub mod value;

pub use entity::{
    ComputedProperty, Entity, EntityId, InheritedProperty, LiteralProperty, MeasuredProperty,
    Property, RelationshipMap, TenantId,
};
pub use event::{PropertyRecomputed, PropertyStale};
pub use status::{ComputationStatus, InvalidTransition};
pub use value::{Value, ValueType};
