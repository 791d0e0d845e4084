//! Entity snapshots and the property sum type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::status::{ComputationStatus, InvalidTransition};
use crate::value::Value;

pub type EntityId = String;
pub type TenantId = String;

/// Outgoing relationships of one entity: relationship type → ordered targets.
pub type RelationshipMap = BTreeMap<String, Vec<EntityId>>;

// ──────────────────────────────────────────────
// Properties
// ──────────────────────────────────────────────

/// An authoritative stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteralProperty {
    pub name: String,
    pub value: Value,
}

/// A value taken from another entity, optionally overridden locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InheritedProperty {
    pub name: String,
    pub from_entity: EntityId,
    /// Property on `from_entity`; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_property: Option<String>,
    #[serde(
        rename = "override",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub override_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_value: Option<Value>,
    #[serde(default)]
    pub status: ComputationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InheritedProperty {
    pub fn source_property(&self) -> &str {
        self.from_property.as_deref().unwrap_or(&self.name)
    }

    pub fn mark_resolved(&mut self, value: Option<Value>) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(ComputationStatus::Valid)?;
        self.resolved_value = value;
        self.error = None;
        Ok(())
    }

    /// The last resolved value is kept.
    pub fn mark_error(&mut self, message: impl Into<String>) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(ComputationStatus::Error)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// The source changed; the resolved value is outdated.
    pub fn mark_stale(&mut self) -> bool {
        let moved = matches!(
            self.status,
            ComputationStatus::Valid | ComputationStatus::Error
        );
        if moved {
            self.status = ComputationStatus::Stale;
        }
        moved
    }
}

/// A formula-backed value with its cache and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedProperty {
    pub name: String,
    pub expression: String,
    /// Dotted paths read by `expression`, extracted at definition time.
    /// A hint for staleness checks; evaluation does not rely on it.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<String>,
    #[serde(default)]
    pub status: ComputationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComputedProperty {
    pub fn new(
        name: impl Into<String>,
        expression: impl Into<String>,
        dependencies: Vec<String>,
    ) -> Self {
        ComputedProperty {
            name: name.into(),
            expression: expression.into(),
            dependencies,
            cached_value: None,
            cached_at: None,
            status: ComputationStatus::Pending,
            error: None,
        }
    }

    /// Record a successful evaluation.
    pub fn mark_valid(
        &mut self,
        value: Option<Value>,
        at: impl Into<String>,
    ) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(ComputationStatus::Valid)?;
        self.cached_value = value;
        self.cached_at = Some(at.into());
        self.error = None;
        Ok(())
    }

    /// Record a failed evaluation. The last cached value is kept.
    pub fn mark_error(&mut self, message: impl Into<String>) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(ComputationStatus::Error)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// Record a detected cycle. The last cached value is kept.
    pub fn mark_circular(&mut self, message: impl Into<String>) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(ComputationStatus::Circular)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// Flag the cached value as outdated. Returns `false` when the status
    /// does not move: never-computed, already stale, or circular.
    pub fn mark_stale(&mut self) -> bool {
        match self.status {
            ComputationStatus::Valid | ComputationStatus::Error => {
                self.status = ComputationStatus::Stale;
                true
            }
            ComputationStatus::Pending | ComputationStatus::Stale | ComputationStatus::Circular => {
                false
            }
        }
    }
}

/// A measured value with metrological metadata. Never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasuredProperty {
    pub name: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_record: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured_at: Option<String>,
}

/// An entity attribute, discriminated by where its value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Property {
    Literal(LiteralProperty),
    Inherited(InheritedProperty),
    Computed(ComputedProperty),
    Measured(MeasuredProperty),
}

impl Property {
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Property::Literal(LiteralProperty {
            name: name.into(),
            value,
        })
    }

    pub fn measured(name: impl Into<String>, value: Value, uncertainty: Option<f64>) -> Self {
        Property::Measured(MeasuredProperty {
            name: name.into(),
            value,
            uncertainty,
            measurement_record: None,
            measured_at: None,
        })
    }

    pub fn inherited(name: impl Into<String>, from_entity: impl Into<EntityId>) -> Self {
        Property::Inherited(InheritedProperty {
            name: name.into(),
            from_entity: from_entity.into(),
            from_property: None,
            override_value: None,
            resolved_value: None,
            status: ComputationStatus::Pending,
            error: None,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Property::Literal(p) => &p.name,
            Property::Inherited(p) => &p.name,
            Property::Computed(p) => &p.name,
            Property::Measured(p) => &p.name,
        }
    }

    /// The value a reader sees right now, whatever the status.
    pub fn current_value(&self) -> Option<&Value> {
        match self {
            Property::Literal(p) => Some(&p.value),
            Property::Inherited(p) => p.override_value.as_ref().or(p.resolved_value.as_ref()),
            Property::Computed(p) => p.cached_value.as_ref(),
            Property::Measured(p) => Some(&p.value),
        }
    }

    pub fn status(&self) -> Option<ComputationStatus> {
        match self {
            Property::Inherited(p) => Some(p.status),
            Property::Computed(p) => Some(p.status),
            Property::Literal(_) | Property::Measured(_) => None,
        }
    }

    /// Flag a computed or inherited value as outdated. `false` for source
    /// properties and for statuses that do not move.
    pub fn mark_stale(&mut self) -> bool {
        match self {
            Property::Computed(p) => p.mark_stale(),
            Property::Inherited(p) => p.mark_stale(),
            Property::Literal(_) | Property::Measured(_) => false,
        }
    }

    pub fn as_computed(&self) -> Option<&ComputedProperty> {
        match self {
            Property::Computed(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_computed_mut(&mut self) -> Option<&mut ComputedProperty> {
        match self {
            Property::Computed(p) => Some(p),
            _ => None,
        }
    }
}

impl From<ComputedProperty> for Property {
    fn from(p: ComputedProperty) -> Self {
        Property::Computed(p)
    }
}

// ──────────────────────────────────────────────
// Entities
// ──────────────────────────────────────────────

/// An immutable snapshot of one stored record at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(default)]
    pub tenant_id: TenantId,
    /// Hierarchical, dot-separated type, e.g. `product.hardware.fastener`.
    pub type_path: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Property>,
    #[serde(default)]
    pub version: u64,
}

impl Entity {
    pub fn new(
        id: impl Into<EntityId>,
        tenant_id: impl Into<TenantId>,
        type_path: impl Into<String>,
    ) -> Self {
        Entity {
            id: id.into(),
            tenant_id: tenant_id.into(),
            type_path: type_path.into(),
            properties: BTreeMap::new(),
            version: 0,
        }
    }

    /// Builder-style insert, keyed by the property's name.
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties
            .insert(property.name().to_string(), property);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn computed_properties(&self) -> impl Iterator<Item = &ComputedProperty> {
        self.properties.values().filter_map(Property::as_computed)
    }

    /// A new snapshot sharing identity and version with different properties.
    pub fn with_properties(&self, properties: BTreeMap<String, Property>) -> Entity {
        Entity {
            id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
            type_path: self.type_path.clone(),
            properties,
            version: self.version,
        }
    }
}
