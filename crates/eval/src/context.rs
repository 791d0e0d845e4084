//! Evaluation context: everything one evaluation pass may read.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use formulary_core::Expression;
use formulary_model::{Entity, EntityId, Property, RelationshipMap};

use crate::config::EngineConfig;

/// Pre-fetched data for evaluating the formulas of one entity.
///
/// Built fresh per pass and read-only during evaluation; results of the pass
/// are threaded through the evaluator, not written back here.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// The entity whose properties are being evaluated.
    pub entity: Entity,
    /// Properties of `entity` as seen by `#name` reads.
    pub properties: BTreeMap<String, Property>,
    /// Every other entity the formulas can reach.
    pub entities: HashMap<EntityId, Entity>,
    /// Outgoing relationships of `entity` and of traversed entities.
    pub relationships: HashMap<EntityId, RelationshipMap>,
    /// Computed properties of `entity` that are being recomputed in this
    /// pass. A read of one of these evaluates it on demand.
    pub pending: HashMap<String, Arc<Expression>>,
    pub strict: bool,
    pub recursion_limit: usize,
}

impl EvaluationContext {
    pub fn new(entity: Entity) -> Self {
        let defaults = EngineConfig::default();
        EvaluationContext {
            properties: entity.properties.clone(),
            entity,
            entities: HashMap::new(),
            relationships: HashMap::new(),
            pending: HashMap::new(),
            strict: defaults.strict,
            recursion_limit: defaults.recursion_limit,
        }
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.strict = config.strict;
        self.recursion_limit = config.recursion_limit;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.insert(entity.id.clone(), entity);
        self
    }

    pub fn with_relationship(mut self, from: &str, rel_type: &str, targets: &[&str]) -> Self {
        self.relationships
            .entry(from.to_string())
            .or_default()
            .insert(
                rel_type.to_string(),
                targets.iter().map(|t| t.to_string()).collect(),
            );
        self
    }

    pub fn with_pending(mut self, name: impl Into<String>, expression: Expression) -> Self {
        self.pending.insert(name.into(), Arc::new(expression));
        self
    }

    /// Any entity the context knows, including the current one.
    pub fn entity_by_id(&self, id: &str) -> Option<&Entity> {
        if id == self.entity.id {
            Some(&self.entity)
        } else {
            self.entities.get(id)
        }
    }

    pub fn relationship(&self, entity_id: &str, rel_type: &str) -> Option<&Vec<EntityId>> {
        self.relationships.get(entity_id)?.get(rel_type)
    }
}
