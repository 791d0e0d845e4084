//! Builds an [`EvaluationContext`] by pre-fetching exactly what a set of
//! expressions can read.
//!
//! Entity-id literals and inherited sources are fetched in one batch. Dotted
//! chains are then expanded breadth-first, one hop at a time across all
//! chains: fetch the frontier's relationships, fetch the reached entities,
//! repeat. Every fetch is de-duplicated against what is already cached.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, instrument};

use formulary_core::{collect_referenced_entity_ids, collect_traversals, Expression, TraversalRoot};
use formulary_model::{Entity, EntityId, Property, Value};
use formulary_storage::{EntityStore, StorageError};

use crate::config::EngineConfig;
use crate::context::EvaluationContext;

pub struct ContextBuilder<'s, S: ?Sized> {
    store: &'s S,
    config: &'s EngineConfig,
}

impl<'s, S: EntityStore + ?Sized> ContextBuilder<'s, S> {
    pub fn new(store: &'s S, config: &'s EngineConfig) -> Self {
        ContextBuilder { store, config }
    }

    /// Build one context serving every expression of `entity`.
    #[instrument(skip_all, fields(tenant = %entity.tenant_id, entity = %entity.id))]
    pub async fn build(
        &self,
        entity: &Entity,
        expressions: &[Arc<Expression>],
    ) -> Result<EvaluationContext, StorageError> {
        let tenant = entity.tenant_id.as_str();
        let mut ctx = EvaluationContext::new(entity.clone()).with_config(self.config);

        // Direct references and inherited sources.
        let mut direct: BTreeSet<EntityId> = expressions
            .iter()
            .flat_map(|e| collect_referenced_entity_ids(e))
            .collect();
        direct.extend(entity.properties.values().filter_map(|p| match p {
            Property::Inherited(i) => Some(i.from_entity.clone()),
            _ => None,
        }));
        self.fetch_missing(tenant, &mut ctx, direct).await?;

        // Chains, expanded hop by hop. Every chain kept in `chains` has a
        // step at index `hop`.
        let mut chains: Vec<(Vec<String>, Vec<EntityId>)> = Vec::new();
        for expr in expressions {
            for t in collect_traversals(expr) {
                let roots = match &t.root {
                    TraversalRoot::SelfEntity => vec![entity.id.clone()],
                    TraversalRoot::Entity(id) => vec![id.clone()],
                    TraversalRoot::SelfProperty(name) => entity
                        .property(name)
                        .and_then(Property::current_value)
                        .map(reference_ids)
                        .unwrap_or_default(),
                };
                if !roots.is_empty() && !t.hops.is_empty() {
                    chains.push((t.hops, roots));
                }
            }
        }

        let mut rels_fetched: HashSet<EntityId> = HashSet::new();
        let mut tail: BTreeSet<EntityId> = BTreeSet::new();
        let mut hop = 0;
        while hop < self.config.max_depth && !chains.is_empty() {
            // The frontier must be loaded to resolve property hops.
            let frontier: BTreeSet<EntityId> = chains
                .iter()
                .flat_map(|(_, nodes)| nodes.iter().cloned())
                .collect();
            self.fetch_missing(tenant, &mut ctx, frontier).await?;

            // Relationships are only needed where the step is not a property.
            let need_rels: BTreeSet<EntityId> = chains
                .iter()
                .flat_map(|(hops, nodes)| {
                    let step = &hops[hop];
                    nodes
                        .iter()
                        .filter(|n| !has_property(&ctx, n, step))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .collect();
            for id in need_rels {
                if rels_fetched.insert(id.clone()) {
                    let rels = self.store.fetch_outgoing_relationships(tenant, &id).await?;
                    if !rels.is_empty() {
                        ctx.relationships.insert(id, rels);
                    }
                }
            }

            let mut next = Vec::new();
            for (hops, nodes) in chains {
                let step = &hops[hop];
                let mut reached: Vec<EntityId> = nodes
                    .iter()
                    .flat_map(|node| step_targets(&ctx, node, step))
                    .collect();
                reached.sort();
                reached.dedup();
                if hops.len() > hop + 1 {
                    if !reached.is_empty() {
                        next.push((hops, reached));
                    }
                } else {
                    tail.extend(reached);
                }
            }
            chains = next;
            hop += 1;
        }

        // Entities reached by a final hop, or where max_depth cut a chain.
        tail.extend(chains.into_iter().flat_map(|(_, nodes)| nodes));
        self.fetch_missing(tenant, &mut ctx, tail).await?;

        debug!(
            entities = ctx.entities.len(),
            relationships = ctx.relationships.len(),
            hops = hop,
            "evaluation context built"
        );
        Ok(ctx)
    }

    async fn fetch_missing(
        &self,
        tenant: &str,
        ctx: &mut EvaluationContext,
        ids: BTreeSet<EntityId>,
    ) -> Result<(), StorageError> {
        let missing: Vec<EntityId> = ids
            .into_iter()
            .filter(|id| ctx.entity_by_id(id).is_none())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        for e in self.store.fetch_entities_by_ids(tenant, &missing).await? {
            ctx.entities.insert(e.id.clone(), e);
        }
        Ok(())
    }
}

fn has_property(ctx: &EvaluationContext, node: &str, name: &str) -> bool {
    ctx.entity_by_id(node)
        .is_some_and(|e| e.properties.contains_key(name))
}

/// Entities reachable from `node` through member `step`: a reference-valued
/// property first, otherwise a relationship of that name.
fn step_targets(ctx: &EvaluationContext, node: &str, step: &str) -> Vec<EntityId> {
    if let Some(value) = ctx
        .entity_by_id(node)
        .and_then(|e| e.property(step))
        .and_then(Property::current_value)
    {
        return reference_ids(value);
    }
    ctx.relationship(node, step).cloned().unwrap_or_default()
}

fn reference_ids(value: &Value) -> Vec<EntityId> {
    match value {
        Value::Reference { entity_id, .. } => vec![entity_id.clone()],
        Value::List { items, .. } => items
            .iter()
            .filter_map(Value::as_reference)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
