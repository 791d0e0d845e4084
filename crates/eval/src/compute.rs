//! Computation service: recompute the derived properties of one entity.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use formulary_core::{dependency_paths, parse, Expression, ParseError};
use formulary_model::{
    ComputationStatus, ComputedProperty, Entity, InheritedProperty, Property, Value,
};
use formulary_storage::{EntityStore, PropertyStateRecord};

use crate::config::EngineConfig;
use crate::context_builder::ContextBuilder;
use crate::error::{ComputeError, EvaluationError};
use crate::evaluator::Evaluator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputeOptions {
    /// Recompute only stale and never-computed properties.
    pub only_stale: bool,
}

/// What happened to one selected property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyResult {
    pub name: String,
    pub status: ComputationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set for successful evaluations only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputationOutcome {
    /// The entity's full properties mapping after the pass.
    pub properties: BTreeMap<String, Property>,
    /// One entry per selected property, in name order.
    pub results: Vec<PropertyResult>,
    pub all_succeeded: bool,
}

type ParseCache = HashMap<String, Result<Arc<Expression>, ParseError>>;

pub struct ComputationService<S> {
    store: S,
    config: EngineConfig,
    parse_cache: Mutex<ParseCache>,
}

impl<S: EntityStore> ComputationService<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        ComputationService {
            store,
            config,
            parse_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a fresh `pending` computed property. Its `dependencies` hint
    /// comes from the expression's structure.
    pub async fn define_computed(
        &self,
        name: &str,
        expression: &str,
    ) -> Result<ComputedProperty, ParseError> {
        let ast = self.parse_cached(expression).await?;
        Ok(ComputedProperty::new(
            name,
            expression,
            dependency_paths(&ast),
        ))
    }

    async fn parse_cached(&self, source: &str) -> Result<Arc<Expression>, ParseError> {
        let mut cache = self.parse_cache.lock().await;
        cache
            .entry(source.to_string())
            .or_insert_with(|| parse(source).map(Arc::new))
            .clone()
    }

    /// Recompute the selected computed and inherited properties of `entity`.
    ///
    /// Never fails as a whole: evaluation and storage failures become
    /// property statuses in the outcome. The input entity is not modified.
    #[instrument(skip_all, fields(tenant = %entity.tenant_id, entity = %entity.id, only_stale = options.only_stale))]
    pub async fn compute_properties(
        &self,
        entity: &Entity,
        options: ComputeOptions,
    ) -> ComputationOutcome {
        let selected = |status: ComputationStatus| {
            status != ComputationStatus::Circular
                && (!options.only_stale || status.needs_recompute())
        };
        let computed: Vec<&ComputedProperty> = entity
            .computed_properties()
            .filter(|c| selected(c.status))
            .collect();
        let inherited: Vec<&InheritedProperty> = entity
            .properties
            .values()
            .filter_map(|p| match p {
                Property::Inherited(i) if selected(i.status) => Some(i),
                _ => None,
            })
            .collect();

        let mut properties = entity.properties.clone();
        let mut results = Vec::new();
        if computed.is_empty() && inherited.is_empty() {
            return finish(properties, results);
        }

        let mut parsed: BTreeMap<&str, Result<Arc<Expression>, ParseError>> = BTreeMap::new();
        for c in &computed {
            parsed.insert(&c.name, self.parse_cached(&c.expression).await);
        }
        let expressions: Vec<Arc<Expression>> = parsed
            .values()
            .filter_map(|r| r.as_ref().ok().cloned())
            .collect();

        let builder = ContextBuilder::new(&self.store, &self.config);
        let mut ctx = match builder.build(entity, &expressions).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, "context build failed; marking selected properties as errors");
                let message = e.to_string();
                for c in &computed {
                    results.push(apply(&mut properties, &c.name, Outcome::Failed(message.clone())));
                }
                for i in &inherited {
                    results.push(apply(&mut properties, &i.name, Outcome::Failed(message.clone())));
                }
                results.sort_by(|a, b| a.name.cmp(&b.name));
                return finish(properties, results);
            }
        };
        for (name, ast) in &parsed {
            if let Ok(ast) = ast {
                ctx.pending.insert(name.to_string(), ast.clone());
            }
        }

        // Inherited values first, so formulas reading them see this pass.
        for i in &inherited {
            let outcome = resolve_inherited(i, &ctx);
            results.push(apply(&mut properties, &i.name, outcome));
            if let Some(resolved) = properties.get(&i.name) {
                ctx.properties.insert(i.name.clone(), resolved.clone());
            }
        }

        let now = now_iso8601();
        let mut evaluator = Evaluator::new(&ctx);
        for (name, ast) in &parsed {
            let outcome = match ast {
                Err(e) => Outcome::Failed(e.to_string()),
                Ok(_) => match evaluator.evaluate_property(name) {
                    Ok(value) => Outcome::Valid(value, now.clone()),
                    Err(e) => classify(name, e),
                },
            };
            results.push(apply(&mut properties, name, outcome));
        }

        results.sort_by(|a, b| a.name.cmp(&b.name));

        let outcome = finish(properties, results);
        info!(
            recomputed = outcome.results.len(),
            all_succeeded = outcome.all_succeeded,
            "computation pass finished"
        );
        outcome
    }

    /// Load, compute and persist one entity.
    #[instrument(skip(self, options), fields(only_stale = options.only_stale))]
    pub async fn recompute_entity(
        &self,
        tenant_id: &str,
        entity_id: &str,
        options: ComputeOptions,
        actor: &str,
    ) -> Result<ComputationOutcome, ComputeError> {
        let entity = self.store.fetch_entity(tenant_id, entity_id).await?;
        let outcome = self.compute_properties(&entity, options).await;
        self.persist_outcome(tenant_id, entity_id, &outcome, actor)
            .await?;
        Ok(outcome)
    }

    /// Load the entity, mark `names` stale on the fresh copy, then recompute
    /// and persist everything stale. Names the entity lacks are ignored.
    #[instrument(skip(self, names), fields(marked = names.len()))]
    pub async fn recompute_marked(
        &self,
        tenant_id: &str,
        entity_id: &str,
        names: &BTreeSet<String>,
        actor: &str,
    ) -> Result<ComputationOutcome, ComputeError> {
        let mut entity = self.store.fetch_entity(tenant_id, entity_id).await?;
        for name in names {
            if let Some(property) = entity.properties.get_mut(name) {
                property.mark_stale();
            }
        }
        let outcome = self
            .compute_properties(&entity, ComputeOptions { only_stale: true })
            .await;
        self.persist_outcome(tenant_id, entity_id, &outcome, actor)
            .await?;
        Ok(outcome)
    }

    /// Write every result of `outcome` back through the store.
    pub async fn persist_outcome(
        &self,
        tenant_id: &str,
        entity_id: &str,
        outcome: &ComputationOutcome,
        actor: &str,
    ) -> Result<(), ComputeError> {
        for r in &outcome.results {
            let cached_value = outcome
                .properties
                .get(&r.name)
                .and_then(Property::current_value)
                .cloned();
            let record = PropertyStateRecord {
                entity_id: entity_id.to_string(),
                property_name: r.name.clone(),
                status: r.status,
                cached_value,
                evaluated_at: r.evaluated_at.clone(),
                error: r.error.clone(),
                actor: actor.to_string(),
            };
            self.store
                .persist_computed_property(tenant_id, record)
                .await
                .map_err(|source| ComputeError::Persist {
                    entity_id: entity_id.to_string(),
                    property_name: r.name.clone(),
                    source,
                })?;
        }
        debug!(count = outcome.results.len(), "persisted computation results");
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Status bookkeeping
// ──────────────────────────────────────────────

enum Outcome {
    Valid(Option<Value>, String),
    Failed(String),
    Circular(String),
}

fn classify(name: &str, err: EvaluationError) -> Outcome {
    if err.is_cycle_member(name) {
        Outcome::Circular(err.message)
    } else {
        Outcome::Failed(err.message)
    }
}

fn resolve_inherited(
    prop: &InheritedProperty,
    ctx: &crate::context::EvaluationContext,
) -> Outcome {
    if let Some(v) = &prop.override_value {
        return Outcome::Valid(Some(v.clone()), now_iso8601());
    }
    let Some(source) = ctx.entity_by_id(&prop.from_entity) else {
        return Outcome::Failed(format!("source entity {} not found", prop.from_entity));
    };
    match source.property(prop.source_property()) {
        Some(p) => Outcome::Valid(p.current_value().cloned(), now_iso8601()),
        None => Outcome::Failed(format!(
            "source entity {} has no property {}",
            prop.from_entity,
            prop.source_property()
        )),
    }
}

/// Apply an outcome to the threaded properties map and report it.
fn apply(
    properties: &mut BTreeMap<String, Property>,
    name: &str,
    outcome: Outcome,
) -> PropertyResult {
    let (transition, evaluated_at) = match (properties.get_mut(name), &outcome) {
        (Some(Property::Computed(c)), Outcome::Valid(v, at)) => {
            (c.mark_valid(v.clone(), at.clone()), Some(at.clone()))
        }
        (Some(Property::Computed(c)), Outcome::Failed(m)) => (c.mark_error(m.clone()), None),
        (Some(Property::Computed(c)), Outcome::Circular(m)) => (c.mark_circular(m.clone()), None),
        (Some(Property::Inherited(i)), Outcome::Valid(v, at)) => {
            (i.mark_resolved(v.clone()), Some(at.clone()))
        }
        (Some(Property::Inherited(i)), Outcome::Failed(m) | Outcome::Circular(m)) => {
            (i.mark_error(m.clone()), None)
        }
        _ => (Ok(()), None),
    };
    if let Err(e) = transition {
        warn!(property = name, error = %e, "status transition rejected");
    }

    let property = properties.get(name);
    PropertyResult {
        name: name.to_string(),
        status: property
            .and_then(Property::status)
            .unwrap_or(ComputationStatus::Error),
        value: property.and_then(Property::current_value).cloned(),
        error: match outcome {
            Outcome::Valid(..) => None,
            Outcome::Failed(m) | Outcome::Circular(m) => Some(m),
        },
        evaluated_at,
    }
}

fn finish(properties: BTreeMap<String, Property>, results: Vec<PropertyResult>) -> ComputationOutcome {
    let all_succeeded = results
        .iter()
        .all(|r| r.status == ComputationStatus::Valid);
    ComputationOutcome {
        properties,
        results,
        all_succeeded,
    }
}

/// RFC 3339 timestamp for `cached_at`.
fn now_iso8601() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}
