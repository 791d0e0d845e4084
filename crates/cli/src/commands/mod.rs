pub(crate) mod compute;
pub(crate) mod deps;
pub(crate) mod eval;
pub(crate) mod parse;

use serde::Serialize;

use formulary_model::Entity;
use formulary_storage::{EntityStore, InMemoryStore};

use crate::EntityTarget;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let pretty = serde_json::to_string_pretty(value)
        .map_err(|e| format!("serialization error: {}", e))?;
    println!("{}", pretty);
    Ok(())
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("failed to create tokio runtime: {}", e))
}

/// Load the fixture and the target entity from it.
pub(crate) async fn load_target(target: &EntityTarget) -> Result<(InMemoryStore, Entity), String> {
    let store = InMemoryStore::load_file(&target.store).map_err(|e| e.to_string())?;
    let entity = store
        .fetch_entity(&target.tenant, &target.entity)
        .await
        .map_err(|e| e.to_string())?;
    Ok((store, entity))
}
