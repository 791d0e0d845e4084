use formulary_eval::{ComputationService, ComputeOptions, EngineConfig};

use super::{load_target, print_json, runtime};
use crate::{EntityTarget, OutputFormat};

/// Recompute in memory and print the results; the fixture file is not
/// rewritten.
pub(crate) fn cmd_compute(
    target: &EntityTarget,
    only_stale: bool,
    config: EngineConfig,
    output: OutputFormat,
    quiet: bool,
) -> Result<(), String> {
    let outcome = runtime()?.block_on(async {
        let (store, entity) = load_target(target).await?;
        let service = ComputationService::new(store, config);
        Ok::<_, String>(
            service
                .compute_properties(&entity, ComputeOptions { only_stale })
                .await,
        )
    })?;

    if quiet {
        return Ok(());
    }
    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "entity_id": target.entity,
            "results": outcome.results,
            "all_succeeded": outcome.all_succeeded,
        })),
        OutputFormat::Text => {
            if outcome.results.is_empty() {
                println!("nothing to recompute");
            }
            for r in &outcome.results {
                let value = r
                    .value
                    .as_ref()
                    .map(|v| v.display_text())
                    .unwrap_or_else(|| "null".to_string());
                match &r.error {
                    Some(e) => println!("{}: {} ({})", r.name, r.status, e),
                    None => println!("{}: {} = {}", r.name, r.status, value),
                }
            }
            Ok(())
        }
    }
}
