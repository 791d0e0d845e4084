use std::sync::Arc;

use formulary_core::parse;
use formulary_eval::{evaluate, ContextBuilder, EngineConfig};

use super::{load_target, print_json, runtime};
use crate::{EntityTarget, OutputFormat};

pub(crate) fn cmd_eval(
    expr: &str,
    target: &EntityTarget,
    config: &EngineConfig,
    output: OutputFormat,
    quiet: bool,
) -> Result<(), String> {
    let ast = Arc::new(parse(expr).map_err(|e| e.to_string())?);

    let value = runtime()?.block_on(async {
        let (store, entity) = load_target(target).await?;
        let ctx = ContextBuilder::new(&store, config)
            .build(&entity, std::slice::from_ref(&ast))
            .await
            .map_err(|e| e.to_string())?;
        evaluate(&ast, &ctx).map_err(|e| format!("evaluation error: {}", e))
    })?;

    if quiet {
        return Ok(());
    }
    match output {
        OutputFormat::Json => print_json(&serde_json::json!({ "value": value })),
        OutputFormat::Text => {
            match value {
                Some(v) => println!("{}", v.display_text()),
                None => println!("null"),
            }
            Ok(())
        }
    }
}
