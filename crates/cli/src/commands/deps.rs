use formulary_core::{
    collect_referenced_entity_ids, collect_self_properties, collect_traversals, dependency_paths,
    parse,
};

use super::print_json;
use crate::OutputFormat;

pub(crate) fn cmd_deps(expr: &str, output: OutputFormat) -> Result<(), String> {
    let ast = parse(expr).map_err(|e| e.to_string())?;
    let entity_ids: Vec<String> = collect_referenced_entity_ids(&ast).into_iter().collect();
    let self_properties: Vec<String> = collect_self_properties(&ast).into_iter().collect();
    let traversals: Vec<String> = collect_traversals(&ast).iter().map(|t| t.path()).collect();
    let paths = dependency_paths(&ast);

    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "entity_ids": entity_ids,
            "self_properties": self_properties,
            "traversals": traversals,
            "dependency_paths": paths,
        })),
        OutputFormat::Text => {
            println!("entity ids:       {}", entity_ids.join(", "));
            println!("self properties:  {}", self_properties.join(", "));
            println!("traversals:       {}", traversals.join(", "));
            println!("dependency paths: {}", paths.join(", "));
            Ok(())
        }
    }
}
