use formulary_core::{parse, parse_template, TemplatePart};

use super::print_json;
use crate::OutputFormat;

/// The syntax tree is printed as JSON in both output modes.
pub(crate) fn cmd_parse(expr: &str, _output: OutputFormat) -> Result<(), String> {
    let ast = parse(expr).map_err(|e| e.to_string())?;
    print_json(&ast)
}

pub(crate) fn cmd_template(text: &str, output: OutputFormat) -> Result<(), String> {
    let template = parse_template(text).map_err(|e| e.to_string())?;
    match output {
        OutputFormat::Json => print_json(&template),
        OutputFormat::Text => {
            for part in &template.parts {
                match part {
                    TemplatePart::Text { text } => println!("text  {:?}", text),
                    TemplatePart::Interpolation { source, .. } => println!("expr  {}", source),
                }
            }
            Ok(())
        }
    }
}
