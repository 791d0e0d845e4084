mod commands;
mod config;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Formula language toolchain: parse, inspect and evaluate formulas.
#[derive(Parser)]
#[command(name = "formulary", version, about = "Formula language toolchain")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a formula and print its syntax tree
    Parse {
        /// Formula source text
        expr: String,
    },

    /// Parse a template with ${...} interpolations
    Template {
        /// Template source text
        text: String,
    },

    /// List what a formula reads without evaluating it
    Deps {
        /// Formula source text
        expr: String,
    },

    /// Evaluate a formula against an entity from a store fixture
    Eval {
        /// Formula source text
        expr: String,
        #[command(flatten)]
        target: EntityTarget,
        /// Fail on missing references instead of yielding null
        #[arg(long)]
        strict: bool,
    },

    /// Recompute the computed and inherited properties of an entity
    Compute {
        #[command(flatten)]
        target: EntityTarget,
        /// Only recompute stale and never-computed properties
        #[arg(long)]
        only_stale: bool,
    },
}

/// Which entity of which store fixture to work on.
#[derive(clap::Args)]
pub(crate) struct EntityTarget {
    /// Path to the store fixture JSON file
    #[arg(long)]
    store: PathBuf,
    /// Tenant owning the entity
    #[arg(long)]
    tenant: String,
    /// Entity id
    #[arg(long)]
    entity: String,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    let mut engine = match config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(msg) => {
            report_error(&msg, cli.output, cli.quiet);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Parse { expr } => commands::parse::cmd_parse(&expr, cli.output),
        Commands::Template { text } => commands::parse::cmd_template(&text, cli.output),
        Commands::Deps { expr } => commands::deps::cmd_deps(&expr, cli.output),
        Commands::Eval {
            expr,
            target,
            strict,
        } => {
            engine.strict |= strict;
            commands::eval::cmd_eval(&expr, &target, &engine, cli.output, cli.quiet)
        }
        Commands::Compute { target, only_stale } => {
            commands::compute::cmd_compute(&target, only_stale, engine, cli.output, cli.quiet)
        }
    };

    if let Err(msg) = result {
        report_error(&msg, cli.output, cli.quiet);
        process::exit(1);
    }
}

/// Log to stderr. `RUST_LOG` overrides the default filter.
fn init_logging(quiet: bool) {
    let default = if quiet { "formulary=error" } else { "formulary=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            let json = serde_json::json!({ "error": msg });
            eprintln!("{}", json);
        }
    }
}
