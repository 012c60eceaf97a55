#![forbid(unsafe_code)]

use clap::Parser;
use mdocify::{RuleKind, Rules};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "mdocify", version)]
struct Cli {
    /// Man-dialect manual page to convert
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Register NAME as a symbol substitution (.Sy)
    #[arg(short = 's', value_name = "NAME")]
    symbols: Vec<String>,

    /// Register NAME as a variable substitution (.Va)
    #[arg(short = 'v', value_name = "NAME")]
    variables: Vec<String>,

    /// Register NAME as a define substitution (.Dv)
    #[arg(short = 'D', value_name = "NAME")]
    defines: Vec<String>,

    /// Register NAME as a type substitution (.Vt)
    #[arg(short = 't', value_name = "NAME")]
    types: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut rules = Rules::new();
    for name in &cli.symbols {
        rules.register(RuleKind::Symbol, name)?;
    }
    for name in &cli.variables {
        rules.register(RuleKind::Variable, name)?;
    }
    for name in &cli.defines {
        rules.register(RuleKind::Define, name)?;
    }
    for name in &cli.types {
        rules.register(RuleKind::Type, name)?;
    }

    let input = fs::read_to_string(&cli.file)
        .map_err(|err| format!("cannot read {}: {err}", cli.file.display()))?;

    let output = mdocify::convert(&input, &rules)?;
    print!("{output}");
    Ok(())
}
