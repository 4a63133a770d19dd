//! Dockyard CLI
//!
//! Command-line interface for synthesizing an application's deployment
//! stacks from its `deploy.lua` definition.

mod commands;
mod config;
mod definition;

use clap::Parser;
use colored::*;
use commands::{Commands, handle_command};
use config::Config;
use dockyard_core::SynthError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dockyard")]
#[command(about = "Dockyard container deployment synthesizer", long_about = None)]
struct Cli {
    /// Application definition file
    #[arg(
        long,
        global = true,
        env = "DOCKYARD_DEFINITION",
        default_value = "deploy.lua"
    )]
    definition: PathBuf,

    /// Cloud assembly output directory
    #[arg(long, global = true, env = "DOCKYARD_OUT", default_value = "dockyard.out")]
    out: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dockyard_cli=info,dockyard_core=info".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        definition: cli.definition,
        out_dir: cli.out,
    };

    match handle_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            if is_definition_error(&err) {
                eprintln!(
                    "  {} fix {} and run again",
                    "hint:".yellow(),
                    config.definition.display()
                );
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Whether the failure comes from the definition's content rather than I/O
fn is_definition_error(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<SynthError>())
        .any(SynthError::is_validation_error)
}
