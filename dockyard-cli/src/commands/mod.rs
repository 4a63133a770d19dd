//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod branch;
mod init;
mod manifest;
mod stacks;
mod synth;

pub use branch::BranchCommands;
pub use init::InitCommands;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Synthesize the cloud assembly
    Synth {
        /// Only write these stacks (repeatable)
        #[arg(short, long)]
        stack: Vec<String>,
    },
    /// List the stacks in deployment order
    Stacks,
    /// Inspect the branch mapping
    Branch {
        #[command(subcommand)]
        command: BranchCommands,
    },
    /// Write an imagedefinitions.json for a deploy action
    Manifest {
        /// Container name in the task definition
        #[arg(long, env = "CONTAINER_NAME")]
        container: String,

        /// Registry URI without a tag
        #[arg(long, env = "REPOSITORY_URI")]
        repository_uri: String,

        /// Image tag to deploy
        #[arg(long, env = "IMAGE_TAG")]
        tag: String,

        /// Output file
        #[arg(short, long, default_value = "imagedefinitions.json")]
        output: PathBuf,
    },
    /// Initialize development environment
    Init {
        #[command(subcommand)]
        command: InitCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Synth { stack } => synth::handle_synth_command(&stack, config),
        Commands::Stacks => stacks::handle_stacks_command(config),
        Commands::Branch { command } => branch::handle_branch_command(command, config),
        Commands::Manifest {
            container,
            repository_uri,
            tag,
            output,
        } => manifest::write_manifest(&container, &repository_uri, &tag, &output),
        Commands::Init { command } => init::handle_init_command(command),
    }
}
