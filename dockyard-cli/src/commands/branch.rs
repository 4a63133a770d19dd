//! Branch command handlers
//!
//! Shows how the branch mapping treats a branch name, using the same
//! last-match-wins rule the image builder script applies.

use anyhow::{Result, bail};
use clap::Subcommand;
use colored::*;
use dockyard_core::domain::AppDefinition;

use crate::config::Config;
use crate::definition;

/// Branch subcommands
#[derive(Subcommand)]
pub enum BranchCommands {
    /// Resolve the image tag a branch publishes
    Resolve {
        /// Branch name, e.g. `develop` or `release/1.2`
        branch: String,
    },
    /// List the mapping rules in evaluation order
    List,
}

/// Outcome of resolving one branch
#[derive(Debug, PartialEq)]
struct Resolution {
    tag: String,
    /// Patterns that also matched but were overridden
    shadowed: Vec<String>,
    environments: Vec<String>,
}

pub fn handle_branch_command(command: BranchCommands, config: &Config) -> Result<()> {
    let app = definition::load(config)?;

    match command {
        BranchCommands::Resolve { branch } => {
            let resolution = resolve(&app, &branch)?;

            if !resolution.shadowed.is_empty() {
                tracing::warn!(
                    branch = %branch,
                    shadowed = ?resolution.shadowed,
                    "Branch matches several rules; the last one wins"
                );
            }

            println!("{}", resolution.tag);
            if resolution.environments.is_empty() {
                println!(
                    "  {}",
                    "No environment deploys this tag".yellow()
                );
            } else {
                println!(
                    "  {} {}",
                    "Deploys to".dimmed(),
                    resolution.environments.join(", ").cyan()
                );
            }
            Ok(())
        }
        BranchCommands::List => {
            list(&app);
            Ok(())
        }
    }
}

fn resolve(app: &AppDefinition, branch: &str) -> Result<Resolution> {
    let matches = app.branches.matches(branch);
    let Some((winner, shadowed)) = matches.split_last() else {
        bail!(
            "Branch '{}' matches no rule; its images get no environment tag",
            branch
        );
    };

    let tag = winner.tag().to_string();
    let environments = app
        .environments
        .iter()
        .filter(|env| env.tag == tag)
        .map(|env| env.name.clone())
        .collect();

    Ok(Resolution {
        tag,
        shadowed: shadowed.iter().map(|rule| rule.pattern().to_string()).collect(),
        environments,
    })
}

fn list(app: &AppDefinition) {
    println!("{}", "Branch rules (last match wins)".bold());
    for (index, rule) in app.branches.rules().iter().enumerate() {
        println!(
            "  {}. {} -> {}",
            index + 1,
            rule.pattern().cyan(),
            rule.tag().green()
        );
    }

    println!("{}", "Environments".bold());
    for env in &app.environments {
        let published = if app.branches.publishes(&env.tag) {
            String::new()
        } else {
            " (no rule publishes this tag)".yellow().to_string()
        };
        println!("  {} <- {}{}", env.name.cyan(), env.tag.green(), published);
    }
}
