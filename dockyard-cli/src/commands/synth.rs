//! Synth command handler
//!
//! Loads the definition, synthesizes every stack and writes the cloud
//! assembly to the output directory.

use anyhow::{Context, Result};
use colored::*;
use dockyard_core::domain::AppDefinition;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::definition;

pub fn handle_synth_command(stacks: &[String], config: &Config) -> Result<()> {
    let app = definition::load(config)?;
    let written = synth(&app, stacks, &config.out_dir)?;

    println!(
        "{}",
        format!("✓ Synthesized {} stack(s)", written.len() - 1)
            .green()
            .bold()
    );
    for path in &written {
        println!("  {} {}", "Wrote".green(), path.display());
    }

    Ok(())
}

/// Synthesize and write the assembly, returning the files written
fn synth(app: &AppDefinition, stacks: &[String], out_dir: &Path) -> Result<Vec<PathBuf>> {
    let assembly = dockyard_core::synthesize(app)
        .with_context(|| format!("Failed to synthesize '{}'", app.name))?
        .select(stacks)
        .context("Invalid --stack selection")?;

    assembly
        .write_to(out_dir)
        .with_context(|| format!("Failed to write cloud assembly to {}", out_dir.display()))
}
