//! Stacks command handler

use anyhow::Result;
use colored::*;
use dockyard_core::domain::AppDefinition;
use dockyard_core::stacks::stacks_for;

use crate::config::Config;
use crate::definition;

/// One row of the stack listing
struct StackRow {
    name: String,
    environment: String,
    dependencies: Vec<String>,
}

pub fn handle_stacks_command(config: &Config) -> Result<()> {
    let app = definition::load(config)?;

    println!("{}", format!("Stacks for {}", app.name).bold());
    for (index, row) in stack_rows(&app).iter().enumerate() {
        let after = if row.dependencies.is_empty() {
            String::new()
        } else {
            format!("after {}", row.dependencies.join(", "))
        };
        println!(
            "  {}. {} [{}] {}",
            index + 1,
            row.name.cyan(),
            row.environment,
            after.dimmed()
        );
    }

    Ok(())
}

fn stack_rows(app: &AppDefinition) -> Vec<StackRow> {
    stacks_for(app)
        .iter()
        .map(|stack| StackRow {
            name: stack.name(),
            environment: stack.environment_label(),
            dependencies: stack.dependencies(),
        })
        .collect()
}
