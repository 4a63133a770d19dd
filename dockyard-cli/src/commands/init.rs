//! Init command handlers
//!
//! Generates the files editors need to complete `deploy.lua`: a
//! `.luarc.json` and Lua Language Server stubs for every global a definition
//! can use.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use dockyard_lua::modules::{EnvModule, LogLevel, LogModule, LogSink, VarProvider};
use dockyard_lua::{ModuleRegistry, app_stubs};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory, relative to the output directory, that holds the stubs
const STUBS_DIR: &str = ".dockyard/stubs";

/// Init subcommands
#[derive(Subcommand)]
pub enum InitCommands {
    /// Generate Lua development files (.luarc.json and stubs)
    Lua {
        /// Output directory for generated files
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Generate only .luarc.json
        #[arg(long)]
        config_only: bool,

        /// Generate only stub files
        #[arg(long)]
        stubs_only: bool,
    },
}

pub fn handle_init_command(command: InitCommands) -> Result<()> {
    match command {
        InitCommands::Lua {
            output,
            config_only,
            stubs_only,
        } => {
            generate_lua_dev_files(&output, !stubs_only, !config_only)?;

            println!("{}", "✓ Lua development files generated!".green().bold());
            println!();
            println!("{}", "Next steps:".bold());
            println!("  1. Install Lua Language Server in your editor");
            println!("  2. Open deploy.lua to see autocomplete and type hints");
            println!("  3. Run {} to check the definition", "dockyard stacks".cyan());
            Ok(())
        }
    }
}

fn generate_lua_dev_files(output: &Path, config: bool, stubs: bool) -> Result<()> {
    let registry = stub_registry();
    if config {
        generate_luarc_json(output, &registry)?;
    }
    if stubs {
        generate_stub_files(output, &registry)?;
    }
    Ok(())
}

/// The modules a definition can use, backed by sinks that do nothing
fn stub_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register(LogModule::new(NoOpLogSink));
    registry.register(EnvModule::new(NoOpVarProvider));
    registry
}

/// Every global a definition sees: `app` plus one per registered module
fn definition_globals(registry: &ModuleRegistry) -> Vec<&'static str> {
    std::iter::once("app")
        .chain(registry.modules().iter().map(|module| module.id()))
        .collect()
}

/// Generate .luarc.json for Lua LSP configuration
fn generate_luarc_json(output: &Path, registry: &ModuleRegistry) -> Result<()> {
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory {}", output.display()))?;
    let luarc_path = output.join(".luarc.json");

    let luarc_content = format!(
        r#"{{
  "$schema": "https://raw.githubusercontent.com/sumneko/vscode-lua/master/setting/schema.json",
  "runtime": {{
    "version": "Lua 5.4"
  }},
  "diagnostics": {{
    "globals": {}
  }},
  "workspace": {{
    "library": ["{}"],
    "checkThirdParty": false
  }},
  "completion": {{
    "callSnippet": "Both"
  }}
}}
"#,
        serde_json::to_string(&definition_globals(registry))?,
        STUBS_DIR
    );

    fs::write(&luarc_path, luarc_content)
        .with_context(|| format!("Failed to write {}", luarc_path.display()))?;

    println!("  {} .luarc.json", "Created".green());

    Ok(())
}

/// Generate stub files from the real module implementations
fn generate_stub_files(output: &Path, registry: &ModuleRegistry) -> Result<()> {
    let stubs_dir = output.join(STUBS_DIR);
    fs::create_dir_all(&stubs_dir)
        .with_context(|| format!("Failed to create stubs directory {}", stubs_dir.display()))?;

    write_stub(&stubs_dir, "app", &app_stubs())?;
    println!("  {} app.lua", "Created".green());

    for module in registry.modules() {
        let metadata = module.metadata();
        write_stub(&stubs_dir, metadata.id, &module.stubs())?;
        println!(
            "  {} {}.lua {}",
            "Created".green(),
            metadata.id,
            format!("(v{}, {})", metadata.version, metadata.description).dimmed()
        );
    }

    println!(
        "  {} in {}",
        "Stubs ready".green(),
        stubs_dir.display().to_string().cyan()
    );

    Ok(())
}

fn write_stub(stubs_dir: &Path, name: &str, content: &str) -> Result<()> {
    let stub_path = stubs_dir.join(format!("{}.lua", name));
    fs::write(&stub_path, content)
        .with_context(|| format!("Failed to write stub file {}", stub_path.display()))
}

/// Sink for stub generation; nothing is ever logged
struct NoOpLogSink;

impl LogSink for NoOpLogSink {
    fn write(&mut self, _level: LogLevel, _message: &str) {}
}

/// Provider for stub generation; nothing is ever read
struct NoOpVarProvider;

impl VarProvider for NoOpVarProvider {
    fn get(&self, _name: &str) -> Option<String> {
        None
    }

    fn keys(&self) -> Vec<String> {
        Vec::new()
    }
}
