//! Definition loading
//!
//! Wires the Lua modules to CLI backends: `log` goes to `tracing`, `env` reads
//! a snapshot of the process environment.

use anyhow::Result;
use dockyard_core::domain::AppDefinition;
use dockyard_lua::{EnvModule, LogLevel, LogModule, LogSink, ModuleRegistry, VarProvider};
use std::collections::BTreeMap;

use crate::config::Config;

/// Prefixes of process variables a definition may read
const VISIBLE_PREFIXES: &[&str] = &["DOCKYARD_", "AWS_", "GITHUB_"];

/// Forwards definition log messages to `tracing`
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write(&mut self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(source = "deploy.lua", "{}", message),
            LogLevel::Info => tracing::info!(source = "deploy.lua", "{}", message),
            LogLevel::Warning => tracing::warn!(source = "deploy.lua", "{}", message),
            LogLevel::Error => tracing::error!(source = "deploy.lua", "{}", message),
        }
    }
}

/// Process environment, filtered to [`VISIBLE_PREFIXES`]
pub struct ProcessVarProvider {
    vars: BTreeMap<String, String>,
}

impl ProcessVarProvider {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            vars: vars
                .into_iter()
                .filter(|(name, _)| is_visible(name))
                .collect(),
        }
    }
}

fn is_visible(name: &str) -> bool {
    VISIBLE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

impl VarProvider for ProcessVarProvider {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }
}

/// Modules available to `deploy.lua` when run from the CLI
pub fn module_registry(vars: ProcessVarProvider) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register(LogModule::new(TracingLogSink));
    registry.register(EnvModule::new(vars));
    registry
}

/// Load and validate the configured definition file
pub fn load(config: &Config) -> Result<AppDefinition> {
    tracing::debug!(path = %config.definition.display(), "Loading definition");
    dockyard_lua::load_definition(
        &config.definition,
        &module_registry(ProcessVarProvider::from_env()),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::Path;

    pub(crate) const DEFINITION: &str = r#"
        log.info("defining hello")
        return app.define({
            name = "hello",
            account = env.get("AWS_ACCOUNT", "123456789012"),
            region = "us-east-1",
            source = app.source("acme", "hello-app"),
            infra = { owner = "acme", repo = "hello-infra", branch = "master" },
            branches = {
                app.branch("^master$", "prod"),
                app.branch("^develop$", "dev"),
                app.branch("^release/", "staging"),
                app.branch("^release/hotfix", "prod"),
            },
            environments = {
                app.environment("prod", { tag = "prod", cidr = "10.0.0.0/16" }),
                app.environment("dev", { tag = "dev", cidr = "10.1.0.0/16" }),
            },
        })
    "#;

    /// Writes [`DEFINITION`] into `dir` and returns a config pointing at it
    pub(crate) fn config_in(dir: &Path) -> Config {
        let definition = dir.join("deploy.lua");
        std::fs::write(&definition, DEFINITION).unwrap();
        Config {
            definition,
            out_dir: dir.join("dockyard.out"),
        }
    }

    /// Registry whose `env` sees fixed values instead of the process
    pub(crate) fn fixed_registry() -> ModuleRegistry {
        module_registry(ProcessVarProvider::from_vars(vec![(
            "AWS_ACCOUNT".to_string(),
            "210987654321".to_string(),
        )]))
    }

    /// Loads the definition `config` points at with [`fixed_registry`]
    pub(crate) fn load_fixed(config: &Config) -> Result<AppDefinition> {
        dockyard_lua::load_definition(&config.definition, &fixed_registry())
    }

    /// Writes [`DEFINITION`] into `dir` and loads it
    pub(crate) fn app_in(dir: &Path) -> AppDefinition {
        load_fixed(&config_in(dir)).unwrap()
    }

    #[test]
    fn test_provider_filters_prefixes() {
        let provider = ProcessVarProvider::from_vars(vec![
            ("AWS_ACCOUNT".to_string(), "123456789012".to_string()),
            ("DOCKYARD_OUT".to_string(), "out".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);

        assert_eq!(provider.get("AWS_ACCOUNT").as_deref(), Some("123456789012"));
        assert!(provider.get("HOME").is_none());
        assert_eq!(provider.keys(), vec!["AWS_ACCOUNT", "DOCKYARD_OUT"]);
    }

    #[test]
    fn test_load_definition() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());

        assert_eq!(app.name, "hello");
        assert_eq!(app.account, "210987654321");
        assert_eq!(app.environments.len(), 2);
    }

    #[test]
    fn test_load_missing_definition() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            definition: dir.path().join("deploy.lua"),
            out_dir: dir.path().join("out"),
        };
        assert!(load(&config).is_err());
    }
}
