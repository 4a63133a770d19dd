//! Application definition parser
//!
//! Evaluates `deploy.lua` in the sandbox and reads the returned table into an
//! [`AppDefinition`]. Defaults are filled in here; semantic checks (account
//! format, CIDR ranges, tags) are left to [`AppDefinition::validate`], which
//! runs again at synthesis time.

use anyhow::{Context, Result, anyhow};
use dockyard_core::domain::{
    AppDefinition, BranchMapping, BranchRule, ContainerSpec, EnvironmentConfig, GitSource,
    InfraSource,
};
use dockyard_core::domain::app::DEFAULT_TOKEN_SECRET;
use mlua::{FromLua, Table, Value};
use std::path::Path;

use crate::module::ModuleRegistry;
use crate::sandbox::create_sandbox;

/// Parse an application definition from Lua source
///
/// The modules in `registry` are available to the script as globals.
///
/// # Errors
/// Returns an error if the Lua source fails to evaluate, does not return a
/// table, or is missing a required field. The definition is validated before
/// returning.
///
/// # Example
/// ```no_run
/// use dockyard_lua::{ModuleRegistry, parse_app_definition};
///
/// let source = r#"
///     return app.define({
///         name = "hello",
///         account = "123456789012",
///         region = "us-east-1",
///         source = app.source("acme", "hello-app"),
///         infra = { owner = "acme", repo = "hello-infra", branch = "master" },
///         branches = { app.branch("^master$", "prod") },
///         environments = {
///             app.environment("prod", { tag = "prod", cidr = "10.0.0.0/16" }),
///         },
///     })
/// "#;
///
/// let app = parse_app_definition(source, &ModuleRegistry::new())?;
/// assert_eq!(app.registry, "hello");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_app_definition(source: &str, registry: &ModuleRegistry) -> Result<AppDefinition> {
    let lua = create_sandbox().context("Failed to create definition sandbox")?;
    registry
        .register_all(&lua)
        .context("Failed to register definition modules")?;

    let definition: Table = lua
        .load(source)
        .set_name("deploy.lua")
        .eval()
        .context("Failed to evaluate application definition")?;

    let app = read_definition(&definition)?;
    app.validate()
        .with_context(|| format!("Invalid application definition '{}'", app.name))?;

    Ok(app)
}

/// Read and parse a definition file from disk
pub fn load_definition(path: &Path, registry: &ModuleRegistry) -> Result<AppDefinition> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read definition file {}", path.display()))?;
    parse_app_definition(&source, registry)
        .with_context(|| format!("Failed to load {}", path.display()))
}

fn read_definition(definition: &Table) -> Result<AppDefinition> {
    let name: String = required(definition, "name", "definition")?;
    let registry = optional::<String>(definition, "registry")?.unwrap_or_else(|| name.clone());

    let source_table: Table = required(definition, "source", "definition")?;
    let infra_table: Table = required(definition, "infra", "definition")?;

    let container = match optional::<Table>(definition, "container")? {
        Some(table) => parse_container(&table)?,
        None => ContainerSpec::default(),
    };

    Ok(AppDefinition {
        account: required(definition, "account", "definition")?,
        region: required(definition, "region", "definition")?,
        source: parse_git_source(&source_table, "source")?,
        infra: InfraSource {
            repository: parse_git_source(&infra_table, "infra")?,
            branch: required(&infra_table, "branch", "infra")?,
        },
        container,
        branches: parse_branches(definition)?,
        environments: parse_environments(definition)?,
        registry,
        name,
    })
}

fn parse_git_source(table: &Table, what: &str) -> Result<GitSource> {
    let mut source = GitSource::new(
        required::<String>(table, "owner", what)?,
        required::<String>(table, "repo", what)?,
    );
    source.token_secret =
        optional(table, "token_secret")?.unwrap_or_else(|| DEFAULT_TOKEN_SECRET.to_string());
    Ok(source)
}

fn parse_container(table: &Table) -> Result<ContainerSpec> {
    let defaults = ContainerSpec::default();
    Ok(ContainerSpec {
        cpu: optional(table, "cpu")?.unwrap_or(defaults.cpu),
        memory_mib: optional(table, "memory")?.unwrap_or(defaults.memory_mib),
        port: optional(table, "port")?.unwrap_or(defaults.port),
        log_retention_days: optional(table, "log_retention_days")?
            .unwrap_or(defaults.log_retention_days),
    })
}

/// Parse the ordered `branches` array
fn parse_branches(definition: &Table) -> Result<BranchMapping> {
    let branches: Table = required(definition, "branches", "definition")?;

    let mut mapping = BranchMapping::new();
    for (index, entry) in branches.sequence_values::<Table>().enumerate() {
        let entry = entry.with_context(|| format!("branches[{}] must be a table", index + 1))?;
        let what = format!("branches[{}]", index + 1);
        let pattern: String = required(&entry, "pattern", &what)?;
        let tag: String = required(&entry, "tag", &what)?;
        mapping.push(BranchRule::new(pattern, tag).with_context(|| format!("Invalid {}", what))?);
    }

    Ok(mapping)
}

fn parse_environments(definition: &Table) -> Result<Vec<EnvironmentConfig>> {
    let environments: Table = required(definition, "environments", "definition")?;

    let mut parsed = Vec::new();
    for (index, entry) in environments.sequence_values::<Table>().enumerate() {
        let entry =
            entry.with_context(|| format!("environments[{}] must be a table", index + 1))?;
        let what = format!("environments[{}]", index + 1);

        let mut env = EnvironmentConfig::new(
            required::<String>(&entry, "name", &what)?,
            required::<String>(&entry, "tag", &what)?,
            required::<String>(&entry, "cidr", &what)?,
        );
        if let Some(count) = optional(&entry, "desired_count")? {
            env.desired_count = count;
        }
        parsed.push(env);
    }

    Ok(parsed)
}

fn required<T: FromLua>(table: &Table, key: &str, what: &str) -> Result<T> {
    match table.get::<Value>(key)? {
        Value::Nil => Err(anyhow!("{} must have a '{}' field", what, key)),
        _ => table
            .get(key)
            .with_context(|| format!("Field '{}' of {} has the wrong type", key, what)),
    }
}

fn optional<T: FromLua>(table: &Table, key: &str) -> Result<Option<T>> {
    table
        .get(key)
        .with_context(|| format!("Field '{}' has the wrong type", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{EnvModule, LogLevel, LogModule, LogSink, VarProvider};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    const DEFINITION: &str = r#"
        return app.define({
            name = "hello",
            account = "123456789012",
            region = "us-east-1",
            source = app.source("acme", "hello-app"),
            infra = { owner = "acme", repo = "hello-infra", branch = "master" },
            branches = {
                app.branch("^master$", "prod"),
                app.branch("^develop$", "dev"),
            },
            environments = {
                app.environment("prod", { tag = "prod", cidr = "10.0.0.0/16", desired_count = 2 }),
                app.environment("dev", { tag = "dev", cidr = "10.1.0.0/16" }),
            },
        })
    "#;

    struct MapVars(HashMap<String, String>);

    impl VarProvider for MapVars {
        fn get(&self, name: &str) -> Option<String> {
            self.0.get(name).cloned()
        }

        fn keys(&self) -> Vec<String> {
            self.0.keys().cloned().collect()
        }
    }

    struct Collect(Arc<Mutex<Vec<String>>>);

    impl LogSink for Collect {
        fn write(&mut self, _level: LogLevel, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_parse_definition_with_defaults() {
        let app = parse_app_definition(DEFINITION, &ModuleRegistry::new()).unwrap();

        assert_eq!(app.name, "hello");
        assert_eq!(app.registry, "hello");
        assert_eq!(app.source.repo, "hello-app");
        assert_eq!(app.source.token_secret, DEFAULT_TOKEN_SECRET);
        assert_eq!(app.infra.branch, "master");
        assert_eq!(app.container, ContainerSpec::default());
        assert_eq!(app.branches.rules().len(), 2);
        assert_eq!(app.branches.resolve("develop"), Some("dev"));
        assert_eq!(app.environments.len(), 2);
        assert_eq!(app.environments[0].desired_count, 2);
        assert_eq!(app.environments[1].desired_count, 1);
    }

    #[test]
    fn test_parse_container_overrides() {
        let source = DEFINITION.replace(
            r#"region = "us-east-1","#,
            r#"region = "us-east-1", container = { port = 8080, memory = 1024 },"#,
        );
        let app = parse_app_definition(&source, &ModuleRegistry::new()).unwrap();
        assert_eq!(app.container.port, 8080);
        assert_eq!(app.container.memory_mib, 1024);
        assert_eq!(app.container.cpu, 256);
    }

    #[test]
    fn test_missing_field() {
        let source = DEFINITION.replace(r#"region = "us-east-1","#, "");
        let err = parse_app_definition(&source, &ModuleRegistry::new()).unwrap_err();
        assert!(format!("{:#}", err).contains("'region'"));
    }

    #[test]
    fn test_invalid_pattern() {
        let source = DEFINITION.replace("^develop$", "(unclosed");
        let err = parse_app_definition(&source, &ModuleRegistry::new()).unwrap_err();
        assert!(format!("{:#}", err).contains("branches[2]"));
    }

    #[test]
    fn test_validation_runs() {
        let source = DEFINITION.replace("10.1.0.0/16", "10.1.0.0/8");
        assert!(parse_app_definition(&source, &ModuleRegistry::new()).is_err());
    }

    #[test]
    fn test_not_a_table() {
        assert!(parse_app_definition("return 42", &ModuleRegistry::new()).is_err());
    }

    #[test]
    fn test_definition_uses_modules() {
        let logged = Arc::new(Mutex::new(Vec::new()));
        let vars = MapVars(HashMap::from([(
            "AWS_ACCOUNT".to_string(),
            "210987654321".to_string(),
        )]));

        let mut registry = ModuleRegistry::new();
        registry.register(LogModule::new(Collect(logged.clone())));
        registry.register(EnvModule::new(vars));

        let source = format!(
            "log.info(\"loading\")\n{}",
            DEFINITION.replace(r#""123456789012""#, r#"env.require("AWS_ACCOUNT")"#)
        );
        let app = parse_app_definition(&source, &registry).unwrap();

        assert_eq!(app.account, "210987654321");
        assert_eq!(*logged.lock().unwrap(), vec!["loading".to_string()]);
    }

    #[test]
    fn test_load_definition_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.lua");
        std::fs::write(&path, DEFINITION).unwrap();

        let app = load_definition(&path, &ModuleRegistry::new()).unwrap();
        assert_eq!(app.name, "hello");

        let missing = load_definition(&dir.path().join("nope.lua"), &ModuleRegistry::new());
        assert!(missing.is_err());
    }
}
