//! Cloud assembly
//!
//! The output of a synthesis run: every stack's template plus a manifest that
//! records deployment order and tags. Written to disk as
//! `<out>/manifest.json` and `<out>/<stack>.template.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::app::AppDefinition;
use crate::error::{Result, SynthError};
use crate::stacks::{Stack, stacks_for};

pub const ASSEMBLY_VERSION: &str = "1.0";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Manifest entry for one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEntry {
    pub name: String,
    pub template: String,
    pub dependencies: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

/// `manifest.json` contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyManifest {
    pub version: String,
    pub synthesized_at: DateTime<Utc>,
    pub stacks: Vec<StackEntry>,
}

/// All synthesized stacks, in deployment order
#[derive(Debug, Clone)]
pub struct CloudAssembly {
    synthesized_at: DateTime<Utc>,
    stacks: Vec<Stack>,
}

/// Validate an application definition and synthesize all of its stacks
pub fn synthesize(app: &AppDefinition) -> Result<CloudAssembly> {
    app.validate()?;

    let stacks = stacks_for(app)
        .iter()
        .map(|definition| definition.synthesize())
        .collect::<Result<Vec<_>>>()?;

    let assembly = CloudAssembly {
        synthesized_at: Utc::now(),
        stacks,
    };
    assembly.check_order()?;

    tracing::info!(
        app = %app.name,
        stacks = assembly.stacks.len(),
        "Synthesized cloud assembly"
    );

    Ok(assembly)
}

impl CloudAssembly {
    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    pub fn stack(&self, name: &str) -> Option<&Stack> {
        self.stacks.iter().find(|stack| stack.name == name)
    }

    /// Narrow the assembly to the named stacks, keeping deployment order
    ///
    /// An empty selection keeps every stack.
    pub fn select(self, names: &[String]) -> Result<CloudAssembly> {
        if names.is_empty() {
            return Ok(self);
        }

        if let Some(unknown) = names.iter().find(|name| self.stack(name).is_none()) {
            return Err(SynthError::UnknownStack(unknown.clone()));
        }

        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        let stacks = self
            .stacks
            .into_iter()
            .filter(|stack| wanted.contains(stack.name.as_str()))
            .collect();

        Ok(CloudAssembly {
            synthesized_at: self.synthesized_at,
            stacks,
        })
    }

    pub fn manifest(&self) -> AssemblyManifest {
        AssemblyManifest {
            version: ASSEMBLY_VERSION.to_string(),
            synthesized_at: self.synthesized_at,
            stacks: self
                .stacks
                .iter()
                .map(|stack| StackEntry {
                    name: stack.name.clone(),
                    template: stack.template_file(),
                    dependencies: stack.dependencies.clone(),
                    tags: stack.tags.clone(),
                })
                .collect(),
        }
    }

    /// Write the manifest and every template into `out_dir`
    ///
    /// Returns the paths written, manifest first.
    pub fn write_to(&self, out_dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)?;

        let manifest_path = out_dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, serde_json::to_string_pretty(&self.manifest())?)?;

        let mut written = vec![manifest_path];
        for stack in &self.stacks {
            let path = out_dir.join(stack.template_file());
            fs::write(&path, stack.template.to_json_pretty()?)?;
            tracing::debug!(stack = %stack.name, path = %path.display(), "Wrote template");
            written.push(path);
        }

        Ok(written)
    }

    /// Stack names are unique and every dependency is a stack that appears
    /// earlier
    fn check_order(&self) -> Result<()> {
        let mut deployed = HashSet::new();
        for stack in &self.stacks {
            if let Some(missing) = stack
                .dependencies
                .iter()
                .find(|dep| !deployed.contains(dep.as_str()))
            {
                return Err(SynthError::invalid(format!(
                    "stack '{}' depends on '{}', which is not deployed before it",
                    stack.name, missing
                )));
            }
            if !deployed.insert(stack.name.as_str()) {
                return Err(SynthError::invalid(format!(
                    "stack '{}' appears twice in the assembly",
                    stack.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::app::EnvironmentConfig;
    use crate::domain::app::tests::sample_app;
    use crate::template::Template;

    #[test]
    fn test_synthesize_all_stacks() {
        let assembly = synthesize(&sample_app()).unwrap();
        assert_eq!(assembly.stacks().len(), 6);
        assert!(assembly.stack("hello-meta-pipeline").is_some());
        for stack in assembly.stacks() {
            assert!(!stack.template.resources.is_empty());
        }
    }

    #[test]
    fn test_synthesize_rejects_invalid_definition() {
        let mut app = sample_app();
        app.environments[0].cidr = "not-a-cidr".to_string();
        let err = synthesize(&app).unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_select_keeps_order_and_rejects_unknown() {
        let assembly = synthesize(&sample_app()).unwrap();

        let selected = assembly
            .clone()
            .select(&["hello-dev".to_string(), "hello-registry".to_string()])
            .unwrap();
        let names: Vec<&str> = selected.stacks().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["hello-registry", "hello-dev"]);

        let err = assembly.select(&["nope".to_string()]).unwrap_err();
        assert!(matches!(err, SynthError::UnknownStack(name) if name == "nope"));
    }

    #[test]
    fn test_write_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let assembly = synthesize(&sample_app()).unwrap();

        let written = assembly.write_to(dir.path()).unwrap();
        assert_eq!(written.len(), 7);

        let manifest: AssemblyManifest =
            serde_json::from_str(&fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap())
                .unwrap();
        assert_eq!(manifest.version, ASSEMBLY_VERSION);
        assert_eq!(manifest.stacks[1].name, "hello-prod");
        assert_eq!(manifest.stacks[1].template, "hello-prod.template.json");
        assert_eq!(manifest.stacks[1].dependencies, vec!["hello-registry"]);
        assert_eq!(manifest.stacks[1].tags["environment"], "prod");

        let template: Template = serde_json::from_str(
            &fs::read_to_string(dir.path().join("hello-prod.template.json")).unwrap(),
        )
        .unwrap();
        assert!(template.resource("Service").is_some());
    }

    #[test]
    fn test_check_order_detects_missing_dependency() {
        let mut assembly = synthesize(&sample_app()).unwrap();
        assembly.stacks.swap(0, 1);
        assert!(assembly.check_order().is_err());
    }

    #[test]
    fn test_check_order_detects_duplicate_stack() {
        let mut assembly = synthesize(&sample_app()).unwrap();
        let registry = assembly.stacks[0].clone();
        assembly.stacks.insert(1, registry);

        let err = assembly.check_order().unwrap_err();
        assert!(err.to_string().contains("appears twice"));
    }

    #[test]
    fn test_synthesize_rejects_shadowing_environment() {
        let mut app = sample_app();
        app.environments
            .push(EnvironmentConfig::new("prod-pipeline", "prod", "10.2.0.0/16"));

        let err = synthesize(&app).unwrap_err();
        assert!(err.is_validation_error());
    }
}
