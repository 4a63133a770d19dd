//! Build project specifications
//!
//! Typed buildspec (version 0.2) serialized to the YAML CodeBuild expects
//! inline in a project's `Source.BuildSpec` property. The scripts themselves
//! live in [`scripts`].

pub mod scripts;

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;

/// Commands for one build phase
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Phase {
    pub commands: Vec<String>,
}

impl Phase {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }
}

/// The four phases a buildspec can declare, in execution order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Phases {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_build: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_build: Option<Phase>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildEnv {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifacts {
    pub files: Vec<String>,
    #[serde(rename = "base-directory", skip_serializing_if = "Option::is_none")]
    pub base_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildSpec {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<BuildEnv>,
    pub phases: Phases,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Artifacts>,
}

impl BuildSpec {
    pub fn new(phases: Phases) -> Self {
        Self {
            version: "0.2".to_string(),
            env: None,
            phases,
            artifacts: None,
        }
    }

    /// Run every command under bash instead of the default sh
    pub fn with_bash(mut self) -> Self {
        self.env.get_or_insert_with(BuildEnv::default).shell = Some("bash".to_string());
        self
    }

    pub fn with_variable(mut self, name: &str, value: &str) -> Self {
        self.env
            .get_or_insert_with(BuildEnv::default)
            .variables
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_artifacts(mut self, artifacts: Artifacts) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// All commands in execution order
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        [
            &self.phases.install,
            &self.phases.pre_build,
            &self.phases.build,
            &self.phases.post_build,
        ]
        .into_iter()
        .flatten()
        .flat_map(|phase| phase.commands.iter().map(String::as_str))
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
