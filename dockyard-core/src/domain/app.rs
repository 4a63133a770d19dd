//! Application definition
//!
//! The root configuration record. One definition produces the shared registry
//! stack, an environment stack and a delivery pipeline stack per environment,
//! and the meta-pipeline that deploys all of them.

use std::collections::HashSet;

use crate::domain::branch::{BranchMapping, is_valid_image_tag};
use crate::domain::network::Ipv4Cidr;
use crate::domain::scaling::AutoScalingConfig;
use crate::error::{Result, SynthError};
use crate::stacks::meta::{FIXED_STAGES, stage_name};

/// Secrets Manager secret holding the GitHub token, unless overridden
pub const DEFAULT_TOKEN_SECRET: &str = "github-token";

/// A GitHub repository and the secret used to access it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    pub owner: String,
    pub repo: String,
    pub token_secret: String,
}

impl GitSource {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            token_secret: DEFAULT_TOKEN_SECRET.to_string(),
        }
    }

    /// HTTPS clone URL
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }

    /// Dynamic reference resolving the token at deploy time
    pub fn token_reference(&self) -> String {
        format!(
            "{{{{resolve:secretsmanager:{}:SecretString}}}}",
            self.token_secret
        )
    }
}

/// The infrastructure repository the meta-pipeline tracks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraSource {
    pub repository: GitSource,
    pub branch: String,
}

/// Runtime shape of the application container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Fargate CPU units
    pub cpu: u32,
    /// Memory in MiB
    pub memory_mib: u32,
    pub port: u16,
    pub log_retention_days: u32,
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            cpu: 256,
            memory_mib: 512,
            port: 3000,
            log_retention_days: 7,
        }
    }
}

/// One deployable environment (prod, dev, uat, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub name: String,
    /// Image tag this environment runs and redeploys on
    pub tag: String,
    pub cidr: String,
    pub desired_count: u32,
}

impl EnvironmentConfig {
    pub fn new(name: impl Into<String>, tag: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
            cidr: cidr.into(),
            desired_count: 1,
        }
    }

    /// Parsed network range; fails for an invalid CIDR
    pub fn network(&self) -> Result<Ipv4Cidr> {
        self.cidr.parse()
    }
}

/// Everything needed to synthesize one application's stacks
#[derive(Debug, Clone)]
pub struct AppDefinition {
    pub name: String,
    pub account: String,
    pub region: String,
    /// Registry repository name; defaults to the application name
    pub registry: String,
    pub source: GitSource,
    pub infra: InfraSource,
    pub container: ContainerSpec,
    pub branches: BranchMapping,
    pub environments: Vec<EnvironmentConfig>,
}

impl AppDefinition {
    /// Registry URI without a tag
    pub fn repository_uri(&self) -> String {
        format!(
            "{}.dkr.ecr.{}.amazonaws.com/{}",
            self.account, self.region, self.registry
        )
    }

    /// Fully qualified image reference for an environment
    pub fn image_for(&self, env: &EnvironmentConfig) -> String {
        format!("{}:{}", self.repository_uri(), env.tag)
    }

    /// Name of the single container in the task definition
    pub fn container_name(&self) -> &str {
        &self.name
    }

    pub fn registry_stack_name(&self) -> String {
        format!("{}-registry", self.name)
    }

    pub fn environment_stack_name(&self, env: &EnvironmentConfig) -> String {
        format!("{}-{}", self.name, env.name)
    }

    pub fn pipeline_stack_name(&self, env: &EnvironmentConfig) -> String {
        format!("{}-{}-pipeline", self.name, env.name)
    }

    pub fn meta_stack_name(&self) -> String {
        format!("{}-meta-pipeline", self.name)
    }

    /// Export name for a value an environment stack shares
    pub fn export_name(&self, env: &EnvironmentConfig, key: &str) -> String {
        format!("{}-{}", self.environment_stack_name(env), key)
    }

    pub fn environment(&self, name: &str) -> Option<&EnvironmentConfig> {
        self.environments.iter().find(|env| env.name == name)
    }

    /// Validates the definition before any stack is built
    pub fn validate(&self) -> Result<()> {
        validate_name("application name", &self.name)?;
        validate_name("registry name", &self.registry)?;

        if self.account.len() != 12 || !self.account.chars().all(|c| c.is_ascii_digit()) {
            return Err(SynthError::invalid(format!(
                "account '{}' must be a 12-digit account id",
                self.account
            )));
        }

        if self.region.is_empty() {
            return Err(SynthError::invalid("region cannot be empty"));
        }

        for (what, source) in [("source", &self.source), ("infra", &self.infra.repository)] {
            if source.owner.is_empty() || source.repo.is_empty() {
                return Err(SynthError::invalid(format!(
                    "{} repository needs an owner and a repo",
                    what
                )));
            }
        }

        if self.infra.branch.is_empty() {
            return Err(SynthError::invalid("infra branch cannot be empty"));
        }

        if self.container.port == 0 {
            return Err(SynthError::invalid("container port must be greater than 0"));
        }

        if self.branches.is_empty() {
            return Err(SynthError::invalid(
                "branch mapping needs at least one rule",
            ));
        }

        if self.environments.is_empty() {
            return Err(SynthError::invalid(
                "definition needs at least one environment",
            ));
        }

        let mut seen = HashSet::new();
        for env in &self.environments {
            validate_name("environment name", &env.name)?;

            if !seen.insert(env.name.as_str()) {
                return Err(SynthError::DuplicateEnvironment(env.name.clone()));
            }

            if !is_valid_image_tag(&env.tag) {
                return Err(SynthError::InvalidTag(env.tag.clone()));
            }

            env.network()?;

            let scaling = AutoScalingConfig::default();
            if !(scaling.min_capacity..=scaling.max_capacity).contains(&env.desired_count) {
                return Err(SynthError::invalid(format!(
                    "environment '{}' desired count {} is outside the scaling bounds {}..={}",
                    env.name, env.desired_count, scaling.min_capacity, scaling.max_capacity
                )));
            }

            let stage = stage_name(&env.name);
            if let Some(fixed) = FIXED_STAGES
                .iter()
                .find(|fixed| fixed.eq_ignore_ascii_case(&stage))
            {
                return Err(SynthError::invalid(format!(
                    "environment '{}' would reuse the meta-pipeline stage '{}'",
                    env.name, fixed
                )));
            }

            if !self.branches.publishes(&env.tag) {
                tracing::warn!(
                    environment = %env.name,
                    tag = %env.tag,
                    "No branch rule publishes this tag; its pipeline will never start"
                );
            }
        }

        self.check_stack_names()
    }

    /// Stack names are built by concatenation, so an environment called
    /// `registry` or `prod-pipeline` could shadow another stack
    fn check_stack_names(&self) -> Result<()> {
        let mut names = vec![self.registry_stack_name(), self.meta_stack_name()];
        for env in &self.environments {
            names.push(self.environment_stack_name(env));
            names.push(self.pipeline_stack_name(env));
        }

        let mut seen = HashSet::new();
        match names.into_iter().find(|name| !seen.insert(name.clone())) {
            Some(duplicate) => Err(SynthError::invalid(format!(
                "stack name '{}' would be produced twice; rename the environment",
                duplicate
            ))),
            None => Ok(()),
        }
    }
}

/// Names end up in stack names, registry names and resource names, so they
/// are restricted to lowercase letters, digits and dashes.
fn validate_name(what: &str, name: &str) -> Result<()> {
    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if !starts_with_letter || !valid_chars || name.len() > 32 || name.ends_with('-') {
        return Err(SynthError::invalid(format!(
            "{} '{}' must be 1-32 lowercase letters, digits or dashes, starting with a letter",
            what, name
        )));
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two-environment definition used across the crate's tests
    pub(crate) fn sample_app() -> AppDefinition {
        AppDefinition {
            name: "hello".to_string(),
            account: "123456789012".to_string(),
            region: "us-east-1".to_string(),
            registry: "hello".to_string(),
            source: GitSource::new("acme", "hello-app"),
            infra: InfraSource {
                repository: GitSource::new("acme", "hello-infra"),
                branch: "master".to_string(),
            },
            container: ContainerSpec::default(),
            branches: BranchMapping::new()
                .with_rule("^master$", "prod")
                .unwrap()
                .with_rule("^develop$", "dev")
                .unwrap(),
            environments: vec![
                EnvironmentConfig::new("prod", "prod", "10.0.0.0/16"),
                EnvironmentConfig::new("dev", "dev", "10.1.0.0/16"),
            ],
        }
    }

    #[test]
    fn test_sample_is_valid() {
        assert!(sample_app().validate().is_ok());
    }

    #[test]
    fn test_names_and_uris() {
        let app = sample_app();
        let prod = app.environment("prod").unwrap();

        assert_eq!(
            app.image_for(prod),
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/hello:prod"
        );
        assert_eq!(app.registry_stack_name(), "hello-registry");
        assert_eq!(app.environment_stack_name(prod), "hello-prod");
        assert_eq!(app.pipeline_stack_name(prod), "hello-prod-pipeline");
        assert_eq!(app.meta_stack_name(), "hello-meta-pipeline");
        assert_eq!(app.export_name(prod, "ClusterName"), "hello-prod-ClusterName");
    }

    #[test]
    fn test_token_reference() {
        let source = GitSource::new("acme", "hello-app");
        assert_eq!(
            source.token_reference(),
            "{{resolve:secretsmanager:github-token:SecretString}}"
        );
        assert_eq!(source.clone_url(), "https://github.com/acme/hello-app.git");
    }

    #[test]
    fn test_duplicate_environment_rejected() {
        let mut app = sample_app();
        app.environments
            .push(EnvironmentConfig::new("prod", "prod", "10.2.0.0/16"));

        assert!(matches!(
            app.validate().unwrap_err(),
            SynthError::DuplicateEnvironment(name) if name == "prod"
        ));
    }

    #[test]
    fn test_invalid_fields_rejected() {
        let mut app = sample_app();
        app.name = "Hello".to_string();
        assert!(app.validate().is_err());

        let mut app = sample_app();
        app.account = "1234".to_string();
        assert!(app.validate().is_err());

        let mut app = sample_app();
        app.environments[0].cidr = "10.0.0.0/8".to_string();
        assert!(matches!(
            app.validate().unwrap_err(),
            SynthError::InvalidCidr { .. }
        ));

        let mut app = sample_app();
        app.environments[1].tag = "dev tag".to_string();
        assert!(matches!(app.validate().unwrap_err(), SynthError::InvalidTag(_)));

        let mut app = sample_app();
        app.environments.clear();
        assert!(app.validate().is_err());

        let mut app = sample_app();
        app.branches = BranchMapping::new();
        assert!(app.validate().is_err());
    }

    #[test]
    fn test_desired_count_within_scaling_bounds() {
        let mut app = sample_app();
        app.environments[0].desired_count = 4;
        assert!(app.validate().is_ok());

        app.environments[0].desired_count = 10;
        assert!(matches!(
            app.validate().unwrap_err(),
            SynthError::InvalidDefinition(_)
        ));

        app.environments[0].desired_count = 0;
        assert!(app.validate().is_err());
    }

    #[test]
    fn test_colliding_stack_names_rejected() {
        for name in ["prod-pipeline", "meta-pipeline", "meta", "registry"] {
            let mut app = sample_app();
            app.environments
                .push(EnvironmentConfig::new(name, "prod", "10.2.0.0/16"));

            let err = app.validate().unwrap_err();
            assert!(
                matches!(err, SynthError::InvalidDefinition(_)),
                "{}: {}",
                name,
                err
            );
        }
    }

    #[test]
    fn test_meta_stage_names_rejected() {
        for name in ["source", "synth", "selfmutate"] {
            let mut app = sample_app();
            app.environments
                .push(EnvironmentConfig::new(name, "prod", "10.2.0.0/16"));

            assert!(
                matches!(app.validate().unwrap_err(), SynthError::InvalidDefinition(_)),
                "{}",
                name
            );
        }
    }
}
