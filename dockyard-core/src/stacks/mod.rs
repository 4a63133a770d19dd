//! Stack constructors
//!
//! Each stack type turns the application definition into one template. The
//! [`StackDefinition`] trait is the seam the assembly works against: it knows
//! a stack's name, what it must be deployed after, which environment label its
//! resources carry, and how to build its template.

pub mod delivery;
pub mod environment;
pub mod meta;
pub mod registry;

use std::collections::BTreeMap;

use crate::domain::app::AppDefinition;
use crate::error::Result;
use crate::template::Template;

pub use delivery::DeliveryPipelineStack;
pub use environment::EnvironmentStack;
pub use meta::MetaPipelineStack;
pub use registry::RegistryStack;

/// Tag key carried by every resource
pub const ENVIRONMENT_TAG: &str = "environment";

/// Label for stacks that serve every environment
pub const SHARED_ENVIRONMENT: &str = "shared";

/// A synthesizable stack
pub trait StackDefinition {
    /// Deployed stack name
    fn name(&self) -> String;

    /// Names of stacks that must be deployed first
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Value of the `environment` tag
    fn environment_label(&self) -> String;

    /// Builds the untagged template
    fn build(&self) -> Result<Template>;

    /// Builds, tags and checks the template
    fn synthesize(&self) -> Result<Stack> {
        let name = self.name();
        let tags = BTreeMap::from([(ENVIRONMENT_TAG.to_string(), self.environment_label())]);

        let mut template = self.build()?;
        template.apply_tags(&tags);
        template.check_references()?;

        tracing::debug!(
            stack = %name,
            resources = template.resources.len(),
            "Synthesized stack"
        );

        Ok(Stack {
            name,
            dependencies: self.dependencies(),
            tags,
            template,
        })
    }
}

/// A synthesized stack
#[derive(Debug, Clone)]
pub struct Stack {
    pub name: String,
    pub dependencies: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub template: Template,
}

impl Stack {
    /// File name of the template inside the cloud assembly
    pub fn template_file(&self) -> String {
        template_file_name(&self.name)
    }
}

pub fn template_file_name(stack_name: &str) -> String {
    format!("{}.template.json", stack_name)
}

/// Every stack for an application, in deployment order
///
/// The shared registry comes first, then each environment followed by its
/// delivery pipeline, then the meta-pipeline that deploys all of them.
pub fn stacks_for(app: &AppDefinition) -> Vec<Box<dyn StackDefinition + '_>> {
    let mut stacks: Vec<Box<dyn StackDefinition + '_>> = vec![Box::new(RegistryStack::new(app))];

    for env in &app.environments {
        stacks.push(Box::new(EnvironmentStack::new(app, env)));
        stacks.push(Box::new(DeliveryPipelineStack::new(app, env)));
    }

    stacks.push(Box::new(MetaPipelineStack::new(app)));
    stacks
}

/// Standard CodeBuild environment shared by every project
pub(crate) fn build_environment(
    privileged: bool,
    variables: Vec<(&str, serde_json::Value)>,
) -> serde_json::Value {
    let variables: Vec<serde_json::Value> = variables
        .into_iter()
        .map(|(name, value)| serde_json::json!({ "Name": name, "Type": "PLAINTEXT", "Value": value }))
        .collect();

    serde_json::json!({
        "Type": "LINUX_CONTAINER",
        "ComputeType": "BUILD_GENERAL1_SMALL",
        "Image": "aws/codebuild/standard:7.0",
        "PrivilegedMode": privileged,
        "EnvironmentVariables": variables
    })
}
