//! Registry and image builder stack
//!
//! Shared by every environment. Holds the container registry (with a 30-day
//! image expiry rule), the GitHub credentials for webhooks, and the build
//! project that builds the application image on push, tags it with the
//! commit, the build number and the branch's deployment tag, and pushes it.

use serde_json::json;

use crate::buildspec::scripts;
use crate::domain::app::AppDefinition;
use crate::error::Result;
use crate::stacks::{SHARED_ENVIRONMENT, StackDefinition, build_environment};
use crate::template::intrinsic::{assume_role_policy, get_att, policy_document, reference, sub};
use crate::template::{Output, Resource, Template};

/// Images older than this are expired from the registry
pub const IMAGE_EXPIRY_DAYS: u32 = 30;

pub struct RegistryStack<'a> {
    app: &'a AppDefinition,
}

impl<'a> RegistryStack<'a> {
    pub fn new(app: &'a AppDefinition) -> Self {
        Self { app }
    }

    /// ECR lifecycle policy text expiring images by push age
    pub fn lifecycle_policy() -> String {
        json!({
            "rules": [{
                "rulePriority": 1,
                "description": format!("Expire images older than {} days", IMAGE_EXPIRY_DAYS),
                "selection": {
                    "tagStatus": "any",
                    "countType": "sinceImagePushed",
                    "countUnit": "days",
                    "countNumber": IMAGE_EXPIRY_DAYS
                },
                "action": { "type": "expire" }
            }]
        })
        .to_string()
    }

    /// One webhook filter group per branch rule
    fn webhook_filter_groups(&self) -> serde_json::Value {
        let groups: Vec<_> = self
            .app
            .branches
            .rules()
            .iter()
            .map(|rule| {
                json!([
                    { "Type": "EVENT", "Pattern": "PUSH" },
                    { "Type": "HEAD_REF", "Pattern": rule.head_ref_pattern() }
                ])
            })
            .collect();
        json!(groups)
    }
}

impl StackDefinition for RegistryStack<'_> {
    fn name(&self) -> String {
        self.app.registry_stack_name()
    }

    fn environment_label(&self) -> String {
        SHARED_ENVIRONMENT.to_string()
    }

    fn build(&self) -> Result<Template> {
        let app = self.app;
        let mut template = Template::new(format!(
            "{} registry and image builder",
            app.name
        ));

        template.add(
            "Repository",
            Resource::new(
                "AWS::ECR::Repository",
                json!({
                    "RepositoryName": app.registry,
                    "LifecyclePolicy": { "LifecyclePolicyText": Self::lifecycle_policy() }
                }),
            ),
        )?;

        template.add(
            "SourceCredential",
            Resource::new(
                "AWS::CodeBuild::SourceCredential",
                json!({
                    "AuthType": "PERSONAL_ACCESS_TOKEN",
                    "ServerType": "GITHUB",
                    "Token": app.source.token_reference()
                }),
            ),
        )?;

        template.add(
            "BuildRole",
            Resource::new(
                "AWS::IAM::Role",
                json!({ "AssumeRolePolicyDocument": assume_role_policy("codebuild.amazonaws.com") }),
            ),
        )?;
        template.add(
            "BuildRolePolicy",
            Resource::new(
                "AWS::IAM::Policy",
                json!({
                    "PolicyName": format!("{}-image-builder", app.name),
                    "Roles": [reference("BuildRole")],
                    "PolicyDocument": policy_document(vec![
                        (vec!["ecr:GetAuthorizationToken"], json!("*")),
                        (
                            vec![
                                "ecr:BatchCheckLayerAvailability",
                                "ecr:CompleteLayerUpload",
                                "ecr:InitiateLayerUpload",
                                "ecr:PutImage",
                                "ecr:UploadLayerPart",
                            ],
                            get_att("Repository", "Arn"),
                        ),
                        (
                            vec!["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
                            sub("arn:aws:logs:${AWS::Region}:${AWS::AccountId}:log-group:/aws/codebuild/*"),
                        ),
                    ])
                }),
            ),
        )?;

        let buildspec = scripts::image_builder(&app.branches).to_yaml()?;

        template.add(
            "ImageBuilder",
            Resource::new(
                "AWS::CodeBuild::Project",
                json!({
                    "Name": format!("{}-image-builder", app.name),
                    "ServiceRole": get_att("BuildRole", "Arn"),
                    "Source": {
                        "Type": "GITHUB",
                        "Location": app.source.clone_url(),
                        "GitCloneDepth": 0,
                        "ReportBuildStatus": true,
                        "BuildSpec": buildspec
                    },
                    "Triggers": {
                        "Webhook": true,
                        "FilterGroups": self.webhook_filter_groups()
                    },
                    "Environment": build_environment(true, vec![
                        ("IMAGE_NAME", json!(app.container_name())),
                        ("REPOSITORY_URI", get_att("Repository", "RepositoryUri")),
                    ]),
                    "Artifacts": { "Type": "NO_ARTIFACTS" }
                }),
            )
            .depends_on("SourceCredential")
            .depends_on("BuildRolePolicy"),
        )?;

        template.add_output(
            "RepositoryUri",
            Output::new(get_att("Repository", "RepositoryUri"))
                .description("Registry URI images are pushed to"),
        );

        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::app::tests::sample_app;

    fn template() -> Template {
        let app = sample_app();
        RegistryStack::new(&app).synthesize().unwrap().template
    }

    #[test]
    fn test_lifecycle_expires_after_30_days() {
        let policy: serde_json::Value =
            serde_json::from_str(&RegistryStack::lifecycle_policy()).unwrap();
        let selection = &policy["rules"][0]["selection"];
        assert_eq!(selection["countType"], "sinceImagePushed");
        assert_eq!(selection["countUnit"], "days");
        assert_eq!(selection["countNumber"], 30);
        assert_eq!(policy["rules"][0]["action"]["type"], "expire");
    }

    #[test]
    fn test_repository_named_after_registry() {
        let template = template();
        let repo = template.resource("Repository").unwrap();
        assert_eq!(repo.property("RepositoryName").unwrap(), "hello");
    }

    #[test]
    fn test_webhook_filters_per_branch_rule() {
        let template = template();
        let project = template.resource("ImageBuilder").unwrap();
        let groups = &project.property("Triggers").unwrap()["FilterGroups"];

        assert_eq!(groups.as_array().unwrap().len(), 2);
        assert_eq!(groups[0][0]["Pattern"], "PUSH");
        assert_eq!(groups[0][1]["Pattern"], "^refs/heads/master$");
        assert_eq!(groups[1][1]["Pattern"], "^refs/heads/develop$");
    }

    #[test]
    fn test_buildspec_maps_branches_to_tags() {
        let template = template();
        let project = template.resource("ImageBuilder").unwrap();
        let buildspec = project.property("Source").unwrap()["BuildSpec"]
            .as_str()
            .unwrap();

        assert!(buildspec.contains("ENV_TAG='prod'"));
        assert!(buildspec.contains("ENV_TAG='dev'"));
        assert!(buildspec.contains("git symbolic-ref HEAD --short"));

        let environment = project.property("Environment").unwrap();
        assert_eq!(environment["PrivilegedMode"], true);
        assert_eq!(environment["EnvironmentVariables"][0]["Name"], "IMAGE_NAME");
    }
}
