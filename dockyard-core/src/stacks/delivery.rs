//! Delivery pipeline stack for one environment
//!
//! Source (registry push of the environment's tag) -> Build (write
//! `imagedefinitions.json`) -> Deploy (roll the service to the new image).
//! Stages run strictly in that order and the pipeline stops at the first
//! failed stage.
//!
//! The registry source action does not start the pipeline on its own, so an
//! events rule matching successful pushes of the tag starts it explicitly.

use serde_json::{Value, json};

use crate::buildspec::scripts;
use crate::domain::app::{AppDefinition, EnvironmentConfig};
use crate::domain::manifest::IMAGE_DEFINITIONS_FILE;
use crate::error::Result;
use crate::stacks::environment::{CLUSTER_NAME_EXPORT, SERVICE_NAME_EXPORT};
use crate::stacks::{StackDefinition, build_environment};
use crate::template::intrinsic::{
    assume_role_policy, get_att, import_value, join, policy_document, reference, sub,
};
use crate::template::{Output, Resource, Template};

/// Stage names, in execution order
pub const STAGES: [&str; 3] = ["Source", "Build", "Deploy"];

const SOURCE_ARTIFACT: &str = "SourceOutput";
const BUILD_ARTIFACT: &str = "BuildOutput";

pub struct DeliveryPipelineStack<'a> {
    app: &'a AppDefinition,
    env: &'a EnvironmentConfig,
}

impl<'a> DeliveryPipelineStack<'a> {
    pub fn new(app: &'a AppDefinition, env: &'a EnvironmentConfig) -> Self {
        Self { app, env }
    }

    /// Event pattern for a successful push of this environment's tag
    pub fn push_event_pattern(&self) -> Value {
        json!({
            "source": ["aws.ecr"],
            "detail-type": ["ECR Image Action"],
            "detail": {
                "action-type": ["PUSH"],
                "image-tag": [self.env.tag],
                "repository-name": [self.app.registry],
                "result": ["SUCCESS"]
            }
        })
    }

    fn stages(&self) -> Value {
        let [source, build, deploy] = STAGES;
        json!([
            {
                "Name": source,
                "Actions": [{
                    "Name": "Image",
                    "ActionTypeId": action_type("Source", "ECR"),
                    "Configuration": {
                        "RepositoryName": self.app.registry,
                        "ImageTag": self.env.tag
                    },
                    "OutputArtifacts": [{ "Name": SOURCE_ARTIFACT }],
                    "RunOrder": 1
                }]
            },
            {
                "Name": build,
                "Actions": [{
                    "Name": "ImageDefinitions",
                    "ActionTypeId": action_type("Build", "CodeBuild"),
                    "Configuration": { "ProjectName": reference("ManifestProject") },
                    "InputArtifacts": [{ "Name": SOURCE_ARTIFACT }],
                    "OutputArtifacts": [{ "Name": BUILD_ARTIFACT }],
                    "RunOrder": 1
                }]
            },
            {
                "Name": deploy,
                "Actions": [{
                    "Name": "Service",
                    "ActionTypeId": action_type("Deploy", "ECS"),
                    "Configuration": {
                        "ClusterName": import_value(&self.app.export_name(self.env, CLUSTER_NAME_EXPORT)),
                        "ServiceName": import_value(&self.app.export_name(self.env, SERVICE_NAME_EXPORT)),
                        "FileName": IMAGE_DEFINITIONS_FILE
                    },
                    "InputArtifacts": [{ "Name": BUILD_ARTIFACT }],
                    "RunOrder": 1
                }]
            }
        ])
    }
}

/// `ActionTypeId` for an AWS-owned pipeline action
pub(crate) fn action_type(category: &str, provider: &str) -> Value {
    json!({
        "Category": category,
        "Owner": "AWS",
        "Provider": provider,
        "Version": "1"
    })
}

impl StackDefinition for DeliveryPipelineStack<'_> {
    fn name(&self) -> String {
        self.app.pipeline_stack_name(self.env)
    }

    fn dependencies(&self) -> Vec<String> {
        vec![
            self.app.registry_stack_name(),
            self.app.environment_stack_name(self.env),
        ]
    }

    fn environment_label(&self) -> String {
        self.env.name.clone()
    }

    fn build(&self) -> Result<Template> {
        let app = self.app;
        let env = self.env;
        let bucket_objects = join("", vec![get_att("ArtifactBucket", "Arn"), json!("/*")]);

        let mut template = Template::new(format!(
            "{} {} delivery pipeline: registry push -> image definitions -> service deploy",
            app.name, env.name
        ));

        template.add(
            "ArtifactBucket",
            Resource::new(
                "AWS::S3::Bucket",
                json!({
                    "PublicAccessBlockConfiguration": {
                        "BlockPublicAcls": true,
                        "BlockPublicPolicy": true,
                        "IgnorePublicAcls": true,
                        "RestrictPublicBuckets": true
                    }
                }),
            ),
        )?;

        template.add(
            "ManifestRole",
            Resource::new(
                "AWS::IAM::Role",
                json!({ "AssumeRolePolicyDocument": assume_role_policy("codebuild.amazonaws.com") }),
            ),
        )?;
        template.add(
            "ManifestRolePolicy",
            Resource::new(
                "AWS::IAM::Policy",
                json!({
                    "PolicyName": format!("{}-manifest", self.name()),
                    "Roles": [reference("ManifestRole")],
                    "PolicyDocument": policy_document(vec![
                        (
                            vec!["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
                            sub("arn:aws:logs:${AWS::Region}:${AWS::AccountId}:log-group:/aws/codebuild/*"),
                        ),
                        (vec!["s3:GetObject", "s3:PutObject"], bucket_objects.clone()),
                    ])
                }),
            ),
        )?;

        let buildspec = scripts::image_definitions(app.container_name(), &env.tag).to_yaml()?;
        template.add(
            "ManifestProject",
            Resource::new(
                "AWS::CodeBuild::Project",
                json!({
                    "ServiceRole": get_att("ManifestRole", "Arn"),
                    "Source": { "Type": "CODEPIPELINE", "BuildSpec": buildspec },
                    "Artifacts": { "Type": "CODEPIPELINE" },
                    "Environment": build_environment(false, vec![
                        ("REPOSITORY_URI", json!(app.repository_uri())),
                    ])
                }),
            )
            .depends_on("ManifestRolePolicy"),
        )?;

        template.add(
            "PipelineRole",
            Resource::new(
                "AWS::IAM::Role",
                json!({ "AssumeRolePolicyDocument": assume_role_policy("codepipeline.amazonaws.com") }),
            ),
        )?;
        template.add(
            "PipelineRolePolicy",
            Resource::new(
                "AWS::IAM::Policy",
                json!({
                    "PolicyName": format!("{}-pipeline", self.name()),
                    "Roles": [reference("PipelineRole")],
                    "PolicyDocument": policy_document(vec![
                        (vec!["s3:GetObject", "s3:GetObjectVersion", "s3:PutObject"], bucket_objects),
                        (vec!["s3:GetBucketVersioning"], get_att("ArtifactBucket", "Arn")),
                        (vec!["ecr:DescribeImages"], json!("*")),
                        (vec!["codebuild:StartBuild", "codebuild:BatchGetBuilds"], get_att("ManifestProject", "Arn")),
                        (
                            vec![
                                "ecs:DescribeServices",
                                "ecs:DescribeTaskDefinition",
                                "ecs:DescribeTasks",
                                "ecs:ListTasks",
                                "ecs:RegisterTaskDefinition",
                                "ecs:UpdateService",
                            ],
                            json!("*"),
                        ),
                        (vec!["iam:PassRole"], json!("*")),
                    ])
                }),
            ),
        )?;

        template.add(
            "Pipeline",
            Resource::new(
                "AWS::CodePipeline::Pipeline",
                json!({
                    "Name": self.name(),
                    "RoleArn": get_att("PipelineRole", "Arn"),
                    "ArtifactStore": { "Type": "S3", "Location": reference("ArtifactBucket") },
                    "RestartExecutionOnUpdate": false,
                    "Stages": self.stages()
                }),
            )
            .depends_on("PipelineRolePolicy"),
        )?;

        template.add(
            "EventsRole",
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": assume_role_policy("events.amazonaws.com"),
                    "Policies": [{
                        "PolicyName": "start-pipeline",
                        "PolicyDocument": policy_document(vec![(
                            vec!["codepipeline:StartPipelineExecution"],
                            sub("arn:aws:codepipeline:${AWS::Region}:${AWS::AccountId}:${Pipeline}"),
                        )])
                    }]
                }),
            ),
        )?;
        template.add(
            "PushRule",
            Resource::new(
                "AWS::Events::Rule",
                json!({
                    "Description": format!("Start {} on a successful push of tag {}", self.name(), env.tag),
                    "EventPattern": self.push_event_pattern(),
                    "State": "ENABLED",
                    "Targets": [{
                        "Id": "Pipeline",
                        "Arn": sub("arn:aws:codepipeline:${AWS::Region}:${AWS::AccountId}:${Pipeline}"),
                        "RoleArn": get_att("EventsRole", "Arn")
                    }]
                }),
            ),
        )?;

        template.add_output(
            "PipelineName",
            Output::new(reference("Pipeline")).description("Delivery pipeline name"),
        );

        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::app::tests::sample_app;

    fn template(env: &str) -> Template {
        let app = sample_app();
        let env = app.environment(env).unwrap().clone();
        DeliveryPipelineStack::new(&app, &env)
            .synthesize()
            .unwrap()
            .template
    }

    #[test]
    fn test_three_stages_in_order() {
        let template = template("prod");
        let stages = template
            .resource("Pipeline")
            .unwrap()
            .property("Stages")
            .unwrap()
            .as_array()
            .unwrap();

        let names: Vec<&str> = stages.iter().map(|s| s["Name"].as_str().unwrap()).collect();
        assert_eq!(names, STAGES);
        for stage in stages {
            assert_eq!(stage["Actions"].as_array().unwrap().len(), 1);
        }
    }

    #[test]
    fn test_source_watches_environment_tag() {
        let template = template("dev");
        let stages = template.resource("Pipeline").unwrap().property("Stages").unwrap();
        let source = &stages[0]["Actions"][0];

        assert_eq!(source["ActionTypeId"]["Provider"], "ECR");
        assert_eq!(source["Configuration"]["RepositoryName"], "hello");
        assert_eq!(source["Configuration"]["ImageTag"], "dev");
    }

    #[test]
    fn test_deploy_targets_imported_service() {
        let template = template("prod");
        let stages = template.resource("Pipeline").unwrap().property("Stages").unwrap();
        let deploy = &stages[2]["Actions"][0];

        assert_eq!(deploy["ActionTypeId"]["Provider"], "ECS");
        assert_eq!(
            deploy["Configuration"]["ClusterName"],
            import_value("hello-prod-ClusterName")
        );
        assert_eq!(
            deploy["Configuration"]["ServiceName"],
            import_value("hello-prod-ServiceName")
        );
        assert_eq!(deploy["Configuration"]["FileName"], "imagedefinitions.json");
    }

    #[test]
    fn test_push_rule_filters_successful_push_of_tag() {
        let template = template("prod");
        let rule = template.resource("PushRule").unwrap();
        let pattern = rule.property("EventPattern").unwrap();

        assert_eq!(pattern["source"], json!(["aws.ecr"]));
        assert_eq!(pattern["detail"]["action-type"], json!(["PUSH"]));
        assert_eq!(pattern["detail"]["image-tag"], json!(["prod"]));
        assert_eq!(pattern["detail"]["result"], json!(["SUCCESS"]));
        assert_eq!(rule.property("Targets").unwrap()[0]["Id"], "Pipeline");
    }

    #[test]
    fn test_manifest_project_buildspec() {
        let template = template("prod");
        let project = template.resource("ManifestProject").unwrap();
        let buildspec = project.property("Source").unwrap()["BuildSpec"]
            .as_str()
            .unwrap();

        assert!(buildspec.contains("imagedefinitions.json"));
        assert!(buildspec.contains("CONTAINER_NAME: hello"));
        assert!(buildspec.contains("IMAGE_TAG: prod"));
    }
}
