//! Self-mutating meta-pipeline
//!
//! Watches the infrastructure repository's tracked branch. Every push
//! re-synthesizes the cloud assembly, updates this pipeline from the fresh
//! template, deploys the shared registry stack, then runs one stage per
//! environment deploying its environment stack followed by its delivery
//! pipeline stack.

use serde_json::{Value, json};

use crate::buildspec::scripts;
use crate::domain::app::AppDefinition;
use crate::error::Result;
use crate::stacks::delivery::action_type;
use crate::stacks::{SHARED_ENVIRONMENT, StackDefinition, build_environment, template_file_name};
use crate::template::intrinsic::{
    assume_role_policy, get_att, join, policy_document, reference, sub,
};
use crate::template::{Output, Resource, Template};

/// Directory the synth stage writes the assembly to
pub const SYNTH_OUT_DIR: &str = "dockyard.out";

/// Stages that run before the per-environment stages
pub const FIXED_STAGES: [&str; 4] = ["Source", "Synth", "SelfMutate", "Registry"];

const SOURCE_ARTIFACT: &str = "InfraSource";
const SYNTH_ARTIFACT: &str = "SynthOutput";
const SOURCE_ACTION: &str = "GitHub";

pub struct MetaPipelineStack<'a> {
    app: &'a AppDefinition,
}

impl<'a> MetaPipelineStack<'a> {
    pub fn new(app: &'a AppDefinition) -> Self {
        Self { app }
    }

    /// CloudFormation deploy action for one synthesized stack
    fn deploy_action(&self, action_name: &str, stack_name: &str, run_order: u32) -> Value {
        json!({
            "Name": action_name,
            "ActionTypeId": action_type("Deploy", "CloudFormation"),
            "Configuration": {
                "ActionMode": "CREATE_UPDATE",
                "StackName": stack_name,
                "TemplatePath": format!("{}::{}", SYNTH_ARTIFACT, template_file_name(stack_name)),
                "Capabilities": "CAPABILITY_NAMED_IAM",
                "RoleArn": get_att("DeployRole", "Arn")
            },
            "InputArtifacts": [{ "Name": SYNTH_ARTIFACT }],
            "RunOrder": run_order
        })
    }

    fn stages(&self) -> Value {
        let app = self.app;
        let infra = &app.infra;

        let mut stages = vec![
            json!({
                "Name": FIXED_STAGES[0],
                "Actions": [{
                    "Name": SOURCE_ACTION,
                    "ActionTypeId": {
                        "Category": "Source",
                        "Owner": "ThirdParty",
                        "Provider": "GitHub",
                        "Version": "1"
                    },
                    "Configuration": {
                        "Owner": infra.repository.owner,
                        "Repo": infra.repository.repo,
                        "Branch": infra.branch,
                        "OAuthToken": infra.repository.token_reference(),
                        "PollForSourceChanges": false
                    },
                    "OutputArtifacts": [{ "Name": SOURCE_ARTIFACT }],
                    "RunOrder": 1
                }]
            }),
            json!({
                "Name": FIXED_STAGES[1],
                "Actions": [{
                    "Name": "Synth",
                    "ActionTypeId": action_type("Build", "CodeBuild"),
                    "Configuration": { "ProjectName": reference("SynthProject") },
                    "InputArtifacts": [{ "Name": SOURCE_ARTIFACT }],
                    "OutputArtifacts": [{ "Name": SYNTH_ARTIFACT }],
                    "RunOrder": 1
                }]
            }),
            json!({
                "Name": FIXED_STAGES[2],
                "Actions": [self.deploy_action("SelfMutate", &self.name(), 1)]
            }),
            json!({
                "Name": FIXED_STAGES[3],
                "Actions": [self.deploy_action("Registry", &app.registry_stack_name(), 1)]
            }),
        ];

        for env in &app.environments {
            stages.push(json!({
                "Name": stage_name(&env.name),
                "Actions": [
                    self.deploy_action("Environment", &app.environment_stack_name(env), 1),
                    self.deploy_action("Pipeline", &app.pipeline_stack_name(env), 2),
                ]
            }));
        }

        json!(stages)
    }
}

/// Pipeline stage name for an environment, e.g. `prod` -> `Prod`
pub fn stage_name(environment: &str) -> String {
    let mut chars = environment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl StackDefinition for MetaPipelineStack<'_> {
    fn name(&self) -> String {
        self.app.meta_stack_name()
    }

    fn environment_label(&self) -> String {
        SHARED_ENVIRONMENT.to_string()
    }

    fn build(&self) -> Result<Template> {
        let app = self.app;
        let bucket_objects = join("", vec![get_att("ArtifactBucket", "Arn"), json!("/*")]);
        let logs = sub("arn:aws:logs:${AWS::Region}:${AWS::AccountId}:log-group:/aws/codebuild/*");

        let mut template = Template::new(format!(
            "{} meta-pipeline: redeploys every {} stack from {}/{}@{}",
            app.name, app.name, app.infra.repository.owner, app.infra.repository.repo, app.infra.branch
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
            "SynthRole",
            Resource::new(
                "AWS::IAM::Role",
                json!({ "AssumeRolePolicyDocument": assume_role_policy("codebuild.amazonaws.com") }),
            ),
        )?;
        template.add(
            "SynthRolePolicy",
            Resource::new(
                "AWS::IAM::Policy",
                json!({
                    "PolicyName": format!("{}-synth", self.name()),
                    "Roles": [reference("SynthRole")],
                    "PolicyDocument": policy_document(vec![
                        (vec!["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"], logs),
                        (vec!["s3:GetObject", "s3:PutObject"], bucket_objects.clone()),
                    ])
                }),
            ),
        )?;

        let buildspec = scripts::synth(SYNTH_OUT_DIR).to_yaml()?;
        template.add(
            "SynthProject",
            Resource::new(
                "AWS::CodeBuild::Project",
                json!({
                    "Name": format!("{}-synth", self.name()),
                    "ServiceRole": get_att("SynthRole", "Arn"),
                    "Source": { "Type": "CODEPIPELINE", "BuildSpec": buildspec },
                    "Artifacts": { "Type": "CODEPIPELINE" },
                    "Environment": build_environment(false, vec![
                        ("AWS_ACCOUNT", json!(app.account)),
                    ])
                }),
            )
            .depends_on("SynthRolePolicy"),
        )?;

        template.add(
            "DeployRole",
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": assume_role_policy("cloudformation.amazonaws.com"),
                    "ManagedPolicyArns": ["arn:aws:iam::aws:policy/AdministratorAccess"]
                }),
            ),
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
                        (vec!["codebuild:StartBuild", "codebuild:BatchGetBuilds"], get_att("SynthProject", "Arn")),
                        (
                            vec![
                                "cloudformation:CreateStack",
                                "cloudformation:DescribeStacks",
                                "cloudformation:UpdateStack",
                            ],
                            json!("*"),
                        ),
                        (vec!["iam:PassRole"], get_att("DeployRole", "Arn")),
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
                    "RestartExecutionOnUpdate": true,
                    "Stages": self.stages()
                }),
            )
            .depends_on("PipelineRolePolicy"),
        )?;

        template.add(
            "SourceWebhook",
            Resource::new(
                "AWS::CodePipeline::Webhook",
                json!({
                    "Authentication": "GITHUB_HMAC",
                    "AuthenticationConfiguration": {
                        "SecretToken": app.infra.repository.token_reference()
                    },
                    "Filters": [{
                        "JsonPath": "$.ref",
                        "MatchEquals": "refs/heads/{Branch}"
                    }],
                    "TargetPipeline": reference("Pipeline"),
                    "TargetAction": SOURCE_ACTION,
                    "TargetPipelineVersion": get_att("Pipeline", "Version"),
                    "RegisterWithThirdParty": true
                }),
            ),
        )?;

        template.add_output(
            "PipelineName",
            Output::new(reference("Pipeline")).description("Meta-pipeline name"),
        );

        Ok(template)
    }
}
