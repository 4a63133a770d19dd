//! Network, cluster and service stack for one environment
//!
//! Declares a VPC with two public subnets, an ECS cluster, the task role and
//! its execution policy, a Fargate task definition running the environment's
//! image, a public load-balanced service and CPU/memory target-tracking
//! auto-scaling. Exports the cluster and service names for the delivery
//! pipeline and outputs the load balancer's DNS name.

use serde_json::{Value, json};

use crate::domain::app::{AppDefinition, EnvironmentConfig};
use crate::domain::scaling::AutoScalingConfig;
use crate::error::Result;
use crate::stacks::StackDefinition;
use crate::template::intrinsic::{
    assume_role_policy, get_att, get_azs, join, policy_document, reference, select, sub,
};
use crate::template::{Output, Resource, Template};

pub const CLUSTER_NAME_EXPORT: &str = "ClusterName";
pub const SERVICE_NAME_EXPORT: &str = "ServiceName";

/// Actions the task role may perform: pull from the registry and write logs
pub const TASK_ROLE_ACTIONS: &[&str] = &[
    "ecr:GetAuthorizationToken",
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:BatchGetImage",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
];

const SUBNET_COUNT: usize = 2;
const LISTENER_PORT: u16 = 80;

pub struct EnvironmentStack<'a> {
    app: &'a AppDefinition,
    env: &'a EnvironmentConfig,
    scaling: AutoScalingConfig,
}

impl<'a> EnvironmentStack<'a> {
    pub fn new(app: &'a AppDefinition, env: &'a EnvironmentConfig) -> Self {
        Self {
            app,
            env,
            scaling: AutoScalingConfig::default(),
        }
    }

    fn resource_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.name(), suffix)
    }

    fn add_network(&self, template: &mut Template) -> Result<Vec<String>> {
        let network = self.env.network()?;

        template.add(
            "Vpc",
            Resource::new(
                "AWS::EC2::VPC",
                json!({
                    "CidrBlock": network.to_string(),
                    "EnableDnsHostnames": true,
                    "EnableDnsSupport": true,
                    "Tags": [{ "Key": "Name", "Value": self.resource_name("vpc") }]
                }),
            ),
        )?;
        template.add(
            "InternetGateway",
            Resource::new("AWS::EC2::InternetGateway", json!({})),
        )?;
        template.add(
            "VpcGatewayAttachment",
            Resource::new(
                "AWS::EC2::VPCGatewayAttachment",
                json!({
                    "VpcId": reference("Vpc"),
                    "InternetGatewayId": reference("InternetGateway")
                }),
            ),
        )?;
        template.add(
            "PublicRouteTable",
            Resource::new(
                "AWS::EC2::RouteTable",
                json!({ "VpcId": reference("Vpc") }),
            ),
        )?;
        template.add(
            "PublicDefaultRoute",
            Resource::new(
                "AWS::EC2::Route",
                json!({
                    "RouteTableId": reference("PublicRouteTable"),
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "GatewayId": reference("InternetGateway")
                }),
            )
            .depends_on("VpcGatewayAttachment"),
        )?;

        let mut subnet_ids = Vec::new();
        for (index, subnet) in network.subnets(SUBNET_COUNT).iter().enumerate() {
            let subnet_id = format!("PublicSubnet{}", index + 1);
            template.add(
                &subnet_id,
                Resource::new(
                    "AWS::EC2::Subnet",
                    json!({
                        "VpcId": reference("Vpc"),
                        "CidrBlock": subnet.to_string(),
                        "AvailabilityZone": select(index, get_azs()),
                        "MapPublicIpOnLaunch": true
                    }),
                ),
            )?;
            template.add(
                &format!("{}RouteTableAssociation", subnet_id),
                Resource::new(
                    "AWS::EC2::SubnetRouteTableAssociation",
                    json!({
                        "SubnetId": reference(&subnet_id),
                        "RouteTableId": reference("PublicRouteTable")
                    }),
                ),
            )?;
            subnet_ids.push(subnet_id);
        }

        Ok(subnet_ids)
    }

    fn add_task(&self, template: &mut Template) -> Result<()> {
        let container = &self.app.container;

        template.add(
            "TaskRole",
            Resource::new(
                "AWS::IAM::Role",
                json!({ "AssumeRolePolicyDocument": assume_role_policy("ecs-tasks.amazonaws.com") }),
            ),
        )?;
        template.add(
            "TaskExecutionPolicy",
            Resource::new(
                "AWS::IAM::Policy",
                json!({
                    "PolicyName": self.resource_name("execution"),
                    "Roles": [reference("TaskRole")],
                    "PolicyDocument": policy_document(vec![(TASK_ROLE_ACTIONS.to_vec(), json!("*"))])
                }),
            ),
        )?;
        template.add(
            "LogGroup",
            Resource::new(
                "AWS::Logs::LogGroup",
                json!({
                    "LogGroupName": format!("/ecs/{}", self.name()),
                    "RetentionInDays": container.log_retention_days
                }),
            ),
        )?;
        template.add(
            "TaskDefinition",
            Resource::new(
                "AWS::ECS::TaskDefinition",
                json!({
                    "Family": self.name(),
                    "RequiresCompatibilities": ["FARGATE"],
                    "NetworkMode": "awsvpc",
                    "Cpu": container.cpu.to_string(),
                    "Memory": container.memory_mib.to_string(),
                    "ExecutionRoleArn": get_att("TaskRole", "Arn"),
                    "TaskRoleArn": get_att("TaskRole", "Arn"),
                    "ContainerDefinitions": [{
                        "Name": self.app.container_name(),
                        "Image": self.app.image_for(self.env),
                        "Essential": true,
                        "PortMappings": [{
                            "ContainerPort": container.port,
                            "Protocol": "tcp"
                        }],
                        "LogConfiguration": {
                            "LogDriver": "awslogs",
                            "Options": {
                                "awslogs-group": reference("LogGroup"),
                                "awslogs-region": reference("AWS::Region"),
                                "awslogs-stream-prefix": self.app.container_name()
                            }
                        }
                    }]
                }),
            )
            .depends_on("TaskExecutionPolicy"),
        )?;

        Ok(())
    }

    fn add_load_balanced_service(
        &self,
        template: &mut Template,
        subnet_ids: &[String],
    ) -> Result<()> {
        let port = self.app.container.port;
        let subnets: Vec<Value> = subnet_ids.iter().map(|id| reference(id)).collect();

        template.add(
            "LoadBalancerSecurityGroup",
            Resource::new(
                "AWS::EC2::SecurityGroup",
                json!({
                    "GroupDescription": format!("Public HTTP access to {}", self.name()),
                    "VpcId": reference("Vpc"),
                    "SecurityGroupIngress": [{
                        "IpProtocol": "tcp",
                        "FromPort": LISTENER_PORT,
                        "ToPort": LISTENER_PORT,
                        "CidrIp": "0.0.0.0/0"
                    }]
                }),
            ),
        )?;
        template.add(
            "ServiceSecurityGroup",
            Resource::new(
                "AWS::EC2::SecurityGroup",
                json!({
                    "GroupDescription": format!("Load balancer access to {} tasks", self.name()),
                    "VpcId": reference("Vpc"),
                    "SecurityGroupIngress": [{
                        "IpProtocol": "tcp",
                        "FromPort": port,
                        "ToPort": port,
                        "SourceSecurityGroupId": get_att("LoadBalancerSecurityGroup", "GroupId")
                    }]
                }),
            ),
        )?;
        template.add(
            "LoadBalancer",
            Resource::new(
                "AWS::ElasticLoadBalancingV2::LoadBalancer",
                json!({
                    "Type": "application",
                    "Scheme": "internet-facing",
                    "Subnets": subnets,
                    "SecurityGroups": [get_att("LoadBalancerSecurityGroup", "GroupId")]
                }),
            )
            .depends_on("PublicDefaultRoute"),
        )?;
        template.add(
            "TargetGroup",
            Resource::new(
                "AWS::ElasticLoadBalancingV2::TargetGroup",
                json!({
                    "Port": port,
                    "Protocol": "HTTP",
                    "TargetType": "ip",
                    "VpcId": reference("Vpc"),
                    "HealthCheckPath": "/"
                }),
            ),
        )?;
        template.add(
            "Listener",
            Resource::new(
                "AWS::ElasticLoadBalancingV2::Listener",
                json!({
                    "LoadBalancerArn": reference("LoadBalancer"),
                    "Port": LISTENER_PORT,
                    "Protocol": "HTTP",
                    "DefaultActions": [{
                        "Type": "forward",
                        "TargetGroupArn": reference("TargetGroup")
                    }]
                }),
            ),
        )?;
        template.add(
            "Cluster",
            Resource::new(
                "AWS::ECS::Cluster",
                json!({ "ClusterName": self.name() }),
            ),
        )?;
        template.add(
            "Service",
            Resource::new(
                "AWS::ECS::Service",
                json!({
                    "Cluster": reference("Cluster"),
                    "LaunchType": "FARGATE",
                    "DesiredCount": self.env.desired_count,
                    "TaskDefinition": reference("TaskDefinition"),
                    "NetworkConfiguration": {
                        "AwsvpcConfiguration": {
                            "AssignPublicIp": "ENABLED",
                            "Subnets": subnet_ids.iter().map(|id| reference(id)).collect::<Vec<_>>(),
                            "SecurityGroups": [get_att("ServiceSecurityGroup", "GroupId")]
                        }
                    },
                    "LoadBalancers": [{
                        "ContainerName": self.app.container_name(),
                        "ContainerPort": port,
                        "TargetGroupArn": reference("TargetGroup")
                    }]
                }),
            )
            .depends_on("Listener"),
        )?;

        Ok(())
    }

    fn add_auto_scaling(&self, template: &mut Template) -> Result<()> {
        let scaling = &self.scaling;

        template.add(
            "ScalableTarget",
            Resource::new(
                "AWS::ApplicationAutoScaling::ScalableTarget",
                json!({
                    "MinCapacity": scaling.min_capacity,
                    "MaxCapacity": scaling.max_capacity,
                    "ResourceId": join("/", vec![
                        json!("service"),
                        reference("Cluster"),
                        get_att("Service", "Name"),
                    ]),
                    "ScalableDimension": "ecs:service:DesiredCount",
                    "ServiceNamespace": "ecs",
                    "RoleARN": sub("arn:aws:iam::${AWS::AccountId}:role/aws-service-role/ecs.application-autoscaling.amazonaws.com/AWSServiceRoleForApplicationAutoScaling_ECSService")
                }),
            ),
        )?;

        for (logical_id, metric, target) in [
            (
                "CpuScalingPolicy",
                "ECSServiceAverageCPUUtilization",
                scaling.cpu_target_percent,
            ),
            (
                "MemoryScalingPolicy",
                "ECSServiceAverageMemoryUtilization",
                scaling.memory_target_percent,
            ),
        ] {
            template.add(
                logical_id,
                Resource::new(
                    "AWS::ApplicationAutoScaling::ScalingPolicy",
                    json!({
                        "PolicyName": self.resource_name(logical_id),
                        "PolicyType": "TargetTrackingScaling",
                        "ScalingTargetId": reference("ScalableTarget"),
                        "TargetTrackingScalingPolicyConfiguration": {
                            "TargetValue": target,
                            "ScaleInCooldown": scaling.scale_in_cooldown.as_secs(),
                            "ScaleOutCooldown": scaling.scale_out_cooldown.as_secs(),
                            "PredefinedMetricSpecification": {
                                "PredefinedMetricType": metric
                            }
                        }
                    }),
                ),
            )?;
        }

        Ok(())
    }
}

impl StackDefinition for EnvironmentStack<'_> {
    fn name(&self) -> String {
        self.app.environment_stack_name(self.env)
    }

    fn dependencies(&self) -> Vec<String> {
        vec![self.app.registry_stack_name()]
    }

    fn environment_label(&self) -> String {
        self.env.name.clone()
    }

    fn build(&self) -> Result<Template> {
        let mut template = Template::new(format!(
            "{} {} environment: network, cluster and load-balanced service",
            self.app.name, self.env.name
        ));

        let subnet_ids = self.add_network(&mut template)?;
        self.add_task(&mut template)?;
        self.add_load_balanced_service(&mut template, &subnet_ids)?;
        self.add_auto_scaling(&mut template)?;

        template.add_output(
            "LoadBalancerDNS",
            Output::new(get_att("LoadBalancer", "DNSName"))
                .description("Public DNS name of the load balancer"),
        );
        template.add_output(
            CLUSTER_NAME_EXPORT,
            Output::new(reference("Cluster"))
                .exported_as(&self.app.export_name(self.env, CLUSTER_NAME_EXPORT)),
        );
        template.add_output(
            SERVICE_NAME_EXPORT,
            Output::new(get_att("Service", "Name"))
                .exported_as(&self.app.export_name(self.env, SERVICE_NAME_EXPORT)),
        );

        Ok(template)
    }
}
