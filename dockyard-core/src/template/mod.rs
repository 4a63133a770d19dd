//! Template model
//!
//! A minimal typed representation of a CloudFormation template: resources keyed
//! by logical id, plus outputs and exports. Resource properties stay as JSON
//! values; the stack constructors are responsible for their shape.

pub mod intrinsic;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::error::{Result, SynthError};

pub const FORMAT_VERSION: &str = "2010-09-09";

/// Resource types that accept a `Tags: [{Key, Value}]` property
const TAGGABLE_TYPES: &[&str] = &[
    "AWS::CodeBuild::Project",
    "AWS::CodePipeline::Pipeline",
    "AWS::EC2::InternetGateway",
    "AWS::EC2::RouteTable",
    "AWS::EC2::SecurityGroup",
    "AWS::EC2::Subnet",
    "AWS::EC2::VPC",
    "AWS::ECR::Repository",
    "AWS::ECS::Cluster",
    "AWS::ECS::Service",
    "AWS::ECS::TaskDefinition",
    "AWS::ElasticLoadBalancingV2::LoadBalancer",
    "AWS::ElasticLoadBalancingV2::TargetGroup",
    "AWS::IAM::Role",
    "AWS::Logs::LogGroup",
    "AWS::S3::Bucket",
];

/// One declared resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(resource_type: &str, properties: Value) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            properties,
            depends_on: Vec::new(),
        }
    }

    /// Adds an explicit ordering dependency on another resource
    pub fn depends_on(mut self, logical_id: &str) -> Self {
        self.depends_on.push(logical_id.to_string());
        self
    }

    pub fn is_taggable(&self) -> bool {
        TAGGABLE_TYPES.contains(&self.resource_type.as_str())
    }

    /// Property lookup by name
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// A cross-stack export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Export {
    pub name: Value,
}

/// A stack output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

impl Output {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            description: None,
            export: None,
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn exported_as(mut self, name: &str) -> Self {
        self.export = Some(Export { name: json!(name) });
        self
    }
}

/// A complete template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub resources: BTreeMap<String, Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: Some(description.into()),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Declares a resource; logical ids must be unique within the template
    pub fn add(&mut self, logical_id: &str, resource: Resource) -> Result<()> {
        if self.resources.contains_key(logical_id) {
            return Err(SynthError::DuplicateLogicalId(logical_id.to_string()));
        }
        self.resources.insert(logical_id.to_string(), resource);
        Ok(())
    }

    pub fn add_output(&mut self, name: &str, output: Output) {
        self.outputs.insert(name.to_string(), output);
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    /// Logical ids and resources of one type
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, resource)| resource.resource_type == resource_type)
    }

    /// Applies stack-level tags to every taggable resource
    ///
    /// Tags already present on a resource are kept unless the stack sets the
    /// same key.
    pub fn apply_tags(&mut self, tags: &BTreeMap<String, String>) {
        if tags.is_empty() {
            return;
        }

        for resource in self.resources.values_mut() {
            if !resource.is_taggable() {
                continue;
            }

            let mut merged: BTreeMap<String, Value> = resource
                .properties
                .get("Tags")
                .and_then(Value::as_array)
                .map(|existing| {
                    existing
                        .iter()
                        .filter_map(|tag| {
                            let key = tag.get("Key")?.as_str()?.to_string();
                            Some((key, tag.get("Value")?.clone()))
                        })
                        .collect()
                })
                .unwrap_or_default();

            for (key, value) in tags {
                merged.insert(key.clone(), json!(value));
            }

            let tag_list: Vec<Value> = merged
                .into_iter()
                .map(|(key, value)| json!({ "Key": key, "Value": value }))
                .collect();

            if resource.properties.is_null() {
                resource.properties = json!({});
            }
            if let Some(properties) = resource.properties.as_object_mut() {
                properties.insert("Tags".to_string(), Value::Array(tag_list));
            }
        }
    }

    /// Checks that every `DependsOn`, `Ref` and `Fn::GetAtt` target exists
    pub fn check_references(&self) -> Result<()> {
        for (id, resource) in &self.resources {
            for dependency in &resource.depends_on {
                if !self.resources.contains_key(dependency) {
                    return Err(SynthError::invalid(format!(
                        "resource '{}' depends on unknown resource '{}'",
                        id, dependency
                    )));
                }
            }

            let mut targets = Vec::new();
            collect_references(&resource.properties, &mut targets);
            for target in targets {
                if !target.starts_with("AWS::") && !self.resources.contains_key(target) {
                    return Err(SynthError::invalid(format!(
                        "resource '{}' references unknown resource '{}'",
                        id, target
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn collect_references<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(target)) = map.get("Ref") {
                out.push(target);
            }
            if let Some(target) = map
                .get("Fn::GetAtt")
                .and_then(|v| v.get(0))
                .and_then(Value::as_str)
            {
                out.push(target);
            }
            map.values().for_each(|v| collect_references(v, out));
        }
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::intrinsic::{get_att, reference};
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let mut template = Template::new("Test stack");
        template
            .add(
                "Bucket",
                Resource::new("AWS::S3::Bucket", json!({ "BucketName": "b" })),
            )
            .unwrap();
        template.add_output(
            "BucketName",
            Output::new(reference("Bucket")).exported_as("test-BucketName"),
        );

        let value = serde_json::to_value(&template).unwrap();
        assert_eq!(value["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(value["Resources"]["Bucket"]["Type"], "AWS::S3::Bucket");
        assert!(value["Resources"]["Bucket"].get("DependsOn").is_none());
        assert_eq!(
            value["Outputs"]["BucketName"]["Export"]["Name"],
            "test-BucketName"
        );
    }

    #[test]
    fn test_duplicate_logical_id() {
        let mut template = Template::new("dup");
        template
            .add("A", Resource::new("AWS::S3::Bucket", Value::Null))
            .unwrap();
        let err = template
            .add("A", Resource::new("AWS::S3::Bucket", Value::Null))
            .unwrap_err();
        assert!(matches!(err, SynthError::DuplicateLogicalId(id) if id == "A"));
    }

    #[test]
    fn test_apply_tags_merges() {
        let mut template = Template::new("tags");
        template
            .add(
                "Vpc",
                Resource::new(
                    "AWS::EC2::VPC",
                    json!({ "Tags": [{ "Key": "Name", "Value": "main" }] }),
                ),
            )
            .unwrap();
        template
            .add(
                "Route",
                Resource::new("AWS::EC2::Route", json!({ "RouteTableId": "x" })),
            )
            .unwrap();

        let tags = BTreeMap::from([("environment".to_string(), "prod".to_string())]);
        template.apply_tags(&tags);

        let vpc_tags = template.resource("Vpc").unwrap().property("Tags").unwrap();
        assert_eq!(
            vpc_tags,
            &json!([
                { "Key": "Name", "Value": "main" },
                { "Key": "environment", "Value": "prod" }
            ])
        );
        assert!(template.resource("Route").unwrap().property("Tags").is_none());
    }

    #[test]
    fn test_check_references() {
        let mut template = Template::new("refs");
        template
            .add(
                "Role",
                Resource::new("AWS::IAM::Role", json!({ "Path": "/" })),
            )
            .unwrap();
        template
            .add(
                "Project",
                Resource::new(
                    "AWS::CodeBuild::Project",
                    json!({ "ServiceRole": get_att("Role", "Arn"), "Region": reference("AWS::Region") }),
                ),
            )
            .unwrap();
        assert!(template.check_references().is_ok());

        template
            .add(
                "Broken",
                Resource::new("AWS::S3::Bucket", json!({ "X": reference("Missing") })),
            )
            .unwrap();
        assert!(template.check_references().is_err());
    }
}
