//! CloudFormation intrinsic functions
//!
//! Each helper returns the JSON form of the function so it can be dropped
//! straight into a `serde_json::json!` properties block.

use serde_json::{Value, json};

/// `{"Ref": logical_id}`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [logical_id, attribute]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{"Fn::Sub": template}`
pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

/// `{"Fn::Join": [delimiter, parts]}`
pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

/// `{"Fn::ImportValue": export_name}`
pub fn import_value(export_name: &str) -> Value {
    json!({ "Fn::ImportValue": export_name })
}

/// `{"Fn::Select": [index, list]}`
pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index, list] })
}

/// Availability zones of the deployment region
pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

/// IAM trust policy allowing a service principal to assume a role
pub fn assume_role_policy(service: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole"
        }]
    })
}

/// IAM policy document from `(actions, resource)` statements
pub fn policy_document(statements: Vec<(Vec<&str>, Value)>) -> Value {
    let statements: Vec<Value> = statements
        .into_iter()
        .map(|(actions, resource)| {
            json!({
                "Effect": "Allow",
                "Action": actions,
                "Resource": resource
            })
        })
        .collect();

    json!({ "Version": "2012-10-17", "Statement": statements })
}
