//! Image definitions manifest
//!
//! The delivery pipeline's build stage hands this file to the deploy stage. It
//! names the container to update and the image it should run.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// File name the ECS deploy action reads
pub const IMAGE_DEFINITIONS_FILE: &str = "imagedefinitions.json";

/// One container-to-image entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    pub name: String,
    #[serde(rename = "imageUri")]
    pub image_uri: String,
}

/// `imagedefinitions.json` contents
///
/// Always a single-entry array in practice; the deploy action accepts a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageManifest(Vec<ImageDefinition>);

impl ImageManifest {
    /// Manifest pointing one container at `<repository_uri>:<tag>`
    pub fn new(container: &str, repository_uri: &str, tag: &str) -> Self {
        Self(vec![ImageDefinition {
            name: container.to_string(),
            image_uri: format!("{}:{}", repository_uri, tag),
        }])
    }

    pub fn entries(&self) -> &[ImageDefinition] {
        &self.0
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
