//! Manifest command handler
//!
//! Writes the `imagedefinitions.json` a deploy action consumes, the same file
//! the delivery pipeline's build stage produces.

use anyhow::{Context, Result, bail};
use colored::*;
use dockyard_core::domain::ImageManifest;
use dockyard_core::domain::branch::is_valid_image_tag;
use std::path::Path;

pub fn write_manifest(
    container: &str,
    repository_uri: &str,
    tag: &str,
    output: &Path,
) -> Result<()> {
    if container.is_empty() {
        bail!("Container name must not be empty");
    }
    if !is_valid_image_tag(tag) {
        bail!("'{}' is not a valid image tag", tag);
    }

    let manifest = ImageManifest::new(container, repository_uri, tag);
    std::fs::write(output, manifest.to_json()?)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} {} -> {}",
        "✓".green().bold(),
        output.display(),
        manifest.entries()[0].image_uri.cyan()
    );

    Ok(())
}
