//! Configuration module
//!
//! Settings shared by every command, taken from global flags or their
//! environment variables.

use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the application's `deploy.lua`
    pub definition: PathBuf,
    /// Where `synth` writes the cloud assembly
    pub out_dir: PathBuf,
}
