//! Dockyard Core
//!
//! Typed deployment model and template synthesis for Dockyard.
//!
//! This crate contains:
//! - Domain types: application definition, environments, branch mapping
//! - Template model: CloudFormation resources, outputs and intrinsics
//! - Stacks: environment, registry, delivery pipeline and meta-pipeline
//! - Buildspecs: the shell scripts the build projects run
//! - Assembly: the synthesized output directory

pub mod assembly;
pub mod buildspec;
pub mod domain;
pub mod error;
pub mod stacks;
pub mod template;

pub use assembly::{AssemblyManifest, CloudAssembly, synthesize};
pub use error::{Result, SynthError};
