//! Core domain types
//!
//! This module contains the configuration records that describe one deployable
//! application: its environments, its container, its branch mapping and the
//! fixed scaling policy shared by every environment. These types are built by
//! the Lua definition loader and consumed by the stack constructors.

pub mod app;
pub mod branch;
pub mod manifest;
pub mod network;
pub mod scaling;

pub use app::{AppDefinition, ContainerSpec, EnvironmentConfig, GitSource, InfraSource};
pub use branch::{BranchMapping, BranchRule};
pub use manifest::{ImageDefinition, ImageManifest};
pub use network::Ipv4Cidr;
pub use scaling::AutoScalingConfig;
