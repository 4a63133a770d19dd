//! Dockyard Lua definitions
//!
//! Applications are described in a `deploy.lua` file. This crate provides:
//! - Module trait and registry for the globals a definition can use
//! - A restricted sandbox with the `app` helper module
//! - `log` and `env` modules
//! - Parsing of the returned table into an `AppDefinition`
//! - Stub generation for editor completion

pub mod module;
pub mod modules;
pub mod parser;
pub mod sandbox;

pub use module::{DefinitionModule, ModuleMetadata, ModuleRegistry};
pub use modules::{EnvModule, LogLevel, LogModule, LogSink, VarProvider};
pub use parser::{load_definition, parse_app_definition};
pub use sandbox::{app_stubs, create_sandbox};
