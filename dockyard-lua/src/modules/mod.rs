//! Modules a definition file can use besides `app`
//!
//! Both are generic over where their data goes or comes from, so the CLI and
//! the tests can plug in their own backends.

pub mod env;
pub mod log;

pub use env::{EnvModule, VarProvider};
pub use log::{LogLevel, LogModule, LogSink};
