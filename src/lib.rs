#![forbid(unsafe_code)]
//! PHPUnit runner
//!
//! Builds a PHPUnit invocation (locally or through a wrapper such as `docker exec`), runs it, and turns the TeamCity
//! service messages it prints into an ordered stream of typed events. Paths are translated between the caller's file
//! system and the one PHPUnit runs in, in both directions.
//!
//! The wire layer (escape codec, tokenizer, event types, parser) lives in the `phpunit_protocol` crate and is
//! re-exported here as [`protocol`].
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module enforces
//!   `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

pub mod cli;
pub mod command;
pub mod config;
pub mod paths;
pub mod runner;

pub use phpunit_protocol as protocol;

pub use command::{Command, Invocation, SpawnOptions, Strategy};
pub use config::{ConfigError, Configuration, ConfigurationSource, PathMapping};
pub use paths::PathReplacer;
pub use runner::{RunOutcome, RunnerError, RunnerEvent, TestRunner};
