//! Wire layer for PHPUnit's `--teamcity` output: escape codec, shell-style argument parsing, typed events, and the
//! line classifier that turns raw output into those events.
//!
//! This crate is dependency-light and does no I/O. It is shared by the process runner, the CLI `parse` command, and the
//! fuzz target.
//!
//! ## Notes
//! - Parsing is stateless and line-oriented: one call per complete output line.
//! - Malformed sub-fields (a detail line, a location hint) never fail the whole line. They are left absent and
//!   recorded on the event's `decode_errors`.
//!
//! ## Examples
//! ```rust
//! use phpunit_protocol::{parser, EventKind};
//!
//! let event = parser::parse("##teamcity[testCount count='3' flowId='8024']").unwrap();
//! assert_eq!(event.kind(), EventKind::TestCount);
//! ```

pub mod argv;
pub mod errors;
pub mod escape;
pub mod events;
pub mod parser;

pub use argv::{OptionValue, ParsedArguments};
pub use errors::ProtocolError;
pub use events::{
    ConfigurationInfo, Detail, EventKind, Location, ResultSummary, RuntimeInfo, TestCount, TestNode, TestProblem,
    TestResult, TimeAndMemory, UnknownMessage, VersionInfo,
};
