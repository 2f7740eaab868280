//! CLI module for the PHPUnit runner
//!
//! ## Commands
//!
//! - `run [ARGS]...` - Run PHPUnit and report its results
//! - `command [ARGS]...` - Print the invocation `run` would spawn
//! - `parse [FILE]` - Decode captured PHPUnit output (or stdin)
//!
//! ## Modules
//!
//! - `commands` - Command implementations
//! - `reporter` - Console and JSON event reporters
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;
pub mod reporter;

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
    /// Conventional code for a run interrupted by Ctrl-C.
    pub const INTERRUPTED: ExitCode = ExitCode(130);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Run PHPUnit and decode its TeamCity output
#[derive(Parser, Debug)]
#[command(name = "phpunit-runner")]
#[command(version = VERSION)]
#[command(about = "Run PHPUnit and decode its TeamCity output", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run PHPUnit and report its results
    Run {
        #[command(flatten)]
        invocation: InvocationArgs,
        /// Print one JSON event per line instead of a console report
        #[arg(long)]
        json: bool,
        /// Also print raw output lines and the spawned command
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the invocation `run` would spawn, without running it
    Command {
        #[command(flatten)]
        invocation: InvocationArgs,
        /// Print the invocation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode captured PHPUnit output into JSON events
    Parse {
        /// File to read (default: stdin)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

/// Arguments shared by `run` and `command`.
#[derive(Args, Debug, Clone, Default)]
pub struct InvocationArgs {
    /// JSON configuration file (php, phpunit, command, paths, args, reservedOptions)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Working directory of the spawned process (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,
    /// Pass the PHPUnit command line to the configured wrapper as one argument
    #[arg(long)]
    pub remote: bool,
    /// Extra environment variable for the spawned process (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<(String, String)>,
    /// Arguments forwarded to PHPUnit (files, --filter, ...)
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

fn parse_env(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the CLI command and return result.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Command::Run {
            invocation,
            json,
            verbose,
        } => commands::run_tests(&invocation, json, verbose),
        Command::Command { invocation, json } => commands::print_command(&invocation, json),
        Command::Parse { file } => commands::parse_output(file.as_deref()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run_forwards_hyphen_arguments() {
        let cli = Cli::try_parse_from([
            "phpunit-runner",
            "run",
            "--remote",
            "--config",
            "runner.json",
            "tests/FooTest.php",
            "--filter",
            "test_passed",
        ])
        .unwrap();
        let Command::Run { invocation, json, .. } = cli.command else {
            panic!("Expected Run command");
        };
        assert!(invocation.remote);
        assert!(!json);
        assert_eq!(invocation.config, Some(PathBuf::from("runner.json")));
        assert_eq!(invocation.args, vec!["tests/FooTest.php", "--filter", "test_passed"]);
    }

    #[test]
    fn test_cli_parse_command_json() {
        let cli = Cli::try_parse_from(["phpunit-runner", "command", "--json", "--cwd", "/p"]).unwrap();
        let Command::Command { invocation, json } = cli.command else {
            panic!("Expected Command command");
        };
        assert!(json);
        assert_eq!(invocation.cwd, Some(PathBuf::from("/p")));
        assert!(invocation.args.is_empty());
    }

    #[test]
    fn test_cli_parse_parse_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["phpunit-runner", "parse"]).unwrap();
        assert!(matches!(cli.command, Command::Parse { file: None }));
    }

    #[test]
    fn test_cli_parse_repeated_env() {
        let cli = Cli::try_parse_from([
            "phpunit-runner",
            "command",
            "--env",
            "XDEBUG_MODE=coverage",
            "--env",
            "APP_ENV=testing=1",
        ])
        .unwrap();
        let Command::Command { invocation, .. } = cli.command else {
            panic!("Expected Command command");
        };
        assert_eq!(
            invocation.env,
            vec![
                ("XDEBUG_MODE".to_string(), "coverage".to_string()),
                ("APP_ENV".to_string(), "testing=1".to_string()),
            ]
        );
        assert!(Cli::try_parse_from(["phpunit-runner", "command", "--env", "=x"]).is_err());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["phpunit-runner"]).is_err());
    }
}
