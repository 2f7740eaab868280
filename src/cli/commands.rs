//! Command implementations for the CLI.
//!
//! Each command returns `CliResult<ExitCode>`; only `cli::run()` exits the process.

use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use phpunit_protocol::parser;
use tokio::sync::mpsc;

use super::reporter::{ConsoleReporter, EventReporter, JsonReporter};
use super::{CliError, CliResult, ExitCode, InvocationArgs};
use crate::command::{Command, SpawnOptions, Strategy};
use crate::config::Configuration;
use crate::runner::{RunOutcome, RunnerEvent, TestRunner};

/// Build the [`Command`] described by the shared `run`/`command` arguments.
pub fn build_command(args: &InvocationArgs) -> CliResult<Command> {
    let configuration = match &args.config {
        Some(path) => Configuration::load(path).map_err(|e| CliError::failure(format!("Error: {e}")))?,
        None => Configuration::default(),
    };
    let cwd = resolve_cwd(args.cwd.as_deref())?;
    let strategy = if args.remote { Strategy::Remote } else { Strategy::Local };

    let options = args
        .env
        .iter()
        .fold(SpawnOptions::new(cwd), |options, (key, value)| options.with_env(key, value));

    Ok(Command::new(strategy, configuration, options).with_arguments(join_arguments(&args.args)))
}

/// `phpunit-runner run`
pub fn run_tests(args: &InvocationArgs, json: bool, verbose: bool) -> CliResult<ExitCode> {
    let command = build_command(args)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::failure(format!("Error starting async runtime: {e}")))?;

    let outcome = if json {
        runtime.block_on(drive(command, JsonReporter::new()))
    } else {
        runtime.block_on(drive(command, ConsoleReporter::new(verbose)))
    }?;

    Ok(exit_code(outcome))
}

/// `phpunit-runner command`
pub fn print_command(args: &InvocationArgs, json: bool) -> CliResult<ExitCode> {
    let invocation = build_command(args)?.apply();
    if json {
        let rendered = serde_json::to_string_pretty(&invocation)
            .map_err(|e| CliError::failure(format!("Error serializing invocation: {e}")))?;
        println!("{rendered}");
    } else {
        println!("{invocation}");
    }
    Ok(ExitCode::SUCCESS)
}

/// `phpunit-runner parse`
pub fn parse_output(file: Option<&Path>) -> CliResult<ExitCode> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let decoded = match file {
        Some(path) => {
            let source = fs::read_to_string(path)
                .map_err(|e| CliError::failure(format!("Error reading {}: {e}", path.display())))?;
            decode_lines(source.lines().map(|line| Ok(line.to_string())), &mut out)
        }
        None => decode_lines(io::stdin().lock().lines(), &mut out),
    };
    decoded.map_err(|e| CliError::failure(format!("Error: {e}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Write every decodable line as one JSON object; other lines are skipped.
fn decode_lines<I, W>(lines: I, out: &mut W) -> io::Result<()>
where
    I: IntoIterator<Item = io::Result<String>>,
    W: Write,
{
    for line in lines {
        if let Some(result) = parser::parse(&line?) {
            serde_json::to_writer(&mut *out, &result)?;
            writeln!(out)?;
        }
    }
    out.flush()
}

/// Run `command` while draining its events into `reporter`. Ctrl-C cancels the run.
async fn drive<R: EventReporter>(command: Command, mut reporter: R) -> CliResult<RunOutcome> {
    let runner = TestRunner::new();
    let cancel = runner.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let (events, mut received) = mpsc::unbounded_channel::<RunnerEvent>();
    let producer = async move {
        let outcome = runner.run(&command, &events).await;
        drop(events);
        outcome
    };
    let consumer = async move {
        while let Some(event) = received.recv().await {
            reporter.report(&event)?;
        }
        Ok::<(), io::Error>(())
    };

    let (outcome, reported) = tokio::join!(producer, consumer);
    interrupt.abort();
    reported.map_err(|e| CliError::failure(format!("Error writing report: {e}")))?;
    Ok(outcome)
}

/// The child's exit code; 130 after Ctrl-C, 1 when it never produced one.
fn exit_code(outcome: RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome { code: Some(code), .. } => ExitCode(code),
        RunOutcome { cancelled: true, .. } => ExitCode::INTERRUPTED,
        RunOutcome { .. } => ExitCode::FAILURE,
    }
}

fn resolve_cwd(cwd: Option<&Path>) -> CliResult<PathBuf> {
    match cwd {
        Some(dir) => Ok(dir.to_path_buf()),
        None => env::current_dir().map_err(|e| CliError::failure(format!("Error reading current directory: {e}"))),
    }
}

/// Re-join CLI tokens into one argument string, quoting tokens the tokenizer would otherwise split.
fn join_arguments(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains(['"', '\'']) {
                if arg.contains('\'') {
                    format!("\"{arg}\"")
                } else {
                    format!("'{arg}'")
                }
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use phpunit_protocol::argv;

    #[test]
    fn test_join_arguments_survives_tokenizing() {
        let args = vec![
            "tests/My Test.php".to_string(),
            "--filter".to_string(),
            "it's".to_string(),
            "--group=a".to_string(),
        ];
        assert_eq!(argv::split(&join_arguments(&args)), args);
    }

    #[test]
    fn test_exit_code_prefers_child_code() {
        assert_eq!(exit_code(RunOutcome { code: Some(2), cancelled: false }), ExitCode(2));
        assert_eq!(exit_code(RunOutcome { code: None, cancelled: true }), ExitCode::INTERRUPTED);
        assert_eq!(exit_code(RunOutcome::default()), ExitCode::FAILURE);
    }

    #[test]
    fn test_build_command_uses_remote_strategy_and_cwd() {
        let args = InvocationArgs {
            cwd: Some(PathBuf::from("/host/proj")),
            remote: true,
            args: vec!["tests".into()],
            ..Default::default()
        };
        let command = build_command(&args).unwrap();
        assert_eq!(command.strategy(), Strategy::Remote);
        assert_eq!(command.apply().options.cwd, PathBuf::from("/host/proj"));
    }

    #[test]
    fn test_build_command_passes_env_to_spawn_options() {
        let args = InvocationArgs {
            cwd: Some(PathBuf::from("/host/proj")),
            env: vec![("XDEBUG_MODE".into(), "coverage".into())],
            ..Default::default()
        };
        let options = build_command(&args).unwrap().apply().options;
        assert_eq!(options.env, vec![("XDEBUG_MODE".to_string(), "coverage".to_string())]);
    }

    #[test]
    fn test_decode_lines_skips_noise() {
        let lines = ["PHPUnit 10.5.3 by Sebastian Bergmann and contributors.", "", "noise", "##teamcity[testCount count='2']"]
            .map(|line| Ok(line.to_string()));
        let mut out = Vec::new();
        decode_lines(lines, &mut out).unwrap();
        let output = String::from_utf8(out).unwrap();
        assert_eq!(output.lines().count(), 2);
        assert!(output.contains(r#""event":"testVersion""#));
        assert!(output.contains(r#""event":"testCount""#));
    }
}
