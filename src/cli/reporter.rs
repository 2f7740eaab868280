//! Event reporters
//!
//! The `run` command drains the runner's event channel into an [`EventReporter`]. [`ConsoleReporter`] renders a
//! pytest-style report; [`JsonReporter`] writes one JSON object per event for other tools to consume.

use std::collections::HashSet;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use phpunit_protocol::{TestNode, TestProblem, TestResult};

use crate::command::Invocation;
use crate::runner::{RunFailure, RunnerEvent, Stream};

// ============================================================================
// Event Reporter Trait
// ============================================================================

/// Receives a run's events in order.
///
/// Implement the hooks to customize output; [`EventReporter::report`] dispatches to them.
pub trait EventReporter {
    /// Called once with the spawned invocation
    fn on_input(&mut self, _invocation: &Invocation) -> io::Result<()> {
        Ok(())
    }

    /// Called for every raw output line
    fn on_line(&mut self, _stream: Stream, _text: &str) -> io::Result<()> {
        Ok(())
    }

    /// Called for every decoded result
    fn on_result(&mut self, result: &TestResult) -> io::Result<()>;

    fn on_error(&mut self, _failure: &RunFailure) -> io::Result<()> {
        Ok(())
    }

    /// Called once, last
    fn on_close(&mut self, code: Option<i32>, cancelled: bool) -> io::Result<()>;

    fn report(&mut self, event: &RunnerEvent) -> io::Result<()> {
        match event {
            RunnerEvent::Input(invocation) => self.on_input(invocation),
            RunnerEvent::Line { stream, text } => self.on_line(*stream, text),
            RunnerEvent::Result(result) => self.on_result(result),
            RunnerEvent::Error(failure) => self.on_error(failure),
            RunnerEvent::Close { code, cancelled } => self.on_close(*code, *cancelled),
        }
    }
}

/// Tally of finished tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

// ============================================================================
// Console
// ============================================================================

/// Default console reporter (pytest-style)
pub struct ConsoleReporter<W = io::Stdout> {
    out: W,
    verbose: bool,
    started: Instant,
    summary: RunSummary,
    /// Tests that already reported a failure or skip; their `testFinished` is not a pass.
    settled: HashSet<(Option<String>, String)>,
    time: Option<String>,
}

impl ConsoleReporter<io::Stdout> {
    pub fn new(verbose: bool) -> Self {
        Self::with_writer(io::stdout(), verbose)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn with_writer(out: W, verbose: bool) -> Self {
        Self {
            out,
            verbose,
            started: Instant::now(),
            summary: RunSummary::default(),
            settled: HashSet::new(),
            time: None,
        }
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn label(node: &TestNode) -> &str {
        node.location.id.as_deref().unwrap_or(&node.name)
    }

    fn key(node: &TestNode) -> (Option<String>, String) {
        (node.flow_id.clone(), node.name.clone())
    }

    fn write_problem(&mut self, status: &str, problem: &TestProblem) -> io::Result<()> {
        writeln!(self.out, "{} {}", Self::label(&problem.node), status)?;
        if !problem.message.is_empty() {
            writeln!(self.out, "    {}", problem.message)?;
        }
        if let (Some(expected), Some(actual)) = (&problem.expected, &problem.actual) {
            writeln!(self.out, "    expected: {expected}")?;
            writeln!(self.out, "    actual:   {actual}")?;
        }
        for detail in &problem.details {
            writeln!(self.out, "    at {}:{}", detail.file, detail.line)?;
        }
        Ok(())
    }
}

impl<W: Write> EventReporter for ConsoleReporter<W> {
    fn on_input(&mut self, invocation: &Invocation) -> io::Result<()> {
        if self.verbose {
            writeln!(self.out, "\x1b[2m$ {invocation}\x1b[0m")?;
        }
        Ok(())
    }

    fn on_line(&mut self, stream: Stream, text: &str) -> io::Result<()> {
        match stream {
            Stream::Stderr => writeln!(self.out, "\x1b[33m{text}\x1b[0m"),
            Stream::Stdout if self.verbose => writeln!(self.out, "\x1b[2m{text}\x1b[0m"),
            Stream::Stdout => Ok(()),
        }
    }

    fn on_result(&mut self, result: &TestResult) -> io::Result<()> {
        match result {
            TestResult::TestSuiteStarted(node) if self.verbose => {
                writeln!(self.out, "\x1b[1m{}\x1b[0m", node.name)?;
            }
            TestResult::TestFailed(problem) => {
                self.summary.failed += 1;
                self.settled.insert(Self::key(&problem.node));
                self.write_problem("\x1b[31mFAILED\x1b[0m", problem)?;
            }
            TestResult::TestIgnored(problem) => {
                self.summary.skipped += 1;
                self.settled.insert(Self::key(&problem.node));
                self.write_problem("\x1b[33mSKIPPED\x1b[0m", problem)?;
            }
            TestResult::TestFinished(node) => {
                if !self.settled.remove(&Self::key(node)) {
                    self.summary.passed += 1;
                    if self.verbose {
                        let ms = node.duration.unwrap_or_default();
                        writeln!(self.out, "{} \x1b[32mPASSED\x1b[0m ({ms}ms)", Self::label(node))?;
                    }
                }
            }
            TestResult::TimeAndMemory(summary) => self.time = Some(summary.time.clone()),
            _ => {}
        }
        Ok(())
    }

    fn on_error(&mut self, failure: &RunFailure) -> io::Result<()> {
        writeln!(self.out, "\x1b[31merror:\x1b[0m {}", failure.message)
    }

    fn on_close(&mut self, code: Option<i32>, cancelled: bool) -> io::Result<()> {
        writeln!(self.out)?;
        if cancelled {
            return writeln!(self.out, "\x1b[1;33m====== cancelled ======\x1b[0m");
        }

        let mut parts = Vec::new();
        if self.summary.passed > 0 {
            parts.push(format!("\x1b[32m{} passed\x1b[0m", self.summary.passed));
        }
        if self.summary.failed > 0 {
            parts.push(format!("\x1b[31m{} failed\x1b[0m", self.summary.failed));
        }
        if self.summary.skipped > 0 {
            parts.push(format!("\x1b[33m{} skipped\x1b[0m", self.summary.skipped));
        }
        if parts.is_empty() {
            parts.push("no tests ran".to_string());
        }

        let elapsed = match &self.time {
            Some(time) => time.clone(),
            None => format!("{:.2}s", elapsed_secs(self.started.elapsed())),
        };
        write!(self.out, "====== {} in {elapsed}", parts.join(", "))?;
        match code {
            Some(0) | None => writeln!(self.out, " ======"),
            Some(code) => writeln!(self.out, " (exit code {code}) ======"),
        }
    }
}

fn elapsed_secs(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

// ============================================================================
// JSON lines
// ============================================================================

/// Writes every event as one JSON object per line.
pub struct JsonReporter<W = io::Stdout> {
    out: W,
}

impl JsonReporter<io::Stdout> {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }
}

impl Default for JsonReporter<io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> JsonReporter<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_json<T: serde::Serialize>(&mut self, value: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        writeln!(self.out)
    }
}

impl<W: Write> EventReporter for JsonReporter<W> {
    fn on_result(&mut self, result: &TestResult) -> io::Result<()> {
        self.write_json(result)
    }

    fn on_close(&mut self, code: Option<i32>, cancelled: bool) -> io::Result<()> {
        self.write_json(&RunnerEvent::Close { code, cancelled })
    }

    fn report(&mut self, event: &RunnerEvent) -> io::Result<()> {
        self.write_json(event)?;
        if event.is_close() {
            self.out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use phpunit_protocol::parser;

    fn feed<R: EventReporter>(reporter: &mut R, lines: &[&str]) {
        for line in lines {
            if let Some(result) = parser::parse(line) {
                reporter.report(&RunnerEvent::Result(result)).unwrap();
            }
        }
    }

    #[test]
    fn test_console_tallies_pass_fail_and_skip() {
        let mut reporter = ConsoleReporter::with_writer(Vec::new(), false);
        feed(
            &mut reporter,
            &[
                "##teamcity[testStarted name='a' flowId='1']",
                "##teamcity[testFinished name='a' duration='3' flowId='1']",
                "##teamcity[testStarted name='b' flowId='1']",
                "##teamcity[testFailed name='b' message='Failed asserting that false is true.' details=' /p/T.php:22|n' flowId='1']",
                "##teamcity[testFinished name='b' flowId='1']",
                "##teamcity[testStarted name='c' flowId='1']",
                "##teamcity[testIgnored name='c' message='skip' flowId='1']",
                "##teamcity[testFinished name='c' flowId='1']",
                "Time: 00:00.049, Memory: 6.00 MB",
            ],
        );
        reporter.on_close(Some(1), false).unwrap();
        assert_eq!(
            reporter.summary(),
            &RunSummary {
                passed: 1,
                failed: 1,
                skipped: 1
            }
        );

        let output = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(output.contains("b \x1b[31mFAILED\x1b[0m"));
        assert!(output.contains("    at /p/T.php:22"));
        assert!(output.contains("in 00:00.049 (exit code 1) ======"));
    }

    #[test]
    fn test_console_reports_cancellation() {
        let mut reporter = ConsoleReporter::with_writer(Vec::new(), false);
        reporter.on_close(None, true).unwrap();
        let output = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(output.contains("cancelled"));
    }

    #[test]
    fn test_json_writes_one_object_per_event() {
        let mut reporter = JsonReporter::with_writer(Vec::new());
        feed(&mut reporter, &["##teamcity[testCount count='3' flowId='8024']"]);
        reporter
            .report(&RunnerEvent::Close {
                code: Some(0),
                cancelled: false,
            })
            .unwrap();

        let output = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "result");
        assert_eq!(lines[0]["event"], "testCount");
        assert_eq!(lines[0]["count"], 3);
        assert_eq!(lines[0]["flowId"], 8024);
        assert_eq!(lines[1]["kind"], "close");
        assert_eq!(lines[1]["code"], 0);
    }
}
