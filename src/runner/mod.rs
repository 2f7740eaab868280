//! Test runner
//!
//! Owns one child process per run: spawns the built [`Invocation`], reads stdout and stderr concurrently, frames the
//! chunks into lines, decodes stdout lines into [`TestResult`]s and publishes everything as a single ordered stream of
//! [`RunnerEvent`]s on an `mpsc` channel.
//!
//! ## Event order
//!
//! ```text
//! input, (line | result)*, [error], close
//! ```
//!
//! - Each `result` directly follows the `line` it was decoded from.
//! - stderr lines are only ever `line` events.
//! - `close` is always the last event and is sent exactly once, including after a spawn failure or a cancellation.
//! - A non-zero exit code is data on `close`, not an `error`.
//!
//! ## Module Structure
//!
//! - `buffer`: newline framing of pipe chunks
//! - `process`: the spawner seam and its `tokio::process` implementation

mod buffer;
mod process;

pub use buffer::LineBuffer;
pub use process::{ChildProcess, ExitState, OutputStream, ProcessChild, ProcessSpawner, SpawnedProcess, Spawner};

use std::fmt;
use std::io;

use phpunit_protocol::{TestResult, parser};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::command::{Command, Invocation};

const READ_CHUNK_SIZE: usize = 8 * 1024;

// ============================================================================
// Events
// ============================================================================

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => write!(f, "stdout"),
            Stream::Stderr => write!(f, "stderr"),
        }
    }
}

/// One entry of a run's event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RunnerEvent {
    /// The exact invocation handed to the spawner.
    Input(Invocation),
    /// A raw output line, without its terminator.
    Line { stream: Stream, text: String },
    /// A decoded stdout line, paths already mapped back to local.
    Result(TestResult),
    Error(RunFailure),
    /// Terminal event. `code` is `None` when the process never started, was signaled, or was cancelled.
    Close { code: Option<i32>, cancelled: bool },
}

impl RunnerEvent {
    pub fn is_close(&self) -> bool {
        matches!(self, RunnerEvent::Close { .. })
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed reading {stream}: {source}")]
    Read {
        stream: Stream,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for the process: {0}")]
    Wait(#[source] io::Error),

    #[error("process was terminated by a signal")]
    Signaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    Spawn,
    Io,
    Signaled,
}

/// Serializable form of a [`RunnerError`] carried by [`RunnerEvent::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&RunnerError> for RunFailure {
    fn from(error: &RunnerError) -> Self {
        let kind = match error {
            RunnerError::Spawn { .. } => FailureKind::Spawn,
            RunnerError::Read { .. } | RunnerError::Wait(_) => FailureKind::Io,
            RunnerError::Signaled => FailureKind::Signaled,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// Summary returned once the run has closed. Mirrors the `close` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOutcome {
    pub code: Option<i32>,
    pub cancelled: bool,
}

// ============================================================================
// Runner
// ============================================================================

/// Drives one run. Cancellation is sticky: once [`TestRunner::cancel`] is called the runner should not be reused.
#[derive(Debug)]
pub struct TestRunner<S = ProcessSpawner> {
    spawner: S,
    cancel: CancellationToken,
}

impl Default for TestRunner<ProcessSpawner> {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner<ProcessSpawner> {
    pub fn new() -> Self {
        Self::with_spawner(ProcessSpawner)
    }
}

impl<S: Spawner> TestRunner<S> {
    pub fn with_spawner(spawner: S) -> Self {
        Self {
            spawner,
            cancel: CancellationToken::new(),
        }
    }

    /// A handle that cancels this runner from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run `command` to completion, sending every event to `events`.
    ///
    /// Never fails: spawn errors, read errors and abnormal exits are reported as [`RunnerEvent::Error`] followed by
    /// [`RunnerEvent::Close`]. A dropped receiver does not stop the run.
    #[tracing::instrument(skip_all, fields(strategy = ?command.strategy()))]
    pub async fn run(&self, command: &Command, events: &mpsc::UnboundedSender<RunnerEvent>) -> RunOutcome {
        let invocation = command.apply();
        emit(events, RunnerEvent::Input(invocation.clone()));

        let SpawnedProcess { mut child, stdout, stderr } = match self.spawner.spawn(&invocation) {
            Ok(spawned) => spawned,
            Err(source) => {
                let error = RunnerError::Spawn {
                    command: invocation.command.clone(),
                    source,
                };
                tracing::warn!(%error, "test runner did not start");
                emit(events, RunnerEvent::Error(RunFailure::from(&error)));
                return close(events, RunOutcome::default());
            }
        };

        let mut stdout = OutputReader::new(Stream::Stdout, stdout);
        let mut stderr = OutputReader::new(Stream::Stderr, stderr);

        let mut cancelled = false;
        while stdout.is_open() || stderr.is_open() {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                read = stdout.read_lines(), if stdout.is_open() => {
                    self.forward(command, Stream::Stdout, read, events);
                }
                read = stderr.read_lines(), if stderr.is_open() => {
                    self.forward(command, Stream::Stderr, read, events);
                }
            }
        }

        let exit = if cancelled {
            None
        } else {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                status = child.wait() => Some(status),
            }
        };

        let outcome = match exit {
            None => {
                tracing::info!("cancellation requested; killing process");
                if let Err(error) = child.kill().await {
                    tracing::warn!(%error, "failed to kill test runner");
                }
                stdout.discard();
                stderr.discard();
                RunOutcome {
                    code: None,
                    cancelled: true,
                }
            }
            Some(Ok(ExitState::Code(code))) => {
                tracing::debug!(code, "test runner exited");
                RunOutcome {
                    code: Some(code),
                    cancelled: false,
                }
            }
            Some(Ok(ExitState::Signaled)) => {
                report(events, &RunnerError::Signaled);
                RunOutcome::default()
            }
            Some(Err(source)) => {
                report(events, &RunnerError::Wait(source));
                RunOutcome::default()
            }
        };
        close(events, outcome)
    }

    fn forward(
        &self,
        command: &Command,
        stream: Stream,
        read: Result<Vec<String>, RunnerError>,
        events: &mpsc::UnboundedSender<RunnerEvent>,
    ) {
        let lines = match read {
            Ok(lines) => lines,
            Err(error) => {
                report(events, &error);
                return;
            }
        };
        for text in lines {
            if self.cancel.is_cancelled() {
                return;
            }
            let result = match stream {
                Stream::Stdout => parser::parse(&text).map(|result| command.replace_path(result)),
                Stream::Stderr => None,
            };
            emit(events, RunnerEvent::Line { stream, text });
            if let Some(result) = result {
                emit(events, RunnerEvent::Result(result));
            }
        }
    }
}

fn emit(events: &mpsc::UnboundedSender<RunnerEvent>, event: RunnerEvent) {
    if events.send(event).is_err() {
        tracing::trace!("event receiver dropped");
    }
}

fn report(events: &mpsc::UnboundedSender<RunnerEvent>, error: &RunnerError) {
    tracing::warn!(%error, "test runner failure");
    emit(events, RunnerEvent::Error(RunFailure::from(error)));
}

fn close(events: &mpsc::UnboundedSender<RunnerEvent>, outcome: RunOutcome) -> RunOutcome {
    emit(
        events,
        RunnerEvent::Close {
            code: outcome.code,
            cancelled: outcome.cancelled,
        },
    );
    outcome
}

// ============================================================================
// Pipe reading
// ============================================================================

/// One pipe plus its pending partial line. Closed once EOF or a read error is seen.
struct OutputReader {
    stream: Stream,
    reader: Option<OutputStream>,
    buffer: LineBuffer,
    chunk: Vec<u8>,
}

impl OutputReader {
    fn new(stream: Stream, reader: Option<OutputStream>) -> Self {
        Self {
            stream,
            reader,
            buffer: LineBuffer::new(),
            chunk: vec![0; READ_CHUNK_SIZE],
        }
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Read one chunk and return the lines it completed. At EOF the unterminated tail, if any, is returned.
    ///
    /// Cancel-safe: the only await point is a single `read`.
    async fn read_lines(&mut self) -> Result<Vec<String>, RunnerError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Vec::new());
        };
        match reader.read(&mut self.chunk).await {
            Ok(0) => {
                self.reader = None;
                Ok(self.buffer.finish().into_iter().collect())
            }
            Ok(n) => Ok(self.buffer.push(&self.chunk[..n])),
            Err(source) => {
                self.discard();
                Err(RunnerError::Read {
                    stream: self.stream,
                    source,
                })
            }
        }
    }

    fn discard(&mut self) {
        self.reader = None;
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_map_to_kinds() {
        let spawn = RunnerError::Spawn {
            command: "php".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        let failure = RunFailure::from(&spawn);
        assert_eq!(failure.kind, FailureKind::Spawn);
        assert_eq!(failure.message, "failed to start 'php': not found");
        assert_eq!(RunFailure::from(&RunnerError::Signaled).kind, FailureKind::Signaled);
    }

    #[test]
    fn test_events_serialize_with_kind_tag() {
        let line = RunnerEvent::Line {
            stream: Stream::Stderr,
            text: "warning".into(),
        };
        assert_eq!(
            serde_json::to_string(&line).unwrap_or_default(),
            r#"{"kind":"line","stream":"stderr","text":"warning"}"#
        );
        let close = RunnerEvent::Close {
            code: Some(1),
            cancelled: false,
        };
        assert_eq!(
            serde_json::to_string(&close).unwrap_or_default(),
            r#"{"kind":"close","code":1,"cancelled":false}"#
        );
    }

    #[tokio::test]
    async fn test_reader_flushes_unterminated_tail_at_eof() {
        let stream: OutputStream = Box::new(&b"a\nb"[..]);
        let mut reader = OutputReader::new(Stream::Stdout, Some(stream));
        let mut lines = Vec::new();
        while reader.is_open() {
            lines.extend(reader.read_lines().await.unwrap_or_default());
        }
        assert_eq!(lines, vec!["a", "b"]);
    }
}
