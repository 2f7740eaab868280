//! Process boundary
//!
//! The runner talks to the child only through [`Spawner`] and [`ChildProcess`], so tests (and embedders) can script a
//! process without touching the OS. [`ProcessSpawner`] is the real implementation on top of `tokio::process`.

use std::future::Future;
use std::io;
use std::process::Stdio;

use tokio::io::AsyncRead;

use crate::command::Invocation;

/// A readable pipe of the child.
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Exited normally with a code (any code, including non-zero).
    Code(i32),
    /// Terminated without an exit code, e.g. by a signal.
    Signaled,
}

/// A started child with its output pipes.
pub struct SpawnedProcess<C> {
    pub child: C,
    pub stdout: Option<OutputStream>,
    pub stderr: Option<OutputStream>,
}

pub trait ChildProcess: Send {
    /// Wait for the child to exit.
    fn wait(&mut self) -> impl Future<Output = io::Result<ExitState>> + Send;

    /// Forcibly terminate the child and reap it.
    fn kill(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

pub trait Spawner {
    type Child: ChildProcess;

    /// Start `invocation`. An `Err` means the process never ran (missing executable, permissions, bad cwd).
    fn spawn(&self, invocation: &Invocation) -> io::Result<SpawnedProcess<Self::Child>>;
}

// ============================================================================
// tokio::process implementation
// ============================================================================

/// Spawns real processes with piped stdout/stderr and a null stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSpawner;

/// A `tokio::process::Child` that is killed if dropped while running.
#[derive(Debug)]
pub struct ProcessChild(tokio::process::Child);

impl Spawner for ProcessSpawner {
    type Child = ProcessChild;

    fn spawn(&self, invocation: &Invocation) -> io::Result<SpawnedProcess<ProcessChild>> {
        let mut command = tokio::process::Command::new(&invocation.command);
        command
            .args(&invocation.arguments)
            .envs(invocation.options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !invocation.options.cwd.as_os_str().is_empty() {
            command.current_dir(&invocation.options.cwd);
        }

        let mut child = command.spawn()?;
        tracing::debug!(pid = ?child.id(), command = %invocation.command, "spawned test runner");

        let stdout = child.stdout.take().map(|pipe| Box::new(pipe) as OutputStream);
        let stderr = child.stderr.take().map(|pipe| Box::new(pipe) as OutputStream);
        Ok(SpawnedProcess {
            child: ProcessChild(child),
            stdout,
            stderr,
        })
    }
}

impl ChildProcess for ProcessChild {
    async fn wait(&mut self) -> io::Result<ExitState> {
        let status = self.0.wait().await?;
        Ok(match status.code() {
            Some(code) => ExitState::Code(code),
            None => ExitState::Signaled,
        })
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.0.kill().await
    }
}
