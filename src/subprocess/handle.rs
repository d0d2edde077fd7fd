//! Handle to a running, streaming process
//!
//! A [`ProcessHandle`] owns the merged line stream of a long-running process together
//! with the means to terminate it. Dropping the handle kills the process.

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use super::error::ProcessError;
use super::runner::ExitStatus;

/// Stream source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One line of output, stripped of its trailing newline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub source: StreamSource,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            source: StreamSource::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            source: StreamSource::Stderr,
            text: text.into(),
        }
    }
}

pub type LineStream = Pin<Box<dyn Stream<Item = Result<OutputLine, ProcessError>> + Send>>;

/// Lifecycle control over a spawned process
#[async_trait]
pub trait ProcessControl: Send {
    /// Wait for the process to exit on its own.
    async fn wait(&mut self) -> Result<ExitStatus, ProcessError>;

    /// Ask the process to stop, escalate after `grace`, and reap it.
    async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, ProcessError>;
}

pub struct ProcessHandle {
    command: String,
    pid: Option<u32>,
    lines: LineStream,
    control: Box<dyn ProcessControl>,
}

impl ProcessHandle {
    pub fn new(
        command: impl Into<String>,
        pid: Option<u32>,
        lines: LineStream,
        control: Box<dyn ProcessControl>,
    ) -> Self {
        Self {
            command: command.into(),
            pid,
            lines,
            control,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next line from stdout or stderr; `None` once both are closed.
    pub async fn next_line(&mut self) -> Option<Result<OutputLine, ProcessError>> {
        self.lines.next().await
    }

    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        self.control.wait().await
    }

    pub async fn kill_and_wait(&mut self, grace: Duration) -> Result<ExitStatus, ProcessError> {
        tracing::debug!("Terminating '{}' (pid {:?})", self.command, self.pid);
        self.control.terminate(grace).await
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("command", &self.command)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Control over a child spawned by tokio in its own process group
pub struct TokioProcessControl {
    child: tokio::process::Child,
    command: String,
}

impl TokioProcessControl {
    pub fn new(child: tokio::process::Child, command: impl Into<String>) -> Self {
        Self {
            child,
            command: command.into(),
        }
    }

    fn io_error(&self, source: std::io::Error) -> ProcessError {
        ProcessError::IoError {
            command: self.command.clone(),
            source,
        }
    }
}

#[async_trait]
impl ProcessControl for TokioProcessControl {
    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status = self.child.wait().await.map_err(|e| self.io_error(e))?;
        Ok(ExitStatus::from_std(status))
    }

    async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, ProcessError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Ok(ExitStatus::from_std(status));
        }

        signal_process_group(self.child.id(), GroupSignal::Terminate);

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Ok(ExitStatus::from_std(status)),
            Ok(Err(e)) => Err(self.io_error(e)),
            Err(_) => {
                tracing::warn!(
                    "'{}' ignored SIGTERM for {:?}, killing it",
                    self.command,
                    grace
                );
                signal_process_group(self.child.id(), GroupSignal::Kill);
                // The group signal may miss a child that left the group
                let _ = self.child.start_kill();
                let status = self.child.wait().await.map_err(|e| self.io_error(e))?;
                Ok(ExitStatus::from_std(status))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum GroupSignal {
    Terminate,
    Kill,
}

/// Signal the process group led by `pid`. Best effort: a missing pid or an
/// already-gone group is not an error.
pub fn signal_process_group(pid: Option<u32>, signal: GroupSignal) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = pid else {
            return;
        };
        let sig = match signal {
            GroupSignal::Terminate => Signal::SIGTERM,
            GroupSignal::Kill => Signal::SIGKILL,
        };
        if let Err(e) = killpg(Pid::from_raw(pid as i32), sig) {
            tracing::trace!("killpg({}, {:?}) failed: {}", pid, sig, e);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
    }
}
