//! Remote command execution
//!
//! A remote command is an [`Invocation`] against a [`RemoteTarget`]. The [`Transport`]
//! turns it into a local [`ProcessCommand`] (for example `kubectl exec`) and the
//! [`RemoteExecutor`] runs it, either to completion or as a live stream.

mod transport;

#[cfg(test)]
mod tests;

pub use transport::{KubectlTransport, LocalTransport, Transport};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::subprocess::{
    ExitStatus, ProcessCommand, ProcessError, ProcessHandle, ProcessRunner, TokioProcessRunner,
};

/// Identity of the pod (and optionally the container) a command runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
}

impl RemoteTarget {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: None,
        }
    }

    /// Stand-in target for commands run on this host
    pub fn local() -> Self {
        Self::new("", "localhost")
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.pod)?;
        } else {
            write!(f, "{}/{}", self.namespace, self.pod)?;
        }
        if let Some(container) = &self.container {
            write!(f, ":{}", container)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    OneShot,
    Streaming,
}

/// A command bound to its target. Built once through [`InvocationBuilder`].
#[derive(Debug, Clone)]
pub struct Invocation {
    target: RemoteTarget,
    argv: Vec<String>,
    stdin: Option<String>,
    mode: ExecutionMode,
    timeout: Option<Duration>,
}

impl Invocation {
    pub fn builder(target: RemoteTarget) -> InvocationBuilder {
        InvocationBuilder::new(target)
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Only honored for one-shot runs; a stream lives until it is stopped.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn command_line(&self) -> String {
        shell_words::join(&self.argv)
    }

    /// Copy of this invocation bounded by `timeout` unless it already has a bound
    pub fn or_timeout(&self, timeout: Duration) -> Invocation {
        let mut bounded = self.clone();
        bounded.timeout.get_or_insert(timeout);
        bounded
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.target, self.command_line())
    }
}

pub struct InvocationBuilder {
    target: RemoteTarget,
    argv: Vec<String>,
    stdin: Option<String>,
    mode: ExecutionMode,
    timeout: Option<Duration>,
}

impl InvocationBuilder {
    pub fn new(target: RemoteTarget) -> Self {
        Self {
            target,
            argv: Vec::new(),
            stdin: None,
            mode: ExecutionMode::OneShot,
            timeout: None,
        }
    }

    /// Split a shell-style command line into arguments and append them.
    pub fn command_line(mut self, line: &str) -> Result<Self, ProcessError> {
        let words = shell_words::split(line).map_err(|e| ProcessError::InvalidCommand {
            message: format!("cannot split '{}': {}", line, e),
        })?;
        self.argv.extend(words);
        Ok(self)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.mode = ExecutionMode::Streaming;
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Invocation, ProcessError> {
        if self.argv.is_empty() {
            return Err(ProcessError::InvalidCommand {
                message: format!("empty command for target {}", self.target),
            });
        }
        Ok(Invocation {
            target: self.target,
            argv: self.argv,
            stdin: self.stdin,
            mode: self.mode,
            timeout: self.timeout,
        })
    }
}

/// Outcome of a one-shot remote command. A non-zero exit is a normal outcome here.
#[derive(Debug, Clone)]
pub struct RemoteOutput {
    pub status: ExitStatus,
    /// Stdout followed by stderr
    pub output: String,
    pub duration: Duration,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

#[derive(Clone)]
pub struct RemoteExecutor {
    runner: Arc<dyn ProcessRunner>,
    transport: Arc<dyn Transport>,
}

impl RemoteExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, transport: Arc<dyn Transport>) -> Self {
        Self { runner, transport }
    }

    /// Executor that reaches pods through `kubectl exec`
    pub fn kubectl(kubectl: impl Into<String>) -> Self {
        Self::new(
            Arc::new(TokioProcessRunner),
            Arc::new(KubectlTransport::new(kubectl)),
        )
    }

    /// Executor that ignores the target and runs commands on this host
    pub fn local() -> Self {
        Self::new(Arc::new(TokioProcessRunner), Arc::new(LocalTransport))
    }

    /// Run the invocation to completion, or until `cancel` fires.
    pub async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<RemoteOutput, ProcessError> {
        let command = self.prepare(invocation, ExecutionMode::OneShot)?;
        tracing::debug!("Running {} via {}", invocation, self.transport.name());

        let output = self.runner.run_cancellable(command, cancel).await?;
        Ok(RemoteOutput {
            output: output.combined(),
            status: output.status,
            duration: output.duration,
        })
    }

    /// Start the invocation as a long-running stream. Returns once the process has
    /// spawned; launch failures are reported here, never through the stream.
    pub async fn start(&self, invocation: &Invocation) -> Result<ProcessHandle, ProcessError> {
        let command = self.prepare(invocation, ExecutionMode::Streaming)?;
        tracing::debug!("Starting stream {} via {}", invocation, self.transport.name());
        self.runner.start(command).await
    }

    fn prepare(
        &self,
        invocation: &Invocation,
        mode: ExecutionMode,
    ) -> Result<ProcessCommand, ProcessError> {
        if invocation.mode() != mode {
            tracing::trace!(
                "Invocation declared {:?} but is executed as {:?}: {}",
                invocation.mode(),
                mode,
                invocation
            );
        }
        let mut command = self.transport.command(invocation)?;
        command.timeout = match mode {
            ExecutionMode::OneShot => invocation.timeout(),
            ExecutionMode::Streaming => None,
        };
        Ok(command)
    }
}
