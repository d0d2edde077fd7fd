use async_trait::async_trait;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::error::ProcessError;
use super::handle::{
    signal_process_group, GroupSignal, LineStream, OutputLine, ProcessHandle, StreamSource,
    TokioProcessControl,
};

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
    pub stdin: Option<String>,
}

impl ProcessCommand {
    /// Shell-quoted rendering, suitable for logs and error messages
    pub fn display(&self) -> String {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.as_str());
        argv.extend(self.args.iter().map(String::as_str));
        shell_words::join(argv)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    /// Stdout followed by stderr
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        out.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&self.stderr);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Timeout,
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn from_std(status: std::process::ExitStatus) -> Self {
        if status.success() {
            ExitStatus::Success
        } else if let Some(code) = status.code() {
            ExitStatus::Error(code)
        } else {
            Self::from_signal(status)
        }
    }

    #[cfg(unix)]
    fn from_signal(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            ExitStatus::Signal(signal)
        } else {
            ExitStatus::Error(1)
        }
    }

    #[cfg(not(unix))]
    fn from_signal(_status: std::process::ExitStatus) -> Self {
        ExitStatus::Error(1)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "exit code 0"),
            ExitStatus::Error(code) => write!(f, "exit code {}", code),
            ExitStatus::Timeout => write!(f, "timed out"),
            ExitStatus::Signal(signal) => write!(f, "killed by signal {}", signal),
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion. A cancelled run terminates the process before returning
    /// [`ProcessError::Cancelled`].
    async fn run_cancellable(
        &self,
        command: ProcessCommand,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError>;

    /// Spawn a long-running process and hand back its line stream. Returns as soon
    /// as the process has started.
    async fn start(&self, command: ProcessCommand) -> Result<ProcessHandle, ProcessError>;

    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        self.run_cancellable(command, &CancellationToken::new())
            .await
    }
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    /// Normalize a line by removing trailing newlines
    fn normalize_line(mut line: String) -> String {
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        line
    }

    /// Create a line stream from a buffered reader. The stream ends after the first
    /// read error.
    fn create_line_stream<R>(
        reader: tokio::io::BufReader<R>,
        source: StreamSource,
        command: String,
    ) -> LineStream
    where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
    {
        use tokio::io::AsyncBufReadExt;

        Box::pin(futures::stream::unfold(
            Some(reader),
            move |state| {
                let command = command.clone();
                async move {
                    let mut reader = state?;
                    let mut buf = Vec::new();
                    match reader.read_until(b'\n', &mut buf).await {
                        Ok(0) => None,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf).into_owned();
                            let text = Self::normalize_line(line);
                            Some((Ok(OutputLine { source, text }), Some(reader)))
                        }
                        Err(e) => Some((Err(ProcessError::IoError { command, source: e }), None)),
                    }
                }
            },
        ))
    }

    /// Log command execution details
    fn log_command_start(command: &ProcessCommand) {
        tracing::debug!("Executing subprocess: {}", command.display());

        if let Some(ref stdin) = command.stdin {
            tracing::trace!("Stdin provided: {} bytes", stdin.len());
        }
    }

    /// Configure the command with a scrubbed environment in its own process group
    fn configure_command(
        command: &ProcessCommand,
    ) -> Result<tokio::process::Command, ProcessError> {
        let mut cmd = tokio::process::Command::new(&command.program);

        // Own process group so termination reaches everything the command forks
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        cmd.args(&command.args);
        cmd.env_clear();
        Self::preserve_essential_env(&mut cmd, &command.program)?;

        cmd.kill_on_drop(true);
        Self::configure_stdio(&mut cmd, command);
        Ok(cmd)
    }

    /// Carry over the parts of the parent environment that kubectl and friends need.
    /// PATH is required; the rest are optional.
    fn preserve_essential_env(
        cmd: &mut tokio::process::Command,
        program: &str,
    ) -> Result<(), ProcessError> {
        let path = std::env::var("PATH").map_err(|e| ProcessError::InternalError {
            message: format!(
                "PATH is not available (required for '{}' command): {:?}",
                program, e
            ),
        })?;
        cmd.env("PATH", path);

        let optional_vars = [
            "HOME",
            "USER",
            "SHELL",
            "TMPDIR",
            "TERM",
            "KUBECONFIG",
            "LANG",
            "LC_ALL",
            "LC_CTYPE",
        ];

        let mut missing = Vec::new();
        for var in optional_vars {
            match std::env::var(var) {
                Ok(value) => {
                    cmd.env(var, value);
                }
                Err(_) => missing.push(var),
            }
        }

        if !missing.is_empty() {
            tracing::trace!(
                "Optional env vars not available for '{}': {}",
                program,
                missing.join(", ")
            );
        }

        Ok(())
    }

    /// Configure stdio pipes for the process
    fn configure_stdio(cmd: &mut tokio::process::Command, command: &ProcessCommand) {
        if command.stdin.is_some() {
            cmd.stdin(std::process::Stdio::piped());
        } else {
            cmd.stdin(std::process::Stdio::null());
        }

        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
    }

    /// Write stdin data to the child process and close the pipe
    ///
    /// Runs on its own task: the child may fill its stdout pipe before it has read
    /// all of its input, and waits on the child must stay cancellable meanwhile.
    fn write_stdin(child: &mut tokio::process::Child, stdin_data: &str, command_str: String) {
        let Some(mut stdin) = child.stdin.take() else {
            return;
        };
        let data = stdin_data.to_string();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let written = async {
                stdin.write_all(data.as_bytes()).await?;
                stdin.shutdown().await
            }
            .await;
            if let Err(e) = written {
                tracing::debug!("Stopped writing stdin of '{}': {}", command_str, e);
            }
        });
    }

    /// Map spawn error to ProcessError
    fn map_spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        if error.kind() == std::io::ErrorKind::NotFound {
            tracing::error!(
                "Command '{}' not found. Parent process PATH: {}",
                command.program,
                std::env::var("PATH").unwrap_or_default()
            );
            ProcessError::CommandNotFound(command.program.clone())
        } else {
            tracing::error!(
                "Failed to spawn '{}': {:?} (kind: {:?})",
                command.program,
                error,
                error.kind()
            );
            ProcessError::LaunchFailed {
                command: command.display(),
                source: error,
            }
        }
    }

    /// Spawn and configure a process, feeding stdin in the background when provided
    async fn spawn_configured_process(
        command: &ProcessCommand,
    ) -> Result<tokio::process::Child, ProcessError> {
        let mut cmd = Self::configure_command(command)?;
        let mut child = cmd
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, command))?;

        if let Some(stdin_data) = &command.stdin {
            Self::write_stdin(&mut child, stdin_data, command.display());
        }

        Ok(child)
    }

    /// Extract a stream from a child process, converting None to error
    fn extract_stream<T>(stream: Option<T>, stream_name: &str) -> Result<T, ProcessError> {
        stream.ok_or_else(|| ProcessError::InternalError {
            message: format!("Failed to capture {}", stream_name),
        })
    }

    /// Merge stdout and stderr of a child into one line stream
    fn create_output_stream(
        child: &mut tokio::process::Child,
        command: &ProcessCommand,
    ) -> Result<LineStream, ProcessError> {
        use tokio::io::BufReader;

        let command_str = command.display();
        let stdout = Self::extract_stream(child.stdout.take(), "stdout")?;
        let stdout_stream = Self::create_line_stream(
            BufReader::new(stdout),
            StreamSource::Stdout,
            command_str.clone(),
        );

        let stderr = Self::extract_stream(child.stderr.take(), "stderr")?;
        let stderr_stream =
            Self::create_line_stream(BufReader::new(stderr), StreamSource::Stderr, command_str);

        Ok(Box::pin(futures::stream::select(stdout_stream, stderr_stream)))
    }

    /// Log the process execution result
    fn log_result(result: &ProcessOutput, command: &ProcessCommand) {
        let command_str = command.display();

        match &result.status {
            ExitStatus::Success => {
                tracing::debug!(
                    "Subprocess completed successfully in {:?}: {}",
                    result.duration,
                    command_str
                );
                tracing::trace!("Stdout length: {} bytes", result.stdout.len());
            }
            ExitStatus::Error(code) => {
                tracing::debug!(
                    "Subprocess failed with exit code {} in {:?}: {}",
                    code,
                    result.duration,
                    command_str
                );
                if !result.stderr.is_empty() {
                    tracing::trace!("Stderr: {}", result.stderr);
                }
            }
            ExitStatus::Signal(signal) => {
                tracing::warn!(
                    "Subprocess terminated by signal {} in {:?}: {}",
                    signal,
                    result.duration,
                    command_str
                );
            }
            ExitStatus::Timeout => {
                tracing::warn!(
                    "Subprocess timed out after {:?}: {}",
                    result.duration,
                    command_str
                );
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run_cancellable(
        &self,
        command: ProcessCommand,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        let start = Instant::now();
        Self::log_command_start(&command);

        let child = Self::spawn_configured_process(&command).await?;
        let pid = child.id();

        let wait = async {
            match command.timeout {
                Some(duration) => {
                    match tokio::time::timeout(duration, child.wait_with_output()).await {
                        Ok(result) => result.map_err(ProcessError::Io),
                        Err(_) => Err(ProcessError::Timeout(duration)),
                    }
                }
                None => child.wait_with_output().await.map_err(ProcessError::Io),
            }
        };

        // Dropping the wait future drops the child, which kills it; the group signal
        // takes care of anything it forked.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                signal_process_group(pid, GroupSignal::Kill);
                tracing::debug!("Cancelled subprocess: {}", command.display());
                return Err(ProcessError::Cancelled {
                    command: command.display(),
                    elapsed: start.elapsed(),
                });
            }
            result = wait => match result {
                Ok(output) => output,
                Err(e) => {
                    if matches!(e, ProcessError::Timeout(_)) {
                        signal_process_group(pid, GroupSignal::Kill);
                    }
                    return Err(e);
                }
            },
        };

        let result = ProcessOutput {
            status: ExitStatus::from_std(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        };

        Self::log_result(&result, &command);
        Ok(result)
    }

    async fn start(&self, command: ProcessCommand) -> Result<ProcessHandle, ProcessError> {
        Self::log_command_start(&command);

        let mut child = Self::spawn_configured_process(&command).await?;
        let lines = Self::create_output_stream(&mut child, &command)?;
        let pid = child.id();
        let command_str = command.display();

        tracing::debug!("Started streaming subprocess (pid {:?}): {}", pid, command_str);

        Ok(ProcessHandle::new(
            command_str.clone(),
            pid,
            lines,
            Box::new(TokioProcessControl::new(child, command_str)),
        ))
    }
}
