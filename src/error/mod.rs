use std::fmt::Display;
use thiserror::Error;

pub mod codes;

#[cfg(test)]
mod tests;

pub use codes::{describe_error_code, ErrorCode};

use crate::check::CheckError;
use crate::config::ConfigError;
use crate::extract::{NotFound, PathParseError};
use crate::flows::MetricsProbeError;
use crate::observe::WaitError;
use crate::poll::PollError;
use crate::subprocess::ProcessError;
use crate::visibility::VisibilityError;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// The unified error type for flowprobe
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[E{code:04}] Execution error: {message}")]
    Execution {
        code: u16,
        message: String,
        command: Option<String>,
        exit_code: Option<i32>,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[E{code:04}] Observation error: {message}")]
    Observation {
        code: u16,
        message: String,
        /// What was being waited for
        expected: Option<String>,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl ProbeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::config_with_code(ErrorCode::CONFIG_GENERIC, message)
    }

    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::execution_with_code(ErrorCode::EXEC_GENERIC, message, None)
    }

    pub fn execution_with_code(
        code: u16,
        message: impl Into<String>,
        command: Option<String>,
    ) -> Self {
        Self::Execution {
            code,
            message: message.into(),
            command,
            exit_code: None,
            source: None,
        }
    }

    pub fn observation(message: impl Into<String>) -> Self {
        Self::observation_with_code(ErrorCode::OBSERVE_GENERIC, message, None)
    }

    pub fn observation_with_code(
        code: u16,
        message: impl Into<String>,
        expected: Option<String>,
    ) -> Self {
        Self::Observation {
            code,
            message: message.into(),
            expected,
            source: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(mut self, source: impl Into<BoxedSource>) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Execution { source: src, .. }
            | Self::Observation { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Config { message, .. }
            | Self::Execution { message, .. }
            | Self::Observation { message, .. }
            | Self::Other { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
        }
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        if let Self::Execution {
            exit_code: ref mut ec,
            ..
        } = self
        {
            *ec = Some(exit_code);
        }
        self
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Execution { .. } => 5,
            Self::Observation { .. } => 6,
            Self::Other { .. } => 1,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Execution { code, .. }
            | Self::Observation { code, .. }
            | Self::Other { code, .. } => *code,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, .. } => format!("Configuration problem: {}", message),
            Self::Execution {
                message, command, ..
            } => match command {
                Some(cmd) => format!("Command '{}' failed: {}", cmd, message),
                None => format!("Execution error: {}", message),
            },
            Self::Observation {
                message, expected, ..
            } => match expected {
                Some(expected) => format!("Expected {}: {}", expected, message),
                None => message.clone(),
            },
            Self::Other { message, .. } => message.clone(),
        }
    }

    /// The error and every source below it
    pub fn developer_message(&self) -> String {
        let mut out = format!("{}", self);
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str(&format!("\n  caused by: {}", err));
            source = err.source();
        }
        out
    }
}

/// Type alias for Results using ProbeError
pub type Result<T> = std::result::Result<T, ProbeError>;

impl From<ProcessError> for ProbeError {
    fn from(err: ProcessError) -> Self {
        let code = match &err {
            ProcessError::CommandNotFound(_) => ErrorCode::EXEC_COMMAND_NOT_FOUND,
            ProcessError::LaunchFailed { .. } => ErrorCode::EXEC_LAUNCH_FAILED,
            ProcessError::Cancelled { .. } => ErrorCode::EXEC_CANCELLED,
            ProcessError::Timeout(_) => ErrorCode::EXEC_TIMEOUT,
            ProcessError::IoError { .. } | ProcessError::Io(_) => ErrorCode::EXEC_IO_ERROR,
            ProcessError::InvalidCommand { .. } => ErrorCode::EXEC_INVALID_COMMAND,
            ProcessError::InternalError { .. } | ProcessError::MockExpectationNotMet(_) => {
                ErrorCode::EXEC_GENERIC
            }
        };
        let command = match &err {
            ProcessError::CommandNotFound(command)
            | ProcessError::LaunchFailed { command, .. }
            | ProcessError::Cancelled { command, .. }
            | ProcessError::IoError { command, .. } => Some(command.clone()),
            _ => None,
        };
        ProbeError::execution_with_code(code, err.to_string(), command)
    }
}

impl From<WaitError> for ProbeError {
    fn from(err: WaitError) -> Self {
        let (code, filter) = match &err {
            WaitError::Timeout { filter, .. } => (ErrorCode::OBSERVE_NO_MATCH, filter),
            WaitError::Stopped { filter, .. } => (ErrorCode::OBSERVE_STOPPED, filter),
            WaitError::StreamEnded { filter, .. } => (ErrorCode::OBSERVE_STREAM_ENDED, filter),
        };
        let expected = Some(format!("a line matching '{}'", filter));
        ProbeError::observation_with_code(code, err.to_string(), expected)
    }
}

impl From<PollError> for ProbeError {
    fn from(err: PollError) -> Self {
        match &err {
            PollError::Timeout { expected, .. } => ProbeError::observation_with_code(
                ErrorCode::OBSERVE_POLL_NO_MATCH,
                err.to_string(),
                Some(expected.clone()),
            ),
            PollError::Cancelled { .. } => ProbeError::observation_with_code(
                ErrorCode::OBSERVE_POLL_CANCELLED,
                err.to_string(),
                None,
            ),
        }
    }
}

impl From<ConfigError> for ProbeError {
    fn from(err: ConfigError) -> Self {
        let code = match &err {
            ConfigError::Read { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ErrorCode::CONFIG_NOT_FOUND
            }
            ConfigError::Read { .. } => ErrorCode::CONFIG_GENERIC,
            ConfigError::Parse { .. } => ErrorCode::CONFIG_INVALID_YAML,
            ConfigError::Env { .. } => ErrorCode::CONFIG_INVALID_VALUE,
            ConfigError::Invalid(_) => ErrorCode::CONFIG_VALIDATION_FAILED,
        };
        ProbeError::config_with_code(code, err.to_string())
    }
}

impl From<CheckError> for ProbeError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::Observer(e) => ProbeError::from(e).with_context("starting observer"),
            CheckError::Trigger {
                command,
                reason,
                output,
            } => {
                let mut message = reason;
                if !output.trim().is_empty() {
                    message = format!("{}\n{}", message, output.trim_end());
                }
                ProbeError::execution_with_code(
                    ErrorCode::EXEC_TRIGGER_FAILED,
                    message,
                    Some(command),
                )
            }
            CheckError::Wait(e) => e.into(),
            CheckError::Metrics(e) => e.into(),
        }
    }
}

impl From<VisibilityError> for ProbeError {
    fn from(err: VisibilityError) -> Self {
        match err {
            VisibilityError::Process(e) => e.into(),
            VisibilityError::CommandFailed {
                command,
                status,
                output,
            } => {
                let error = ProbeError::execution_with_code(
                    ErrorCode::EXEC_SUBPROCESS_FAILED,
                    format!("{}: {}", status, output.trim_end()),
                    Some(command),
                );
                match status.code() {
                    Some(code) => error.with_exit_code(code),
                    None => error,
                }
            }
            err @ (VisibilityError::NoPodsAnnotated { .. }
            | VisibilityError::AgentNotFound { .. }) => ProbeError::observation_with_code(
                ErrorCode::OBSERVE_NO_PODS,
                err.to_string(),
                None,
            ),
            err @ VisibilityError::NotApplied { .. } => ProbeError::observation_with_code(
                ErrorCode::OBSERVE_VISIBILITY_NOT_APPLIED,
                err.to_string(),
                None,
            ),
        }
    }
}

impl From<MetricsProbeError> for ProbeError {
    fn from(err: MetricsProbeError) -> Self {
        match err {
            MetricsProbeError::Invocation(e) => e.into(),
            MetricsProbeError::Poll(e) => e.into(),
        }
    }
}

impl From<PathParseError> for ProbeError {
    fn from(err: PathParseError) -> Self {
        ProbeError::config_with_code(ErrorCode::CONFIG_INVALID_FIELD_PATH, err.to_string())
    }
}

impl From<NotFound> for ProbeError {
    fn from(err: NotFound) -> Self {
        ProbeError::observation_with_code(ErrorCode::OBSERVE_FIELD_NOT_FOUND, err.to_string(), None)
    }
}

impl From<regex::Error> for ProbeError {
    fn from(err: regex::Error) -> Self {
        ProbeError::config_with_code(ErrorCode::CONFIG_INVALID_PATTERN, "Invalid match pattern")
            .with_source(err)
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::EXEC_COMMAND_NOT_FOUND,
            std::io::ErrorKind::TimedOut => ErrorCode::EXEC_TIMEOUT,
            _ => ErrorCode::EXEC_IO_ERROR,
        };
        ProbeError::execution_with_code(code, "I/O operation failed", None).with_source(err)
    }
}

impl From<serde_yaml::Error> for ProbeError {
    fn from(err: serde_yaml::Error) -> Self {
        ProbeError::config_with_code(ErrorCode::CONFIG_INVALID_YAML, "Invalid YAML syntax")
            .with_source(err)
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        ProbeError::config_with_code(ErrorCode::CONFIG_INVALID_JSON, "Invalid JSON syntax")
            .with_source(err)
    }
}
