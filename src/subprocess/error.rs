use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Failed to launch '{command}': {source}")]
    LaunchFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' cancelled after {elapsed:?}")]
    Cancelled { command: String, elapsed: Duration },

    #[error("Process timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error while running '{command}': {source}")]
    IoError {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid command: {message}")]
    InvalidCommand { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}

impl ProcessError {
    /// True when the process never started.
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            ProcessError::CommandNotFound(_) | ProcessError::LaunchFailed { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled { .. })
    }
}
