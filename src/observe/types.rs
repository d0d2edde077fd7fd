use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::extract::LineFilter;
use crate::subprocess::{ExitStatus, StreamSource};

/// One line captured from the observed process
#[derive(Debug, Clone)]
pub struct ObservedLine {
    /// Position in emission order, starting at 1
    pub seq: u64,
    pub source: StreamSource,
    pub text: String,
    pub received_at: Instant,
    pub timestamp: DateTime<Utc>,
}

impl ObservedLine {
    pub fn new(seq: u64, source: StreamSource, text: impl Into<String>) -> Self {
        Self {
            seq,
            source,
            text: text.into(),
            received_at: Instant::now(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverState {
    Created,
    Running,
    Matched,
    TimedOut,
    Stopped,
    /// The process exited before the observer was stopped
    Failed { status: ExitStatus },
}

impl ObserverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed { .. })
    }
}

impl fmt::Display for ObserverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Matched => write!(f, "matched"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed { status } => write!(f, "failed ({})", status),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Lines kept for diagnostics
    pub tail_size: usize,
    /// Lines that may queue up between the producer and a wait
    pub channel_capacity: usize,
    /// How long the process gets to exit after SIGTERM
    pub stop_grace: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            tail_size: 200,
            channel_capacity: 10_000,
            stop_grace: Duration::from_secs(2),
        }
    }
}

/// A single wait: consumed by [`super::StreamingObserver::wait`]
#[derive(Debug, Clone)]
pub struct WaitRequest {
    pub filter: LineFilter,
    pub deadline: Instant,
    /// Re-scan lines already consumed by earlier waits (within the retained tail)
    pub rescan_tail: bool,
}

impl WaitRequest {
    pub fn new(filter: LineFilter, timeout: Duration) -> Self {
        Self {
            filter,
            deadline: Instant::now() + timeout,
            rescan_tail: false,
        }
    }

    pub fn with_rescan_tail(mut self, rescan: bool) -> Self {
        self.rescan_tail = rescan;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub line: ObservedLine,
    /// The extracted value that satisfied the filter
    pub value: String,
    pub elapsed: Duration,
    pub lines_scanned: u64,
}

/// Captured context attached to every failed wait
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub elapsed: Duration,
    pub lines_scanned: u64,
    /// Lines that missed the channel
    pub lines_dropped: u64,
    /// Dropped lines that left the tail before any wait could scan them
    pub lines_lost: u64,
    pub tail: Vec<String>,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "after {:?}: {} lines scanned, {} dropped",
            self.elapsed, self.lines_scanned, self.lines_dropped
        )?;
        if self.lines_lost > 0 {
            write!(f, " ({} never scanned)", self.lines_lost)?;
        }
        if self.tail.is_empty() {
            return write!(f, ", no output captured");
        }
        writeln!(f, ", last {} lines:", self.tail.len())?;
        for line in &self.tail {
            writeln!(f, "  {}", line)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("no line matched '{filter}' {diagnostics}")]
    Timeout {
        filter: String,
        diagnostics: Diagnostics,
    },

    #[error("observer stopped while waiting for '{filter}' {diagnostics}")]
    Stopped {
        filter: String,
        diagnostics: Diagnostics,
    },

    #[error("stream ended without a line matching '{filter}' {diagnostics}")]
    StreamEnded {
        filter: String,
        diagnostics: Diagnostics,
    },
}

impl WaitError {
    pub fn diagnostics(&self) -> &Diagnostics {
        match self {
            Self::Timeout { diagnostics, .. }
            | Self::Stopped { diagnostics, .. }
            | Self::StreamEnded { diagnostics, .. } => diagnostics,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
