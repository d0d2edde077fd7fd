//! Poll a one-shot command until its output says what we expect
//!
//! Used where the check itself is synchronous but the state it reads (an annotation
//! landing on an endpoint, a metrics counter) takes a while to propagate.

#[cfg(test)]
mod tests;

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::remote::{Invocation, RemoteExecutor, RemoteOutput};
use crate::subprocess::ProcessError;

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Pause between attempts
    pub interval: Duration,
    /// Bound on a single attempt that does not set its own timeout
    pub attempt_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

/// Bookkeeping for one poll call
#[derive(Debug, Clone)]
pub struct PollState {
    pub attempts: u32,
    pub last_output: Option<String>,
    pub last_error: Option<String>,
    pub deadline: Instant,
}

impl PollState {
    fn new(deadline: Instant) -> Self {
        Self {
            attempts: 0,
            last_output: None,
            last_error: None,
            deadline,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollMatch {
    pub output: String,
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error(
        "'{command}' did not produce {expected} within {elapsed:?} ({attempts} attempts){}",
        last_seen(.last_output, .last_error)
    )]
    Timeout {
        command: String,
        expected: String,
        attempts: u32,
        elapsed: Duration,
        last_output: Option<String>,
        last_error: Option<String>,
    },

    #[error("polling '{command}' cancelled after {attempts} attempts")]
    Cancelled { command: String, attempts: u32 },
}

impl PollError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Timeout { attempts, .. } | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn last_output(&self) -> Option<&str> {
        match self {
            Self::Timeout { last_output, .. } => last_output.as_deref(),
            Self::Cancelled { .. } => None,
        }
    }
}

fn last_seen(output: &Option<String>, error: &Option<String>) -> String {
    let mut out = String::new();
    if let Some(error) = error {
        out.push_str(&format!("; last error: {}", error));
    }
    match output {
        Some(output) if !output.trim().is_empty() => {
            out.push_str(&format!("; last output:\n{}", output.trim_end()));
        }
        _ => out.push_str("; no output captured"),
    }
    out
}

pub struct PollExecutor {
    executor: RemoteExecutor,
    config: PollConfig,
    cancel: CancellationToken,
}

impl PollExecutor {
    pub fn new(executor: RemoteExecutor, config: PollConfig) -> Self {
        Self {
            executor,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort polling (and the attempt in flight) when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Re-run `invocation` until its output contains `expected`.
    pub async fn poll_until(
        &self,
        invocation: &Invocation,
        expected: &str,
        timeout: Duration,
    ) -> Result<PollMatch, PollError> {
        let description = format!("{:?}", expected);
        self.poll_until_with(invocation, &description, timeout, |output| {
            output.contains(expected)
        })
        .await
    }

    /// Re-run `invocation` until `predicate` accepts the output of a successful run.
    ///
    /// The first attempt always happens, even with a zero timeout. Failed attempts
    /// (non-zero exit, launch errors, per-attempt timeouts) count as "not yet".
    pub async fn poll_until_with<F>(
        &self,
        invocation: &Invocation,
        description: &str,
        timeout: Duration,
        predicate: F,
    ) -> Result<PollMatch, PollError>
    where
        F: Fn(&str) -> bool,
    {
        let started = Instant::now();
        let invocation = invocation.or_timeout(self.config.attempt_timeout);
        let mut state = PollState::new(started + timeout);

        loop {
            state.attempts += 1;
            match self.attempt(&invocation, &state).await {
                Ok(output) if output.success() && predicate(&output.output) => {
                    tracing::debug!(
                        "{} produced {} after {} attempts",
                        invocation,
                        description,
                        state.attempts
                    );
                    return Ok(PollMatch {
                        output: output.output,
                        attempts: state.attempts,
                        elapsed: started.elapsed(),
                    });
                }
                Ok(output) => {
                    tracing::trace!(
                        "Attempt {} of {}: {}, no match yet",
                        state.attempts,
                        invocation,
                        output.status
                    );
                    state.last_error = if output.success() {
                        None
                    } else {
                        Some(output.status.to_string())
                    };
                    state.last_output = Some(output.output);
                }
                Err(e) if e.is_cancelled() && self.cancel.is_cancelled() => {
                    return Err(self.cancelled(&invocation, &state));
                }
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(
                        "Attempt {} of {} cut short by the poll deadline",
                        state.attempts,
                        invocation
                    );
                    state.last_error = Some("attempt still running at the poll deadline".to_string());
                }
                Err(e) => {
                    tracing::debug!("Attempt {} of {} failed: {}", state.attempts, invocation, e);
                    state.last_error = Some(e.to_string());
                }
            }

            let now = Instant::now();
            if now >= state.deadline {
                return Err(PollError::Timeout {
                    command: invocation.to_string(),
                    expected: description.to_string(),
                    attempts: state.attempts,
                    elapsed: started.elapsed(),
                    last_output: state.last_output,
                    last_error: state.last_error,
                });
            }

            let pause = self.config.interval.min(state.deadline - now);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(self.cancelled(&invocation, &state));
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// One run of `invocation`, cancelled once the global deadline passes. An attempt
    /// that starts with no time left is bounded by its own timeout only.
    async fn attempt(
        &self,
        invocation: &Invocation,
        state: &PollState,
    ) -> Result<RemoteOutput, ProcessError> {
        let attempt = self.cancel.child_token();
        let run = self.executor.run(invocation, &attempt);
        tokio::pin!(run);

        if Instant::now() >= state.deadline {
            return run.await;
        }
        tokio::select! {
            result = &mut run => result,
            _ = tokio::time::sleep_until(state.deadline) => {
                attempt.cancel();
                run.await
            }
        }
    }

    fn cancelled(&self, invocation: &Invocation, state: &PollState) -> PollError {
        PollError::Cancelled {
            command: invocation.to_string(),
            attempts: state.attempts,
        }
    }
}
