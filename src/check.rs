//! End-to-end flow checks
//!
//! A check starts observing, generates traffic, waits for the matching flow and
//! optionally confirms the flow counters afterwards. The observer is always started
//! before the trigger so that the flow cannot be missed.

use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::extract::LineFilter;
use crate::observe::{MatchResult, ObserverConfig, StreamingObserver, WaitError, WaitRequest};
use crate::poll::{PollError, PollExecutor, PollMatch};
use crate::remote::{Invocation, RemoteExecutor, RemoteOutput};
use crate::subprocess::ProcessError;

/// Poll `invocation` until its output contains `expected`
#[derive(Debug, Clone)]
pub struct MetricsCheck {
    pub invocation: Invocation,
    pub expected: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FlowCheck {
    /// The streaming command to observe
    pub observe: Invocation,
    pub filter: LineFilter,
    /// Traffic generator run once the observer is up
    pub trigger: Option<Invocation>,
    pub timeout: Duration,
    pub metrics: Option<MetricsCheck>,
}

impl FlowCheck {
    pub fn new(observe: Invocation, filter: LineFilter, timeout: Duration) -> Self {
        Self {
            observe,
            filter,
            trigger: None,
            timeout,
            metrics: None,
        }
    }

    pub fn with_trigger(mut self, trigger: Invocation) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCheck) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CheckReport {
    pub observer: Uuid,
    pub matched: MatchResult,
    pub trigger: Option<RemoteOutput>,
    pub metrics: Option<PollMatch>,
    pub lines_received: u64,
    pub lines_dropped: u64,
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("failed to start observer: {0}")]
    Observer(#[source] ProcessError),

    #[error("trigger '{command}' failed: {reason}{}", tail(.output))]
    Trigger {
        command: String,
        reason: String,
        output: String,
    },

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("metrics check failed: {0}")]
    Metrics(#[from] PollError),
}

fn tail(output: &str) -> String {
    let output = output.trim_end();
    if output.is_empty() {
        String::new()
    } else {
        format!("\n{}", output)
    }
}

pub struct FlowCheckRunner {
    executor: RemoteExecutor,
    trigger_executor: Option<RemoteExecutor>,
    poller: PollExecutor,
    observer_config: ObserverConfig,
}

impl FlowCheckRunner {
    pub fn new(executor: RemoteExecutor, poller: PollExecutor, observer_config: ObserverConfig) -> Self {
        Self {
            executor,
            trigger_executor: None,
            poller,
            observer_config,
        }
    }

    /// Run triggers through `executor` instead of the observing one.
    pub fn with_trigger_executor(mut self, executor: RemoteExecutor) -> Self {
        self.trigger_executor = Some(executor);
        self
    }

    pub async fn run(&self, check: &FlowCheck) -> Result<CheckReport, CheckError> {
        let observer =
            StreamingObserver::start(&self.executor, &check.observe, self.observer_config.clone())
                .await
                .map_err(CheckError::Observer)?;
        tracing::info!(observer = %observer.id(), "Observing {}", check.observe);

        // The deadline starts before the trigger runs
        let request = WaitRequest::new(check.filter.clone(), check.timeout);

        let trigger = async {
            let invocation = check.trigger.as_ref()?;
            let result = self.run_trigger(invocation, check.timeout).await;
            if result.is_err() {
                observer.stop().await;
            }
            Some(result)
        };
        let (trigger, waited) = tokio::join!(trigger, observer.wait(request));

        observer.stop().await;
        let trigger = trigger.transpose()?;
        let matched = match waited {
            Ok(matched) => matched,
            Err(e) => {
                tracing::debug!(observer = %observer.id(), "Observed output:\n{}", observer.output_pretty_print());
                return Err(e.into());
            }
        };
        tracing::info!(
            observer = %observer.id(),
            "Matched '{}' after {:?}",
            check.filter,
            matched.elapsed
        );

        let metrics = match &check.metrics {
            Some(metrics) => Some(
                self.poller
                    .poll_until(&metrics.invocation, &metrics.expected, metrics.timeout)
                    .await?,
            ),
            None => None,
        };

        Ok(CheckReport {
            observer: observer.id(),
            matched,
            trigger,
            metrics,
            lines_received: observer.lines_received(),
            lines_dropped: observer.lines_dropped(),
        })
    }

    async fn run_trigger(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<RemoteOutput, CheckError> {
        let invocation = invocation.or_timeout(timeout);
        let output = self
            .trigger_executor
            .as_ref()
            .unwrap_or(&self.executor)
            .run(&invocation, &CancellationToken::new())
            .await
            .map_err(|e| CheckError::Trigger {
                command: invocation.to_string(),
                reason: e.to_string(),
                output: String::new(),
            })?;

        if !output.success() {
            return Err(CheckError::Trigger {
                command: invocation.to_string(),
                reason: output.status.to_string(),
                output: output.output,
            });
        }
        tracing::debug!("Trigger {} finished in {:?}", invocation, output.duration);
        Ok(output)
    }
}
