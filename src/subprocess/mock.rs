use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::error::ProcessError;
use super::handle::{LineStream, OutputLine, ProcessControl, ProcessHandle};
use super::runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};

#[derive(Clone)]
pub struct MockProcessRunner {
    expectations: Arc<Mutex<Vec<MockExpectation>>>,
    streams: Arc<Mutex<Vec<MockStreamExpectation>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
    terminations: Arc<AtomicUsize>,
}

type ArgsMatcher = Box<dyn Fn(&[String]) -> bool + Send + Sync>;

struct MockExpectation {
    program: String,
    args_matcher: Option<ArgsMatcher>,
    response: ProcessOutput,
    delay: Duration,
    times_called: usize,
    expected_times: Option<usize>,
}

impl MockExpectation {
    fn exhausted(&self) -> bool {
        self.expected_times
            .is_some_and(|expected| self.times_called >= expected)
    }

    fn matches(&self, command: &ProcessCommand) -> bool {
        self.program == command.program
            && self
                .args_matcher
                .as_ref()
                .map_or(true, |matcher| matcher(&command.args))
    }
}

pub struct MockCommandConfig {
    runner: MockProcessRunner,
    expectation: MockExpectation,
}

/// One step of a scripted stream
#[derive(Debug, Clone)]
enum StreamStep {
    Line(OutputLine),
    Sleep(Duration),
}

struct MockStreamExpectation {
    program: String,
    script: Vec<StreamStep>,
    exit: Option<ExitStatus>,
    launch_error: bool,
}

pub struct MockStreamConfig {
    runner: MockProcessRunner,
    expectation: MockStreamExpectation,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            streams: Arc::new(Mutex::new(Vec::new())),
            call_history: Arc::new(Mutex::new(Vec::new())),
            terminations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn expect_command(&mut self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            expectation: MockExpectation {
                program: program.to_string(),
                args_matcher: None,
                response: ProcessOutput {
                    status: ExitStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: Duration::from_millis(10),
                },
                delay: Duration::ZERO,
                times_called: 0,
                expected_times: None,
            },
        }
    }

    /// Script the output of a streaming process started with `program`.
    pub fn expect_stream(&mut self, program: &str) -> MockStreamConfig {
        MockStreamConfig {
            runner: self.clone(),
            expectation: MockStreamExpectation {
                program: program.to_string(),
                script: Vec::new(),
                exit: None,
                launch_error: false,
            },
        }
    }

    pub fn verify_called(&self, program: &str, times: usize) -> bool {
        self.call_count(program) == times
    }

    pub fn call_count(&self, program: &str) -> usize {
        let history = self.call_history.lock().unwrap();
        history.iter().filter(|cmd| cmd.program == program).count()
    }

    pub fn get_call_history(&self) -> Vec<ProcessCommand> {
        self.call_history.lock().unwrap().clone()
    }

    /// How many scripted streams have been terminated through their handle
    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn reset(&mut self) {
        self.expectations.lock().unwrap().clear();
        self.streams.lock().unwrap().clear();
        self.call_history.lock().unwrap().clear();
        self.terminations.store(0, Ordering::SeqCst);
    }

    /// Find the first matching, non-exhausted expectation. Expectations limited with
    /// `times(n)` fall through to the next match once used up, which lets tests
    /// script a sequence of responses.
    fn next_response(
        &self,
        command: &ProcessCommand,
    ) -> Result<(ProcessOutput, Duration), ProcessError> {
        let mut expectations = self.expectations.lock().unwrap();
        let expectation = expectations
            .iter_mut()
            .find(|e| e.matches(command) && !e.exhausted())
            .ok_or_else(|| {
                ProcessError::MockExpectationNotMet(format!(
                    "No expectation found for command: {} {:?}",
                    command.program, command.args
                ))
            })?;
        expectation.times_called += 1;
        Ok((expectation.response.clone(), expectation.delay))
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run_cancellable(
        &self,
        command: ProcessCommand,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        self.call_history.lock().unwrap().push(command.clone());
        let (response, delay) = self.next_response(&command)?;

        if delay > Duration::ZERO {
            let bounded = command.timeout.map_or(delay, |timeout| delay.min(timeout));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ProcessError::Cancelled {
                        command: command.display(),
                        elapsed: Duration::ZERO,
                    });
                }
                _ = tokio::time::sleep(bounded) => {}
            }
        }

        if let Some(timeout) = command.timeout {
            if delay > timeout {
                return Err(ProcessError::Timeout(timeout));
            }
        }

        Ok(response)
    }

    async fn start(&self, command: ProcessCommand) -> Result<ProcessHandle, ProcessError> {
        self.call_history.lock().unwrap().push(command.clone());

        let expectation = {
            let mut streams = self.streams.lock().unwrap();
            let index = streams
                .iter()
                .position(|s| s.program == command.program)
                .ok_or_else(|| {
                    ProcessError::MockExpectationNotMet(format!(
                        "No stream expectation found for command: {} {:?}",
                        command.program, command.args
                    ))
                })?;
            streams.remove(index)
        };

        if expectation.launch_error {
            return Err(ProcessError::LaunchFailed {
                command: command.display(),
                source: std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "mock launch failure",
                ),
            });
        }

        let (exit_tx, exit_rx) = tokio::sync::watch::channel(None);
        let lines = scripted_stream(expectation.script, expectation.exit.clone(), exit_tx);

        Ok(ProcessHandle::new(
            command.display(),
            None,
            lines,
            Box::new(MockProcessControl {
                exit: exit_rx,
                terminations: Arc::clone(&self.terminations),
            }),
        ))
    }
}

/// Replays the script, then either ends with the configured exit status or stays
/// open until the handle is dropped.
fn scripted_stream(
    script: Vec<StreamStep>,
    exit: Option<ExitStatus>,
    exit_tx: tokio::sync::watch::Sender<Option<ExitStatus>>,
) -> LineStream {
    let steps: VecDeque<StreamStep> = script.into();
    Box::pin(futures::stream::unfold(
        (steps, exit, exit_tx),
        |(mut steps, mut exit, exit_tx)| async move {
            loop {
                match steps.pop_front() {
                    Some(StreamStep::Sleep(delay)) => tokio::time::sleep(delay).await,
                    Some(StreamStep::Line(line)) => {
                        return Some((Ok(line), (steps, exit, exit_tx)));
                    }
                    None => {
                        if let Some(status) = exit.take() {
                            let _ = exit_tx.send(Some(status));
                            return None;
                        }
                        futures::future::pending::<()>().await;
                    }
                }
            }
        },
    ))
}

struct MockProcessControl {
    exit: tokio::sync::watch::Receiver<Option<ExitStatus>>,
    terminations: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessControl for MockProcessControl {
    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status = self
            .exit
            .wait_for(|status| status.is_some())
            .await
            .map_err(|_| ProcessError::InternalError {
                message: "mock stream dropped before exiting".to_string(),
            })?;
        Ok(status.clone().unwrap_or(ExitStatus::Success))
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<ExitStatus, ProcessError> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(ExitStatus::Signal(15))
    }
}

impl MockCommandConfig {
    pub fn with_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.expectation.args_matcher = Some(Box::new(matcher));
        self
    }

    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        self.expectation.response.stdout = stdout.to_string();
        self
    }

    pub fn returns_stderr(mut self, stderr: &str) -> Self {
        self.expectation.response.stderr = stderr.to_string();
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.expectation.response.status = if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        };
        self
    }

    pub fn returns_success(mut self) -> Self {
        self.expectation.response.status = ExitStatus::Success;
        self
    }

    /// Simulate a command that takes `delay` to complete
    pub fn takes(mut self, delay: Duration) -> Self {
        self.expectation.delay = delay;
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.expectation.expected_times = Some(n);
        self
    }

    pub fn finish(self) {
        self.runner
            .expectations
            .lock()
            .unwrap()
            .push(self.expectation);
    }
}

impl MockStreamConfig {
    pub fn emits(mut self, line: &str) -> Self {
        self.expectation
            .script
            .push(StreamStep::Line(OutputLine::stdout(line)));
        self
    }

    pub fn emits_stderr(mut self, line: &str) -> Self {
        self.expectation
            .script
            .push(StreamStep::Line(OutputLine::stderr(line)));
        self
    }

    pub fn emits_after(mut self, delay: Duration, line: &str) -> Self {
        self.expectation.script.push(StreamStep::Sleep(delay));
        self.emits(line)
    }

    /// End the stream after the script with the given exit code
    pub fn exits_with(mut self, code: i32) -> Self {
        self.expectation.exit = Some(if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        });
        self
    }

    pub fn fails_to_launch(mut self) -> Self {
        self.expectation.launch_error = true;
        self
    }

    pub fn finish(self) {
        self.runner.streams.lock().unwrap().push(self.expectation);
    }
}

impl Default for MockProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}
