use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::buffer::TailBuffer;
use super::types::{
    Diagnostics, MatchResult, ObservedLine, ObserverConfig, ObserverState, WaitError, WaitRequest,
};
use crate::extract::LineFilter;
use crate::remote::{Invocation, RemoteExecutor};
use crate::subprocess::handle::{signal_process_group, GroupSignal};
use crate::subprocess::{ProcessError, ProcessHandle};

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    dropped: AtomicU64,
    /// Sequence number of the newest line that did not fit in the channel
    last_dropped: AtomicU64,
    /// Dropped lines the tail had already evicted when a wait went looking for them
    lost: AtomicU64,
}

/// Consumer side of the line channel. Held by at most one wait at a time.
struct Scanner {
    rx: mpsc::Receiver<ObservedLine>,
    /// Highest sequence number handed to a wait
    last_seq: u64,
    /// Every line below this sequence number is scanned, queued in `backlog` or lost
    next_seq: u64,
    /// Lines taken off the channel or recovered from the tail but not yet scanned,
    /// including a line that arrived after the deadline of the wait that received it
    backlog: VecDeque<ObservedLine>,
}

/// Watches the output of a long-running command.
///
/// One background task drains the process output into a bounded channel and the
/// diagnostic tail; waits consume the channel in emission order. Timing out a wait
/// leaves the process running. [`StreamingObserver::stop`] (or dropping the
/// observer) terminates it.
pub struct StreamingObserver {
    id: Uuid,
    command: String,
    pid: Option<u32>,
    state: Arc<Mutex<ObserverState>>,
    tail: Arc<TailBuffer>,
    counters: Arc<Counters>,
    scanner: tokio::sync::Mutex<Scanner>,
    stop: CancellationToken,
    producer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StreamingObserver {
    /// Start `invocation` as a stream and begin observing it.
    pub async fn start(
        executor: &RemoteExecutor,
        invocation: &Invocation,
        config: ObserverConfig,
    ) -> Result<Self, ProcessError> {
        let handle = executor.start(invocation).await?;
        Ok(Self::from_handle(handle, config))
    }

    /// Observe an already running process. Must be called from within a tokio runtime.
    pub fn from_handle(handle: ProcessHandle, config: ObserverConfig) -> Self {
        let id = Uuid::new_v4();
        let command = handle.command().to_string();
        let pid = handle.pid();
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));

        let state = Arc::new(Mutex::new(ObserverState::Created));
        let tail = Arc::new(TailBuffer::new(config.tail_size));
        let counters = Arc::new(Counters::default());
        let stop = CancellationToken::new();

        let producer = Producer {
            id,
            handle,
            tx,
            tail: Arc::clone(&tail),
            counters: Arc::clone(&counters),
            state: Arc::clone(&state),
            stop: stop.clone(),
            grace: config.stop_grace,
        };
        set_state(&state, ObserverState::Running);
        let task = tokio::spawn(producer.run());

        tracing::debug!(observer = %id, "Observing '{}' (pid {:?})", command, pid);

        Self {
            id,
            command,
            pid,
            state,
            tail,
            counters,
            scanner: tokio::sync::Mutex::new(Scanner {
                rx,
                last_seq: 0,
                next_seq: 1,
                backlog: VecDeque::new(),
            }),
            stop,
            producer: tokio::sync::Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn state(&self) -> ObserverState {
        lock_state(&self.state).clone()
    }

    pub fn lines_received(&self) -> u64 {
        self.counters.received.load(Ordering::Relaxed)
    }

    pub fn lines_dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Dropped lines that were no longer in the tail when a wait needed them
    pub fn lines_lost(&self) -> u64 {
        self.counters.lost.load(Ordering::Relaxed)
    }

    /// Retained output, oldest first
    pub fn tail(&self) -> Vec<String> {
        self.tail.texts()
    }

    /// Retained output formatted for a failure message
    pub fn output_pretty_print(&self) -> String {
        let lines = self.tail.texts();
        if lines.is_empty() {
            return format!("<no output from '{}'>", self.command);
        }
        let mut out = format!("output of '{}' (last {} lines):\n", self.command, lines.len());
        for line in lines {
            out.push('\t');
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    /// Wait until a line whose `filter` field matches arrives, or `timeout` passes.
    pub async fn wait_for_match(
        &self,
        filter: LineFilter,
        timeout: Duration,
    ) -> Result<MatchResult, WaitError> {
        self.wait(WaitRequest::new(filter, timeout)).await
    }

    pub async fn wait(&self, request: WaitRequest) -> Result<MatchResult, WaitError> {
        let started = Instant::now();
        let mut scanned = 0u64;

        let mut scanner = tokio::select! {
            biased;
            _ = self.stop.cancelled() => {
                return Err(self.stopped(&request, started, scanned));
            }
            guard = self.scanner.lock() => guard,
            _ = tokio::time::sleep_until(request.deadline) => {
                return Err(self.timed_out(&request, started, scanned));
            }
        };

        self.transition(ObserverState::Running);
        tracing::trace!(observer = %self.id, "Waiting for {}", request.filter);

        if request.rescan_tail {
            for line in self.tail.snapshot_through(scanner.last_seq) {
                scanned += 1;
                if let Some(result) = self.try_match(&request, line, started, scanned) {
                    return Ok(result);
                }
            }
        }

        loop {
            if self.stop.is_cancelled() {
                return Err(self.stopped(&request, started, scanned));
            }

            let line = match self.next_ready(&mut scanner) {
                Some(line) => line,
                None => tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => {
                        return Err(self.stopped(&request, started, scanned));
                    }
                    next = scanner.rx.recv() => match next {
                        Some(line) => {
                            self.accept(&mut scanner, line);
                            continue;
                        }
                        None if self.stop.is_cancelled() => {
                            return Err(self.stopped(&request, started, scanned));
                        }
                        None => return Err(self.stream_ended(&request, started, scanned)),
                    },
                    _ = tokio::time::sleep_until(request.deadline) => {
                        return Err(self.timed_out(&request, started, scanned));
                    }
                },
            };

            // Lines that arrived after the deadline are left for the next wait
            if line.received_at > request.deadline {
                scanner.backlog.push_front(line);
                return Err(self.timed_out(&request, started, scanned));
            }

            scanner.last_seq = line.seq;
            scanned += 1;
            if let Some(result) = self.try_match(&request, line, started, scanned) {
                return Ok(result);
            }
        }
    }

    /// Pid of the observed process while the producer has not yet reaped it.
    pub(super) fn live_pid(&mut self) -> Option<u32> {
        let running = self
            .producer
            .get_mut()
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        if running {
            self.pid
        } else {
            None
        }
    }

    /// The next unscanned line that is available without waiting.
    fn next_ready(&self, scanner: &mut Scanner) -> Option<ObservedLine> {
        loop {
            if let Some(line) = scanner.backlog.pop_front() {
                return Some(line);
            }
            match scanner.rx.try_recv() {
                Ok(line) => self.accept(scanner, line),
                Err(_) => {
                    // Nothing buffered; lines dropped after the last delivered one are
                    // only left in the tail
                    let dropped = self.counters.last_dropped.load(Ordering::Acquire);
                    if dropped < scanner.next_seq {
                        return None;
                    }
                    self.recover(scanner, dropped + 1);
                }
            }
        }
    }

    /// Queue a line from the channel behind any dropped lines that preceded it.
    fn accept(&self, scanner: &mut Scanner, line: ObservedLine) {
        if line.seq < scanner.next_seq {
            return;
        }
        self.recover(scanner, line.seq);
        scanner.next_seq = line.seq + 1;
        scanner.backlog.push_back(line);
    }

    /// Queue the retained lines in `next_seq..until` that never reached the channel.
    fn recover(&self, scanner: &mut Scanner, until: u64) {
        if until <= scanner.next_seq {
            return;
        }
        let missing = until - scanner.next_seq;
        let found = self.tail.snapshot_range(scanner.next_seq, until);
        let lost = missing.saturating_sub(found.len() as u64);
        if lost > 0 {
            self.counters.lost.fetch_add(lost, Ordering::Relaxed);
            tracing::warn!(
                observer = %self.id,
                "{} dropped lines before line {} were evicted from the tail unscanned",
                lost,
                until
            );
        }
        tracing::trace!(
            observer = %self.id,
            "Recovered {} dropped lines from the tail",
            found.len()
        );
        scanner.backlog.extend(found);
        scanner.next_seq = until;
    }

    /// Terminate the process and wait for the producer to finish. Safe to call
    /// repeatedly and while waits are pending; those resolve with `Stopped`.
    pub async fn stop(&self) {
        self.stop.cancel();
        {
            let mut state = lock_state(&self.state);
            if !matches!(*state, ObserverState::Failed { .. }) {
                *state = ObserverState::Stopped;
            }
        }

        let mut producer = self.producer.lock().await;
        if let Some(task) = producer.take() {
            if let Err(e) = task.await {
                tracing::warn!(observer = %self.id, "Observer task ended abnormally: {}", e);
            }
            tracing::debug!(
                observer = %self.id,
                "Stopped observing '{}' after {} lines ({} dropped)",
                self.command,
                self.lines_received(),
                self.lines_dropped()
            );
        }
    }

    /// Wait outcomes never override `Stopped` or `Failed`.
    fn transition(&self, next: ObserverState) {
        let mut state = lock_state(&self.state);
        if !state.is_terminal() {
            *state = next;
        }
    }

    fn try_match(
        &self,
        request: &WaitRequest,
        line: ObservedLine,
        started: Instant,
        scanned: u64,
    ) -> Option<MatchResult> {
        let value = request.filter.matching_value(&line.text)?;
        tracing::debug!(
            observer = %self.id,
            "Matched {} on line {} after {:?}",
            request.filter,
            line.seq,
            started.elapsed()
        );
        self.transition(ObserverState::Matched);
        Some(MatchResult {
            line,
            value,
            elapsed: started.elapsed(),
            lines_scanned: scanned,
        })
    }

    fn diagnostics(&self, started: Instant, scanned: u64) -> Diagnostics {
        Diagnostics {
            elapsed: started.elapsed(),
            lines_scanned: scanned,
            lines_dropped: self.lines_dropped(),
            lines_lost: self.lines_lost(),
            tail: self.tail.texts(),
        }
    }

    fn timed_out(&self, request: &WaitRequest, started: Instant, scanned: u64) -> WaitError {
        self.transition(ObserverState::TimedOut);
        tracing::debug!(observer = %self.id, "Timed out waiting for {}", request.filter);
        WaitError::Timeout {
            filter: request.filter.to_string(),
            diagnostics: self.diagnostics(started, scanned),
        }
    }

    fn stopped(&self, request: &WaitRequest, started: Instant, scanned: u64) -> WaitError {
        WaitError::Stopped {
            filter: request.filter.to_string(),
            diagnostics: self.diagnostics(started, scanned),
        }
    }

    fn stream_ended(&self, request: &WaitRequest, started: Instant, scanned: u64) -> WaitError {
        WaitError::StreamEnded {
            filter: request.filter.to_string(),
            diagnostics: self.diagnostics(started, scanned),
        }
    }
}

impl Drop for StreamingObserver {
    fn drop(&mut self) {
        if self.stop.is_cancelled() && self.producer.get_mut().is_none() {
            return;
        }
        self.stop.cancel();
        // Once the producer has finished, the process is reaped and its pid may be reused
        if let Some(pid) = self.live_pid() {
            signal_process_group(Some(pid), GroupSignal::Kill);
            tracing::debug!(observer = %self.id, "Observer dropped, killed '{}'", self.command);
        }
        if let Some(task) = self.producer.get_mut().take() {
            // Dropping the process handle inside the task kills the child
            task.abort();
        }
    }
}

impl std::fmt::Debug for StreamingObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingObserver")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// The single writer: drains the process into the tail and the channel.
struct Producer {
    id: Uuid,
    handle: ProcessHandle,
    tx: mpsc::Sender<ObservedLine>,
    tail: Arc<TailBuffer>,
    counters: Arc<Counters>,
    state: Arc<Mutex<ObserverState>>,
    stop: CancellationToken,
    grace: Duration,
}

impl Producer {
    async fn run(mut self) {
        let mut seq = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    self.terminate().await;
                    return;
                }
                next = self.handle.next_line() => match next {
                    Some(Ok(output)) => {
                        seq += 1;
                        self.publish(ObservedLine::new(seq, output.source, output.text));
                    }
                    Some(Err(e)) => {
                        tracing::warn!(observer = %self.id, "Error reading output: {}", e);
                    }
                    None => break,
                }
            }
        }

        let status = tokio::select! {
            biased;
            _ = self.stop.cancelled() => {
                self.terminate().await;
                return;
            }
            status = self.handle.wait() => status,
        };

        match status {
            Ok(status) => {
                tracing::debug!(
                    observer = %self.id,
                    "'{}' exited on its own with {}",
                    self.handle.command(),
                    status
                );
                let mut state = lock_state(&self.state);
                if !matches!(*state, ObserverState::Stopped) {
                    *state = ObserverState::Failed { status };
                }
            }
            Err(e) => {
                tracing::warn!(observer = %self.id, "Failed to reap '{}': {}", self.handle.command(), e);
            }
        }
    }

    fn publish(&self, line: ObservedLine) {
        tracing::trace!(observer = %self.id, seq = line.seq, "{}", line.text);
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.tail.push(line.clone());

        match self.tx.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(line)) => {
                self.counters.last_dropped.store(line.seq, Ordering::Release);
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    observer = %self.id,
                    "Line {} missed the channel, no wait is keeping up ({} so far)",
                    line.seq,
                    dropped
                );
            }
            // The observer is gone; keep draining until the stop signal lands
            Err(TrySendError::Closed(_)) => {}
        }
    }

    async fn terminate(&mut self) {
        match self.handle.kill_and_wait(self.grace).await {
            Ok(status) => {
                tracing::debug!(observer = %self.id, "'{}' terminated: {}", self.handle.command(), status)
            }
            Err(e) => {
                tracing::warn!(observer = %self.id, "Failed to terminate '{}': {}", self.handle.command(), e)
            }
        }
    }
}

fn lock_state(state: &Mutex<ObserverState>) -> std::sync::MutexGuard<'_, ObserverState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_state(state: &Mutex<ObserverState>, next: ObserverState) {
    *lock_state(state) = next;
}
