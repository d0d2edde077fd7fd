use super::*;
use crate::remote::{LocalTransport, RemoteTarget};
use crate::subprocess::MockProcessRunner;
use std::sync::Arc;

fn poller(mock: &MockProcessRunner) -> PollExecutor {
    let executor = RemoteExecutor::new(Arc::new(mock.clone()), Arc::new(LocalTransport));
    PollExecutor::new(executor, PollConfig::default())
}

fn endpoint_query() -> Invocation {
    Invocation::builder(RemoteTarget::new("kube-system", "cilium-abcde"))
        .args(["cilium", "endpoint", "get", "pod-name:app1-7d9f"])
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_succeeds_on_first_attempt() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("cilium")
        .returns_stdout("<ingress/80/tcp/http>\n")
        .finish();

    let matched = poller(&mock)
        .poll_until(&endpoint_query(), "<ingress/80/tcp/http>", Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(matched.attempts, 1);
    assert_eq!(matched.elapsed, Duration::ZERO);
    assert!(mock.verify_called("cilium", 1));
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_unsatisfied_fails_after_one_attempt() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("cilium").returns_stdout("").finish();

    let err = poller(&mock)
        .poll_until(&endpoint_query(), "<ingress/80/tcp/http>", Duration::ZERO)
        .await
        .unwrap_err();

    assert_eq!(err.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_count_follows_interval() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("cilium")
        .returns_stdout("<none>\n")
        .finish();

    let err = poller(&mock)
        .poll_until(
            &endpoint_query(),
            "<ingress/80/tcp/http>",
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();

    // One attempt at t=0 plus one per elapsed interval
    assert_eq!(err.attempts(), 11);
    assert_eq!(mock.call_count("cilium"), 11);
    match &err {
        PollError::Timeout { elapsed, .. } => assert_eq!(*elapsed, Duration::from_secs(10)),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(err.last_output(), Some("<none>\n"));
    assert!(err.to_string().contains("last output:\n<none>"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_attempts_are_retried() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("cilium")
        .returns_stderr("Error: endpoint not found\n")
        .returns_exit_code(1)
        .times(2)
        .finish();
    mock.expect_command("cilium")
        .returns_stdout("<ingress/80/tcp/http>\n")
        .finish();

    let matched = poller(&mock)
        .poll_until(
            &endpoint_query(),
            "<ingress/80/tcp/http>",
            Duration::from_secs(30),
        )
        .await
        .unwrap();

    assert_eq!(matched.attempts, 3);
    assert_eq!(matched.elapsed, Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_non_zero_exit_never_matches() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("cilium")
        .returns_stdout("<ingress/80/tcp/http>\n")
        .returns_exit_code(2)
        .finish();

    let err = poller(&mock)
        .poll_until(
            &endpoint_query(),
            "<ingress/80/tcp/http>",
            Duration::from_secs(3),
        )
        .await
        .unwrap_err();

    match err {
        PollError::Timeout { last_error, .. } => {
            assert_eq!(last_error.as_deref(), Some("exit code 2"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_launch_errors_are_recorded() {
    // No expectation: every attempt fails before producing output
    let mock = MockProcessRunner::new();

    let err = poller(&mock)
        .poll_until(&endpoint_query(), "anything", Duration::from_secs(2))
        .await
        .unwrap_err();

    match err {
        PollError::Timeout {
            attempts,
            last_output,
            last_error,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert!(last_output.is_none());
            assert!(last_error.unwrap().contains("No expectation found"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_attempt_is_bounded() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("cilium")
        .takes(Duration::from_secs(60))
        .times(1)
        .finish();
    mock.expect_command("cilium").returns_stdout("ready").finish();

    let matched = poller(&mock)
        .poll_until(&endpoint_query(), "ready", Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(matched.attempts, 2);
    assert!(mock.get_call_history()[0].timeout.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_hung_attempt_is_cut_at_global_deadline() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("cilium")
        .takes(Duration::from_secs(600))
        .finish();

    let err = poller(&mock)
        .poll_until(&endpoint_query(), "ready", Duration::from_secs(2))
        .await
        .unwrap_err();

    match err {
        PollError::Timeout {
            attempts,
            elapsed,
            last_error,
            ..
        } => {
            assert_eq!(attempts, 1);
            assert_eq!(elapsed, Duration::from_secs(2));
            assert!(last_error.unwrap().contains("poll deadline"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_lets_first_attempt_finish() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("cilium")
        .returns_stdout("<ingress/80/tcp/http>\n")
        .takes(Duration::from_secs(3))
        .finish();

    let matched = poller(&mock)
        .poll_until(&endpoint_query(), "<ingress/80/tcp/http>", Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(matched.attempts, 1);
    assert_eq!(matched.elapsed, Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_polling() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("cilium").returns_stdout("").finish();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        trigger.cancel();
    });

    let err = poller(&mock)
        .with_cancellation(cancel)
        .poll_until(&endpoint_query(), "ready", Duration::from_secs(60))
        .await
        .unwrap_err();

    assert!(matches!(err, PollError::Cancelled { attempts: 3, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_poll_until_with_predicate() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("cilium")
        .returns_stdout("hubble_flows_processed_total{type=\"Trace\"} 0\n")
        .times(1)
        .finish();
    mock.expect_command("cilium")
        .returns_stdout("hubble_flows_processed_total{type=\"Trace\"} 4\n")
        .finish();

    let matched = poller(&mock)
        .poll_until_with(
            &endpoint_query(),
            "a non-zero counter",
            Duration::from_secs(5),
            |output| output.lines().any(|line| !line.ends_with(" 0")),
        )
        .await
        .unwrap();

    assert_eq!(matched.attempts, 2);
}
