//! Integration tests for poll-until-match against real commands

use flowprobe::poll::{PollConfig, PollError, PollExecutor};
use flowprobe::remote::{Invocation, RemoteExecutor, RemoteTarget};
use std::time::Duration;
use tempfile::TempDir;

fn poller() -> PollExecutor {
    PollExecutor::new(
        RemoteExecutor::local(),
        PollConfig {
            interval: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(5),
        },
    )
}

fn shell(script: &str) -> Invocation {
    Invocation::builder(RemoteTarget::local())
        .args(["sh", "-c", script])
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_poll_until_state_file_is_written() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("proxy-state");
    let counter = dir.path().join("attempts");

    // Third run reports the redirect as applied
    let script = format!(
        "echo x >> {counter}; if [ $(wc -l < {counter}) -ge 3 ]; then echo '<ingress/80/tcp/http>' > {marker}; fi; cat {marker} 2>/dev/null || echo none",
        counter = counter.display(),
        marker = marker.display()
    );

    let matched = poller()
        .poll_until(&shell(&script), "<ingress/80/tcp/http>", Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(matched.attempts, 3);
    assert_eq!(matched.output.trim(), "<ingress/80/tcp/http>");
}

#[tokio::test]
async fn test_failing_command_never_matches() {
    let err = poller()
        .poll_until(
            &shell("echo '<ingress/80/tcp/http>'; exit 1"),
            "<ingress/80/tcp/http>",
            Duration::from_millis(350),
        )
        .await
        .unwrap_err();

    match err {
        PollError::Timeout {
            attempts,
            last_output,
            ..
        } => {
            assert!(attempts >= 2);
            assert!(last_output.unwrap().contains("<ingress/80/tcp/http>"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}
