use super::*;
use crate::subprocess::MockProcessRunner;

fn agent_target() -> RemoteTarget {
    RemoteTarget::new("kube-system", "hubble-cli-x7k2p")
}

fn mock_executor(mock: &MockProcessRunner) -> RemoteExecutor {
    RemoteExecutor::new(
        Arc::new(mock.clone()),
        Arc::new(KubectlTransport::default()),
    )
}

#[test]
fn test_builder_splits_command_line() {
    let invocation = Invocation::builder(agent_target())
        .command_line("hubble observe --from-pod 'default/app two'")
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(
        invocation.argv(),
        ["hubble", "observe", "--from-pod", "default/app two"]
    );
    assert_eq!(invocation.mode(), ExecutionMode::OneShot);
}

#[test]
fn test_builder_rejects_unbalanced_quotes() {
    let err = Invocation::builder(agent_target())
        .command_line("echo 'unterminated")
        .err()
        .unwrap();
    assert!(matches!(err, ProcessError::InvalidCommand { .. }));
}

#[test]
fn test_builder_rejects_empty_command() {
    let err = Invocation::builder(agent_target()).build().unwrap_err();
    assert!(err.to_string().contains("empty command"));
}

#[test]
fn test_target_display() {
    assert_eq!(agent_target().to_string(), "kube-system/hubble-cli-x7k2p");
    assert_eq!(
        agent_target().with_container("cilium-agent").to_string(),
        "kube-system/hubble-cli-x7k2p:cilium-agent"
    );
    assert_eq!(RemoteTarget::local().to_string(), "localhost");
}

#[test]
fn test_kubectl_transport_command() {
    let invocation = Invocation::builder(agent_target().with_container("agent"))
        .args(["cilium", "status"])
        .build()
        .unwrap();

    let command = KubectlTransport::new("/usr/local/bin/kubectl")
        .command(&invocation)
        .unwrap();

    assert_eq!(command.program, "/usr/local/bin/kubectl");
    assert_eq!(
        command.args,
        [
            "exec",
            "-n",
            "kube-system",
            "hubble-cli-x7k2p",
            "-c",
            "agent",
            "--",
            "cilium",
            "status"
        ]
    );
    assert!(command.stdin.is_none());
}

#[test]
fn test_kubectl_transport_passes_stdin_interactively() {
    let invocation = Invocation::builder(agent_target())
        .arg("cat")
        .stdin("payload")
        .build()
        .unwrap();

    let command = KubectlTransport::default().command(&invocation).unwrap();
    assert!(command.args.contains(&"-i".to_string()));
    assert_eq!(command.stdin.as_deref(), Some("payload"));
}

#[test]
fn test_local_transport_ignores_target() {
    let invocation = Invocation::builder(agent_target())
        .args(["echo", "hi"])
        .build()
        .unwrap();

    let command = LocalTransport.command(&invocation).unwrap();
    assert_eq!(command.program, "echo");
    assert_eq!(command.args, ["hi"]);
}

#[tokio::test]
async fn test_run_returns_combined_output_on_failure() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("kubectl")
        .returns_stdout("partial\n")
        .returns_stderr("curl: (22) 503\n")
        .returns_exit_code(22)
        .finish();

    let invocation = Invocation::builder(agent_target())
        .command_line("curl -s --fail http://10.0.0.1/public")
        .unwrap()
        .build()
        .unwrap();

    let output = mock_executor(&mock)
        .run(&invocation, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!output.success());
    assert_eq!(output.status, ExitStatus::Error(22));
    assert_eq!(output.output, "partial\ncurl: (22) 503\n");
}

#[tokio::test]
async fn test_one_shot_honors_timeout_and_streaming_does_not() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("kubectl").finish();
    mock.expect_stream("kubectl").finish();

    let executor = mock_executor(&mock);
    let invocation = Invocation::builder(agent_target())
        .arg("true")
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    executor
        .run(&invocation, &CancellationToken::new())
        .await
        .unwrap();
    let _handle = executor.start(&invocation).await.unwrap();

    let history = mock.get_call_history();
    assert_eq!(history[0].timeout, Some(Duration::from_secs(5)));
    assert_eq!(history[1].timeout, None);
}

#[tokio::test]
async fn test_cancelled_run_is_distinct_from_failure() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("kubectl")
        .takes(Duration::from_secs(60))
        .finish();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let invocation = Invocation::builder(agent_target())
        .arg("sleep")
        .build()
        .unwrap();
    let err = mock_executor(&mock)
        .run(&invocation, &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_start_reports_launch_failure_synchronously() {
    let mut mock = MockProcessRunner::new();
    mock.expect_stream("kubectl").fails_to_launch().finish();

    let invocation = Invocation::builder(agent_target())
        .args(["hubble", "observe", "--follow"])
        .streaming()
        .build()
        .unwrap();

    let err = mock_executor(&mock).start(&invocation).await.unwrap_err();
    assert!(err.is_launch_failure());
}

#[tokio::test]
async fn test_local_executor_runs_real_process() {
    let invocation = Invocation::builder(RemoteTarget::local())
        .command_line("sh -c 'echo out; echo err >&2; exit 1'")
        .unwrap()
        .build()
        .unwrap();

    let output = RemoteExecutor::local()
        .run(&invocation, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(output.output, "out\nerr\n");
}
