use super::*;
use crate::observe::Diagnostics;
use crate::subprocess::ExitStatus;
use std::time::Duration;

#[test]
fn test_probe_error_construction() {
    let err = ProbeError::config("Configuration file not found");
    assert!(matches!(err, ProbeError::Config { .. }));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(err.code(), ErrorCode::CONFIG_GENERIC);

    let err = ProbeError::execution("Command failed");
    assert_eq!(err.exit_code(), 5);
    assert_eq!(err.code(), ErrorCode::EXEC_GENERIC);

    let err = ProbeError::observation("No flow");
    assert_eq!(err.exit_code(), 6);
    assert_eq!(err.code(), ErrorCode::OBSERVE_GENERIC);

    let err = ProbeError::other("Something happened");
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().starts_with("[E9000]"));
}

#[test]
fn test_context_and_source_chain() {
    let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err = ProbeError::execution("Cannot start hubble")
        .with_source(io_err)
        .with_context("while observing flows");

    assert!(err
        .user_message()
        .contains("Cannot start hubble: while observing flows"));
    let developer = err.developer_message();
    assert!(developer.contains("[E4000]"));
    assert!(developer.contains("caused by: denied"));
}

#[test]
fn test_process_error_conversion() {
    let err: ProbeError = ProcessError::LaunchFailed {
        command: "hubble observe".to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
    }
    .into();
    assert_eq!(err.code(), ErrorCode::EXEC_LAUNCH_FAILED);
    assert!(err.user_message().starts_with("Command 'hubble observe' failed"));

    let err: ProbeError = ProcessError::Timeout(Duration::from_secs(10)).into();
    assert_eq!(err.code(), ErrorCode::EXEC_TIMEOUT);
}

#[test]
fn test_wait_error_conversion() {
    let err: ProbeError = WaitError::Timeout {
        filter: "{$.Type} == \"L7\"".to_string(),
        diagnostics: Diagnostics {
            elapsed: Duration::from_secs(30),
            lines_scanned: 2,
            lines_dropped: 0,
            lines_lost: 0,
            tail: vec![r#"{"Type":"L3_L4"}"#.to_string()],
        },
    }
    .into();

    assert_eq!(err.code(), ErrorCode::OBSERVE_NO_MATCH);
    assert_eq!(err.exit_code(), 6);
    let message = err.user_message();
    assert!(message.starts_with("Expected a line matching"));
    assert!(message.contains(r#"{"Type":"L3_L4"}"#));
}

#[test]
fn test_poll_error_conversion() {
    let err: ProbeError = PollError::Timeout {
        command: "[kube-system/cilium-abcde] cilium endpoint list".to_string(),
        expected: "\"<ingress/80/tcp/http>\"".to_string(),
        attempts: 5,
        elapsed: Duration::from_secs(4),
        last_output: Some("<ingress/80/tcp/none>".to_string()),
        last_error: None,
    }
    .into();
    assert_eq!(err.code(), ErrorCode::OBSERVE_POLL_NO_MATCH);
    assert!(err.user_message().contains("<ingress/80/tcp/none>"));
}

#[test]
fn test_check_trigger_conversion() {
    let err: ProbeError = CheckError::Trigger {
        command: "curl --fail http://10.96.0.12/public".to_string(),
        reason: "exit code 22".to_string(),
        output: "curl: (22) 503\n".to_string(),
    }
    .into();
    assert_eq!(err.code(), ErrorCode::EXEC_TRIGGER_FAILED);
    assert!(err.user_message().contains("exit code 22\ncurl: (22) 503"));
}

#[test]
fn test_visibility_conversion_keeps_exit_code() {
    let err: ProbeError = VisibilityError::CommandFailed {
        command: "kubectl annotate pod".to_string(),
        status: ExitStatus::Error(1),
        output: "error: no objects passed to annotate\n".to_string(),
    }
    .into();
    match err {
        ProbeError::Execution { exit_code, .. } => assert_eq!(exit_code, Some(1)),
        other => panic!("expected execution error, got {other:?}"),
    }
}

#[test]
fn test_config_error_codes() {
    let missing: ProbeError = ConfigError::Read {
        path: "/nope/flowprobe.yaml".into(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
    }
    .into();
    assert_eq!(missing.code(), ErrorCode::CONFIG_NOT_FOUND);

    let invalid: ProbeError = ConfigError::Invalid(vec!["tail_size must be greater than zero".into()]).into();
    assert_eq!(invalid.code(), ErrorCode::CONFIG_VALIDATION_FAILED);
    assert_eq!(invalid.exit_code(), 2);
}

#[test]
fn test_path_and_pattern_errors_are_config_errors() {
    let err: ProbeError = crate::extract::FieldPath::parse("a[").unwrap_err().into();
    assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_FIELD_PATH);

    let err: ProbeError = regex::Regex::new("(").unwrap_err().into();
    assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_PATTERN);
}
