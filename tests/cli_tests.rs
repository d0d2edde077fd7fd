//! Integration tests for the CLI interface

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn flowprobe() -> Command {
    Command::cargo_bin("flowprobe").unwrap()
}

#[test]
fn test_cli_help_flag() {
    flowprobe()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("observe"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_invalid_command() {
    flowprobe()
        .arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_extract_prints_field_per_line() {
    flowprobe()
        .args(["extract", "--field", "{$.Type}"])
        .write_stdin("{\"Type\":\"L3_L4\"}\nnot json\n{\"Type\":\"L7\"}\n")
        .assert()
        .success()
        .stdout("L3_L4\nL7\n");
}

#[test]
fn test_extract_without_any_value_fails() {
    flowprobe()
        .args(["extract", "--field", "flow.verdict"])
        .write_stdin("{\"Type\":\"L7\"}\n")
        .assert()
        .code(6)
        .stderr(predicate::str::contains("flow.verdict"));
}

#[test]
fn test_bad_field_path_is_config_error() {
    flowprobe()
        .args(["extract", "--field", "a["])
        .write_stdin("{}\n")
        .assert()
        .code(2);
}

#[test]
fn test_missing_config_file() {
    let dir = TempDir::new().unwrap();
    flowprobe()
        .arg("--config")
        .arg(dir.path().join("missing.yaml"))
        .args(["extract", "--field", "{$.Type}"])
        .write_stdin("{\"Type\":\"L7\"}\n")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("missing.yaml"));
}

#[test]
fn test_invalid_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flowprobe.yaml");
    fs::write(&path, "tail_size: 0\n").unwrap();

    flowprobe()
        .arg("--config")
        .arg(&path)
        .args(["extract", "--field", "{$.Type}"])
        .write_stdin("{\"Type\":\"L7\"}\n")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("tail_size"));
}

#[test]
fn test_observe_local_stream_matches() {
    flowprobe()
        .args([
            "observe",
            "--field",
            "{$.Type}",
            "--equals",
            "L7",
            "--timeout",
            "10s",
            "--",
            "sh",
            "-c",
            r#"echo '{"Type":"L3_L4"}'; echo '{"Type":"L7","verdict":"FORWARDED"}'; sleep 30"#,
        ])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success()
        .stdout(predicate::str::contains("FORWARDED"));
}

#[test]
fn test_observe_timeout_exits_with_observation_code() {
    flowprobe()
        .args([
            "observe",
            "--field",
            "{$.Type}",
            "--equals",
            "L7",
            "--timeout",
            "300ms",
            "--",
            "sh",
            "-c",
            r#"echo '{"Type":"L3_L4"}'; sleep 30"#,
        ])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .code(6)
        .stderr(predicate::str::contains("L3_L4"));
}

#[test]
fn test_observe_requires_a_matcher() {
    flowprobe()
        .args(["observe", "--field", "{$.Type}", "--", "sh", "-c", "true"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--equals"));
}

#[test]
fn test_poll_local_command() {
    flowprobe()
        .args([
            "poll",
            "--expect",
            "hubble_flows_processed_total",
            "--timeout",
            "2s",
            "--interval",
            "100ms",
            "--",
            "echo",
            "hubble_flows_processed_total{type=\"Trace\"} 3",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("hubble_flows_processed_total"));
}

#[test]
fn test_check_trigger_conflicts_with_trigger_url() {
    flowprobe()
        .args([
            "check",
            "--field",
            "{$.Type}",
            "--equals",
            "L7",
            "--trigger",
            "true",
            "--trigger-url",
            "http://10.96.0.12/public",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}
