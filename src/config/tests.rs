use super::*;
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = ProbeConfig::default();
    assert_eq!(config.kubectl, "kubectl");
    assert_eq!(config.agent_namespace, "kube-system");
    assert_eq!(config.wait_timeout, Duration::from_secs(30));
    assert_eq!(config.poll_interval, Duration::from_secs(1));
    assert_eq!(config.poll_timeout, Duration::from_secs(240));
    assert_eq!(config.tail_size, 200);
    assert_eq!(config.channel_capacity, 10_000);
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_yaml_keeps_defaults() {
    let config = ProbeConfig::from_yaml(
        r#"
hubble: /usr/local/bin/hubble
wait_timeout: 1m 30s
poll_interval: 500ms
"#,
    )
    .unwrap();

    assert_eq!(config.hubble, "/usr/local/bin/hubble");
    assert_eq!(config.wait_timeout, Duration::from_secs(90));
    assert_eq!(config.poll_interval, Duration::from_millis(500));
    assert_eq!(config.kubectl, "kubectl");
    assert_eq!(config.stop_grace, Duration::from_secs(2));
}

#[test]
fn test_empty_yaml_is_default() {
    assert_eq!(ProbeConfig::from_yaml("\n").unwrap(), ProbeConfig::default());
}

#[test]
fn test_unknown_field_rejected() {
    assert!(ProbeConfig::from_yaml("wait_timout: 10s\n").is_err());
}

#[test]
fn test_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flowprobe.yaml");
    fs::write(&path, "tail_size: 50\nagent_namespace: cilium\n").unwrap();

    let config = ProbeConfig::from_file(&path).unwrap();
    assert_eq!(config.tail_size, 50);
    assert_eq!(config.agent_namespace, "cilium");
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = ProbeConfig::from_file(&dir.path().join("missing.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_malformed_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.yaml");
    fs::write(&path, "wait_timeout: [1, 2\n").unwrap();

    let err = ProbeConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("bad.yaml"));
}

#[test]
fn test_env_overrides() {
    let mut config = ProbeConfig::default();
    config
        .apply_env(env(&[
            ("FLOWPROBE_KUBECTL", "/opt/k8s/kubectl"),
            ("FLOWPROBE_WAIT_TIMEOUT", "45s"),
            ("FLOWPROBE_POLL_TIMEOUT", "2m"),
            ("FLOWPROBE_TAIL_SIZE", "25"),
        ]))
        .unwrap();

    assert_eq!(config.kubectl, "/opt/k8s/kubectl");
    assert_eq!(config.wait_timeout, Duration::from_secs(45));
    assert_eq!(config.poll_timeout, Duration::from_secs(120));
    assert_eq!(config.tail_size, 25);
    assert_eq!(config.hubble, "hubble");
}

#[test]
fn test_env_bad_values() {
    let mut config = ProbeConfig::default();
    let err = config
        .apply_env(env(&[("FLOWPROBE_POLL_INTERVAL", "soon")]))
        .unwrap_err();
    match err {
        ConfigError::Env { var, .. } => assert_eq!(var, "FLOWPROBE_POLL_INTERVAL"),
        other => panic!("expected env error, got {other:?}"),
    }

    let err = config
        .apply_env(env(&[("FLOWPROBE_CHANNEL_CAPACITY", "-1")]))
        .unwrap_err();
    assert!(err.to_string().contains("FLOWPROBE_CHANNEL_CAPACITY"));
}

#[test]
fn test_validate_collects_every_problem() {
    let config = ProbeConfig {
        poll_interval: Duration::ZERO,
        tail_size: 0,
        channel_capacity: 0,
        ..ProbeConfig::default()
    };

    match config.validate().unwrap_err() {
        ConfigError::Invalid(errors) => {
            assert_eq!(errors.len(), 3);
            assert!(errors[0].contains("poll_interval"));
        }
        other => panic!("expected invalid config, got {other:?}"),
    }
}

#[test]
fn test_zero_timeouts_are_allowed() {
    let config = ProbeConfig {
        wait_timeout: Duration::ZERO,
        poll_timeout: Duration::ZERO,
        ..ProbeConfig::default()
    };
    assert!(config.validate().is_ok());
}

#[test]
fn test_component_configs() {
    let config = ProbeConfig {
        tail_size: 10,
        poll_interval: Duration::from_millis(250),
        ..ProbeConfig::default()
    };
    assert_eq!(config.observer_config().tail_size, 10);
    assert_eq!(config.observer_config().stop_grace, Duration::from_secs(2));
    assert_eq!(config.poll_config().interval, Duration::from_millis(250));
}

#[test]
fn test_parse_duration() {
    assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
    assert_eq!(parse_duration(" 1m 30s ").unwrap(), Duration::from_secs(90));
    assert!(parse_duration("30").is_err());
}
