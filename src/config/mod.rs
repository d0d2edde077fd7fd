//! Runtime configuration
//!
//! Defaults cover a standard cluster. A YAML file passed with `--config` overrides
//! them, and `FLOWPROBE_*` environment variables override the file.

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::observe::ObserverConfig;
use crate::poll::PollConfig;

pub const ENV_PREFIX: &str = "FLOWPROBE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Binary used for `exec`, `annotate` and pod lookups
    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    /// Namespace of the per-node agent pods
    #[serde(default = "default_agent_namespace")]
    pub agent_namespace: String,

    #[serde(default = "default_agent_selector")]
    pub agent_selector: String,

    /// Flow CLI inside the observation pod
    #[serde(default = "default_hubble")]
    pub hubble: String,

    /// Default bound on a wait for a matching line
    #[serde(with = "humantime_serde", default = "default_wait_timeout")]
    pub wait_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    #[serde(with = "humantime_serde", default = "default_poll_timeout")]
    pub poll_timeout: Duration,

    /// Bound on a single polled command
    #[serde(with = "humantime_serde", default = "default_poll_attempt_timeout")]
    pub poll_attempt_timeout: Duration,

    /// Lines retained for failure diagnostics
    #[serde(default = "default_tail_size")]
    pub tail_size: usize,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Time a stopped stream gets between SIGTERM and SIGKILL
    #[serde(with = "humantime_serde", default = "default_stop_grace")]
    pub stop_grace: Duration,
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_agent_namespace() -> String {
    "kube-system".to_string()
}

fn default_agent_selector() -> String {
    "k8s-app=cilium".to_string()
}

fn default_hubble() -> String {
    "hubble".to_string()
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(240)
}

fn default_poll_attempt_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_tail_size() -> usize {
    200
}

fn default_channel_capacity() -> usize {
    10_000
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(2)
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            agent_namespace: default_agent_namespace(),
            agent_selector: default_agent_selector(),
            hubble: default_hubble(),
            wait_timeout: default_wait_timeout(),
            poll_interval: default_poll_interval(),
            poll_timeout: default_poll_timeout(),
            poll_attempt_timeout: default_poll_attempt_timeout(),
            tail_size: default_tail_size(),
            channel_capacity: default_channel_capacity(),
            stop_grace: default_stop_grace(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {var}: {message}")]
    Env { var: String, message: String },

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ProbeConfig {
    /// Defaults, then the optional file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Override fields from `FLOWPROBE_<FIELD>` variables found through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, value)) = var("KUBECTL") {
            self.kubectl = value;
        }
        if let Some((_, value)) = var("AGENT_NAMESPACE") {
            self.agent_namespace = value;
        }
        if let Some((_, value)) = var("AGENT_SELECTOR") {
            self.agent_selector = value;
        }
        if let Some((_, value)) = var("HUBBLE") {
            self.hubble = value;
        }

        for (name, field) in [
            ("WAIT_TIMEOUT", &mut self.wait_timeout),
            ("POLL_INTERVAL", &mut self.poll_interval),
            ("POLL_TIMEOUT", &mut self.poll_timeout),
            ("POLL_ATTEMPT_TIMEOUT", &mut self.poll_attempt_timeout),
            ("STOP_GRACE", &mut self.stop_grace),
        ] {
            if let Some((key, value)) = var(name) {
                *field = parse_duration(&value).map_err(|message| ConfigError::Env {
                    var: key,
                    message,
                })?;
            }
        }

        for (name, field) in [
            ("TAIL_SIZE", &mut self.tail_size),
            ("CHANNEL_CAPACITY", &mut self.channel_capacity),
        ] {
            if let Some((key, value)) = var(name) {
                *field = value.trim().parse().map_err(|e| ConfigError::Env {
                    var: key,
                    message: format!("'{}': {}", value, e),
                })?;
            }
        }
        Ok(())
    }

    /// Reports every problem at once rather than the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.kubectl.trim().is_empty() {
            errors.push("kubectl must not be empty".to_string());
        }
        if self.hubble.trim().is_empty() {
            errors.push("hubble must not be empty".to_string());
        }
        if self.poll_interval.is_zero() {
            errors.push("poll_interval must be greater than zero".to_string());
        }
        if self.poll_attempt_timeout.is_zero() {
            errors.push("poll_attempt_timeout must be greater than zero".to_string());
        }
        if self.tail_size == 0 {
            errors.push("tail_size must be greater than zero".to_string());
        }
        if self.channel_capacity == 0 {
            errors.push("channel_capacity must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn observer_config(&self) -> ObserverConfig {
        ObserverConfig {
            tail_size: self.tail_size,
            channel_capacity: self.channel_capacity,
            stop_grace: self.stop_grace,
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            attempt_timeout: self.poll_attempt_timeout,
        }
    }
}

/// Parse a human-readable duration such as `30s`, `1m 30s` or `500ms`.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    serde_yaml::from_value::<humantime_serde::Serde<Duration>>(serde_yaml::Value::String(
        value.trim().to_string(),
    ))
    .map(humantime_serde::Serde::into_inner)
    .map_err(|e| format!("'{}': {}", value, e))
}
