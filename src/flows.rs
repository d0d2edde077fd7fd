//! Commands that produce and inspect network flows
//!
//! [`ObserveQuery`] builds the `hubble observe` stream an observer tails, [`curl_fail`]
//! is the strict curl used both to generate traffic and to scrape metrics, and
//! [`MetricsProbe`] checks that the flow counters moved.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use crate::poll::{PollError, PollExecutor, PollMatch};
use crate::remote::{Invocation, RemoteTarget};
use crate::subprocess::ProcessError;

pub const FLOWS_PROCESSED_METRIC: &str = "hubble_flows_processed_total";

pub const CURL_CONNECT_TIMEOUT_SECS: u32 = 5;
pub const CURL_MAX_TIME_SECS: u32 = 20;

/// Event types accepted by `hubble observe --type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    Trace,
    Drop,
    L7,
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Drop => write!(f, "drop"),
            Self::L7 => write!(f, "l7"),
        }
    }
}

impl std::str::FromStr for FlowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "drop" => Ok(Self::Drop),
            "l7" => Ok(Self::L7),
            other => Err(format!("unknown flow type '{}'", other)),
        }
    }
}

/// Filters for a followed `hubble observe` stream in JSON output
#[derive(Debug, Clone, Default)]
pub struct ObserveQuery {
    last: Option<u32>,
    flow_type: Option<FlowType>,
    from_pod: Option<String>,
    to_namespace: Option<String>,
    to_label: Option<String>,
    to_port: Option<u16>,
    protocol: Option<String>,
}

impl ObserveQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include the last `n` flows recorded before the stream started
    pub fn last(mut self, n: u32) -> Self {
        self.last = Some(n);
        self
    }

    pub fn flow_type(mut self, flow_type: FlowType) -> Self {
        self.flow_type = Some(flow_type);
        self
    }

    pub fn from_pod(mut self, namespace: &str, pod: &str) -> Self {
        self.from_pod = Some(format!("{}/{}", namespace, pod));
        self
    }

    pub fn to_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.to_namespace = Some(namespace.into());
        self
    }

    pub fn to_label(mut self, selector: impl Into<String>) -> Self {
        self.to_label = Some(selector.into());
        self
    }

    pub fn to_port(mut self, port: u16) -> Self {
        self.to_port = Some(port);
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn argv(&self, hubble: &str) -> Vec<String> {
        let mut argv: Vec<String> = [hubble, "observe", "--follow", "-o", "json"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut flag = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                argv.push(name.to_string());
                argv.push(value);
            }
        };
        flag("--last", self.last.map(|n| n.to_string()));
        flag("--type", self.flow_type.map(|t| t.to_string()));
        flag("--from-pod", self.from_pod.clone());
        flag("--to-namespace", self.to_namespace.clone());
        flag("--to-label", self.to_label.clone());
        flag("--to-port", self.to_port.map(|p| p.to_string()));
        flag("--protocol", self.protocol.clone());
        argv
    }

    pub fn invocation(&self, target: RemoteTarget, hubble: &str) -> Result<Invocation, ProcessError> {
        Invocation::builder(target)
            .args(self.argv(hubble))
            .streaming()
            .build()
    }
}

/// `curl` that fails on HTTP errors and never hangs for long
pub fn curl_fail(url: &str) -> Vec<String> {
    let connect_timeout = CURL_CONNECT_TIMEOUT_SECS.to_string();
    let max_time = CURL_MAX_TIME_SECS.to_string();
    [
        "curl",
        "--path-as-is",
        "-s",
        "-D",
        "/dev/stderr",
        "--fail",
        "--connect-timeout",
        connect_timeout.as_str(),
        "--max-time",
        max_time.as_str(),
        url,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// `host:port/metrics`, bracketing IPv6 hosts
pub fn metrics_url(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("[{}]:{}/metrics", ip, port),
        _ => format!("{}:{}/metrics", host, port),
    }
}

/// Label set of one `hubble_flows_processed_total` series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowCounter {
    pub subtype: String,
    pub flow_type: String,
    pub verdict: String,
}

impl FlowCounter {
    pub fn new(subtype: &str, flow_type: &str, verdict: &str) -> Self {
        Self {
            subtype: subtype.to_string(),
            flow_type: flow_type.to_string(),
            verdict: verdict.to_string(),
        }
    }

    /// Forwarded L3/L4 traffic delivered to an endpoint
    pub fn forwarded_to_endpoint() -> Self {
        Self::new("to-endpoint", "Trace", "FORWARDED")
    }

    /// Forwarded HTTP traffic seen by the L7 proxy
    pub fn forwarded_http() -> Self {
        Self::new("HTTP", "L7", "FORWARDED")
    }

    /// The series name as it appears in the exposition format
    pub fn series(&self) -> String {
        format!(
            "{}{{subtype=\"{}\",type=\"{}\",verdict=\"{}\"}}",
            FLOWS_PROCESSED_METRIC, self.subtype, self.flow_type, self.verdict
        )
    }
}

/// Scrape a metrics endpoint from inside a pod until a series shows up
#[derive(Debug, Clone)]
pub struct MetricsProbe {
    pub url: String,
    pub counter: FlowCounter,
}

impl MetricsProbe {
    pub fn new(url: impl Into<String>, counter: FlowCounter) -> Self {
        Self {
            url: url.into(),
            counter,
        }
    }

    pub fn invocation(&self, target: RemoteTarget) -> Result<Invocation, ProcessError> {
        Invocation::builder(target).args(curl_fail(&self.url)).build()
    }

    pub async fn check(
        &self,
        poller: &PollExecutor,
        target: RemoteTarget,
        timeout: Duration,
    ) -> Result<PollMatch, MetricsProbeError> {
        let invocation = self.invocation(target)?;
        Ok(poller
            .poll_until(&invocation, &self.counter.series(), timeout)
            .await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsProbeError {
    #[error(transparent)]
    Invocation(#[from] ProcessError),

    #[error(transparent)]
    Poll(#[from] PollError),
}
