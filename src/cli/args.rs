//! CLI argument structures

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{parse_duration, ProbeConfig};
use crate::error::ProbeError;
use crate::extract::{Expectation, FieldPath, LineFilter};
use crate::flows::{FlowType, ObserveQuery};
use crate::remote::{RemoteExecutor, RemoteTarget};

/// Assert that network flows show up in a live observation stream
#[derive(Parser)]
#[command(name = "flowprobe")]
#[command(about = "flowprobe - Wait for matching flows in a live observation stream", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (YAML)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a stream and wait for a line whose field matches
    #[command(name = "observe")]
    Observe(ObserveArgs),

    /// Re-run a command until its output contains a string
    #[command(name = "poll")]
    Poll(PollArgs),

    /// Print a field from each JSON line read on stdin
    #[command(name = "extract")]
    Extract(ExtractArgs),

    /// Observe flows, generate traffic and verify the flow shows up
    #[command(name = "check")]
    Check(CheckArgs),
}

/// Where a command runs
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Namespace of the pod
    #[arg(short = 'n', long, default_value = "")]
    pub namespace: String,

    /// Pod to exec into; without it the command runs on this host
    #[arg(long)]
    pub pod: Option<String>,

    /// Container inside the pod
    #[arg(short = 'c', long)]
    pub container: Option<String>,
}

impl TargetArgs {
    pub fn target(&self) -> RemoteTarget {
        match &self.pod {
            Some(pod) => {
                let target = RemoteTarget::new(&self.namespace, pod);
                match &self.container {
                    Some(container) => target.with_container(container),
                    None => target,
                }
            }
            None => RemoteTarget::local(),
        }
    }

    pub fn executor(&self, config: &ProbeConfig) -> RemoteExecutor {
        if self.pod.is_some() {
            RemoteExecutor::kubectl(&config.kubectl)
        } else {
            RemoteExecutor::local()
        }
    }
}

/// Field path plus exactly one way of matching its value
#[derive(Args, Debug, Clone)]
pub struct MatchArgs {
    /// Field path, e.g. `{$.Type}` or `flow.verdict`
    #[arg(long)]
    pub field: String,

    /// Value must equal this exactly
    #[arg(long, conflicts_with_all = ["contains", "matches"])]
    pub equals: Option<String>,

    /// Value must contain this
    #[arg(long, conflicts_with = "matches")]
    pub contains: Option<String>,

    /// Value must match this regular expression
    #[arg(long, value_name = "REGEX")]
    pub matches: Option<String>,
}

impl MatchArgs {
    pub fn filter(&self) -> Result<LineFilter, ProbeError> {
        let path = FieldPath::parse(&self.field)?;
        let expectation = match (&self.equals, &self.contains, &self.matches) {
            (Some(value), _, _) => Expectation::equals(value),
            (_, Some(value), _) => Expectation::contains(value),
            (_, _, Some(pattern)) => Expectation::matches(pattern)?,
            _ => {
                return Err(ProbeError::config(
                    "one of --equals, --contains or --matches is required",
                ))
            }
        };
        Ok(LineFilter::new(path, expectation))
    }
}

/// Filters for the flow stream when no explicit command is given
#[derive(Args, Debug, Clone, Default)]
pub struct FlowQueryArgs {
    /// Include this many flows recorded before the stream started
    #[arg(long)]
    pub last: Option<u32>,

    /// Flow type: trace, drop or l7
    #[arg(long = "type", value_name = "TYPE")]
    pub flow_type: Option<FlowType>,

    /// Source pod as `namespace/pod`
    #[arg(long, value_name = "NAMESPACE/POD")]
    pub from_pod: Option<String>,

    #[arg(long)]
    pub to_namespace: Option<String>,

    /// Destination label selector
    #[arg(long, value_name = "SELECTOR")]
    pub to_label: Option<String>,

    #[arg(long)]
    pub to_port: Option<u16>,

    /// L7 protocol, e.g. http
    #[arg(long)]
    pub protocol: Option<String>,
}

impl FlowQueryArgs {
    pub fn query(&self) -> ObserveQuery {
        let mut query = ObserveQuery::new();
        if let Some(n) = self.last {
            query = query.last(n);
        }
        if let Some(flow_type) = self.flow_type {
            query = query.flow_type(flow_type);
        }
        if let Some(from_pod) = &self.from_pod {
            let (namespace, pod) = from_pod.split_once('/').unwrap_or(("default", from_pod.as_str()));
            query = query.from_pod(namespace, pod);
        }
        if let Some(namespace) = &self.to_namespace {
            query = query.to_namespace(namespace);
        }
        if let Some(selector) = &self.to_label {
            query = query.to_label(selector);
        }
        if let Some(port) = self.to_port {
            query = query.to_port(port);
        }
        if let Some(protocol) = &self.protocol {
            query = query.protocol(protocol);
        }
        query
    }
}

#[derive(Args, Debug, Clone)]
pub struct ObserveArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub matcher: MatchArgs,

    #[command(flatten)]
    pub query: FlowQueryArgs,

    /// How long to wait for a match (default from config)
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Streaming command; defaults to the flow observation built from the filters
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Substring the output must contain
    #[arg(long)]
    pub expect: String,

    /// Overall deadline (default from config)
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Pause between attempts (default from config)
    #[arg(long, value_parser = parse_duration)]
    pub interval: Option<Duration>,

    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Field path to print
    #[arg(long)]
    pub field: String,

    /// Print every selected value on its own line instead of joining them
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Where the flow stream runs
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub matcher: MatchArgs,

    #[command(flatten)]
    pub query: FlowQueryArgs,

    /// How long to wait for the flow (default from config)
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Command line that generates the traffic
    #[arg(long, value_name = "COMMAND")]
    pub trigger: Option<String>,

    /// URL to curl as the trigger instead of a command line
    #[arg(long, value_name = "URL", conflicts_with = "trigger")]
    pub trigger_url: Option<String>,

    /// Namespace of the pod running the trigger
    #[arg(long, default_value = "")]
    pub trigger_namespace: String,

    /// Pod running the trigger; without it the trigger runs on this host
    #[arg(long)]
    pub trigger_pod: Option<String>,

    /// Node address whose flow metrics are checked afterwards
    #[arg(long, value_name = "HOST")]
    pub metrics_host: Option<String>,

    #[arg(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// Counter expected on the metrics endpoint: to-endpoint or http
    #[arg(long, default_value = "to-endpoint", value_parser = ["to-endpoint", "http"])]
    pub metrics_counter: String,

    /// Annotate the destination pods for L7 visibility on this port first
    #[arg(long, value_name = "PORT", requires_all = ["to_namespace", "to_label"])]
    pub l7_visibility: Option<u16>,
}

impl CheckArgs {
    pub fn trigger_target(&self) -> TargetArgs {
        TargetArgs {
            namespace: self.trigger_namespace.clone(),
            pod: self.trigger_pod.clone(),
            container: None,
        }
    }
}
