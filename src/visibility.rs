//! Proxy visibility annotations
//!
//! L7 flows only show up for traffic that is redirected through the proxy. Annotating
//! the destination pods with `<Ingress/80/TCP/HTTP>` asks the agent to do that; the
//! annotation counts as applied once the agent's endpoint model reports the same
//! proxy state.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::poll::{PollError, PollExecutor};
use crate::remote::{Invocation, RemoteExecutor, RemoteTarget};
use crate::subprocess::{ExitStatus, ProcessError};

pub const PROXY_VISIBILITY_ANNOTATION: &str = "io.cilium.proxy-visibility";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "Ingress"),
            Self::Egress => write!(f, "Egress"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ingress" => Ok(Self::Ingress),
            "egress" => Ok(Self::Egress),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// `<Direction/port/L4/L7>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityAnnotation {
    pub direction: Direction,
    pub port: u16,
    pub l4_protocol: String,
    pub l7_protocol: String,
}

impl VisibilityAnnotation {
    pub fn new(
        direction: Direction,
        port: u16,
        l4_protocol: impl Into<String>,
        l7_protocol: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            port,
            l4_protocol: l4_protocol.into(),
            l7_protocol: l7_protocol.into(),
        }
    }

    /// HTTP on TCP port `port`, ingress side
    pub fn ingress_http(port: u16) -> Self {
        Self::new(Direction::Ingress, port, "TCP", "HTTP")
    }

    /// What the endpoint query prints once the annotation took effect
    pub fn expected_proxy_state(&self) -> String {
        self.to_string().to_lowercase()
    }
}

impl fmt::Display for VisibilityAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}/{}/{}/{}>",
            self.direction, self.port, self.l4_protocol, self.l7_protocol
        )
    }
}

/// A pod touched by `kubectl annotate`, as printed by [`annotate_args`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedPod {
    pub node: String,
    pub namespace: String,
    pub pod: String,
}

impl AnnotatedPod {
    /// Endpoint identifier understood by the agent CLI
    pub fn endpoint_id(&self) -> String {
        format!("pod-name:{}/{}", self.namespace, self.pod)
    }
}

/// Annotate every pod matching `selector`, printing `node=namespace/pod` per pod.
pub fn annotate_args(
    kubectl: &str,
    namespace: &str,
    selector: &str,
    annotation: &VisibilityAnnotation,
) -> Vec<String> {
    vec![
        kubectl.to_string(),
        "annotate".to_string(),
        "pod".to_string(),
        "-n".to_string(),
        namespace.to_string(),
        "-l".to_string(),
        selector.to_string(),
        format!("{}={}", PROXY_VISIBILITY_ANNOTATION, annotation),
        "-o".to_string(),
        r#"jsonpath={.spec.nodeName}={.metadata.namespace}/{.metadata.name}{"\n"}"#.to_string(),
    ]
}

pub fn remove_args(kubectl: &str, namespace: &str, selector: &str) -> Vec<String> {
    vec![
        kubectl.to_string(),
        "annotate".to_string(),
        "pod".to_string(),
        "-n".to_string(),
        namespace.to_string(),
        "-l".to_string(),
        selector.to_string(),
        format!("{}-", PROXY_VISIBILITY_ANNOTATION),
    ]
}

/// Name of the agent pod scheduled on `node`
pub fn agent_pod_args(kubectl: &str, namespace: &str, selector: &str, node: &str) -> Vec<String> {
    vec![
        kubectl.to_string(),
        "get".to_string(),
        "pods".to_string(),
        "-n".to_string(),
        namespace.to_string(),
        "-l".to_string(),
        selector.to_string(),
        "--field-selector".to_string(),
        format!("spec.nodeName={}", node),
        "-o".to_string(),
        "jsonpath={.items[0].metadata.name}".to_string(),
    ]
}

/// Proxy statistics of an endpoint, one `<location/port/l4/protocol>` per line.
///
/// The endpoint model has no L4 protocol, so the annotation's is spliced in.
pub fn endpoint_query_args(pod: &AnnotatedPod, annotation: &VisibilityAnnotation) -> Vec<String> {
    vec![
        "cilium".to_string(),
        "endpoint".to_string(),
        "get".to_string(),
        pod.endpoint_id(),
        "-o".to_string(),
        format!(
            r#"jsonpath={{range [*].status.policy.proxy-statistics[*]}}<{{.location}}/{{.port}}/{}/{{.protocol}}>{{"\n"}}{{end}}"#,
            annotation.l4_protocol.to_lowercase()
        ),
    ]
}

/// Parse `node=namespace/pod` lines. Blank and malformed lines are skipped.
pub fn parse_kv_output(output: &str) -> Vec<AnnotatedPod> {
    output
        .lines()
        .filter_map(|line| {
            let (node, pod) = line.trim().split_once('=')?;
            let (namespace, pod) = pod.split_once('/')?;
            if node.is_empty() || namespace.is_empty() || pod.is_empty() {
                return None;
            }
            Some(AnnotatedPod {
                node: node.to_string(),
                namespace: namespace.to_string(),
                pod: pod.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum VisibilityError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("'{command}' failed with {status}: {output}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        output: String,
    },

    #[error("no pods in namespace {namespace} match '{selector}'")]
    NoPodsAnnotated { namespace: String, selector: String },

    #[error("no agent pod found on node {node}")]
    AgentNotFound { node: String },

    #[error("visibility annotation never applied to {namespace}/{pod}: {source}")]
    NotApplied {
        namespace: String,
        pod: String,
        #[source]
        source: PollError,
    },
}

/// Adds and removes visibility annotations.
///
/// `kubectl annotate` and pod lookups run on this host through `host`; endpoint
/// queries run inside the agent pods through `agents`.
pub struct Visibility {
    host: RemoteExecutor,
    agents: PollExecutor,
    kubectl: String,
    agent_namespace: String,
    agent_selector: String,
    timeout: Duration,
}

impl Visibility {
    pub fn new(
        host: RemoteExecutor,
        agents: PollExecutor,
        kubectl: impl Into<String>,
        agent_namespace: impl Into<String>,
        agent_selector: impl Into<String>,
    ) -> Self {
        Self {
            host,
            agents,
            kubectl: kubectl.into(),
            agent_namespace: agent_namespace.into(),
            agent_selector: agent_selector.into(),
            timeout: Duration::from_secs(240),
        }
    }

    /// How long each endpoint gets to pick up the annotation
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Annotate the pods and wait until every agent reports the proxy redirect.
    pub async fn add(
        &self,
        namespace: &str,
        selector: &str,
        annotation: &VisibilityAnnotation,
    ) -> Result<Vec<AnnotatedPod>, VisibilityError> {
        tracing::info!(
            "Adding visibility annotation {} on pods with labels {}",
            annotation,
            selector
        );
        let output = self
            .run_on_host(annotate_args(&self.kubectl, namespace, selector, annotation))
            .await?;

        let pods = parse_kv_output(&output);
        if pods.is_empty() {
            return Err(VisibilityError::NoPodsAnnotated {
                namespace: namespace.to_string(),
                selector: selector.to_string(),
            });
        }

        let expected = annotation.expected_proxy_state();
        for pod in &pods {
            let agent = self.agent_on(&pod.node).await?;
            let query = Invocation::builder(RemoteTarget::new(&self.agent_namespace, agent))
                .args(endpoint_query_args(pod, annotation))
                .build()?;

            self.agents
                .poll_until(&query, &expected, self.timeout)
                .await
                .map_err(|source| VisibilityError::NotApplied {
                    namespace: pod.namespace.clone(),
                    pod: pod.pod.clone(),
                    source,
                })?;
            tracing::debug!("{}/{} reports {}", pod.namespace, pod.pod, expected);
        }
        Ok(pods)
    }

    pub async fn remove(&self, namespace: &str, selector: &str) -> Result<(), VisibilityError> {
        tracing::info!("Removing visibility annotation on pods with labels {}", selector);
        self.run_on_host(remove_args(&self.kubectl, namespace, selector))
            .await
            .map(|_| ())
    }

    async fn agent_on(&self, node: &str) -> Result<String, VisibilityError> {
        let output = self
            .run_on_host(agent_pod_args(
                &self.kubectl,
                &self.agent_namespace,
                &self.agent_selector,
                node,
            ))
            .await?;
        let name = output.trim();
        if name.is_empty() {
            return Err(VisibilityError::AgentNotFound {
                node: node.to_string(),
            });
        }
        Ok(name.to_string())
    }

    async fn run_on_host(&self, argv: Vec<String>) -> Result<String, VisibilityError> {
        let invocation = Invocation::builder(RemoteTarget::local())
            .args(argv)
            .timeout(self.agents.config().attempt_timeout)
            .build()?;
        let output = self
            .host
            .run(&invocation, &CancellationToken::new())
            .await?;
        if !output.success() {
            return Err(VisibilityError::CommandFailed {
                command: invocation.command_line(),
                status: output.status,
                output: output.output,
            });
        }
        Ok(output.output)
    }
}
