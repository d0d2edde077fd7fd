use super::Invocation;
use crate::subprocess::{ProcessCommand, ProcessCommandBuilder, ProcessError};

/// Maps an [`Invocation`] onto a local command line
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn command(&self, invocation: &Invocation) -> Result<ProcessCommand, ProcessError>;
}

/// `kubectl exec -n <ns> <pod> [-c <container>] [-i] -- <cmd...>`
#[derive(Debug, Clone)]
pub struct KubectlTransport {
    kubectl: String,
}

impl KubectlTransport {
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
        }
    }
}

impl Default for KubectlTransport {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl Transport for KubectlTransport {
    fn name(&self) -> &'static str {
        "kubectl"
    }

    fn command(&self, invocation: &Invocation) -> Result<ProcessCommand, ProcessError> {
        let target = invocation.target();
        if target.pod.is_empty() {
            return Err(ProcessError::InvalidCommand {
                message: "kubectl exec needs a pod name".to_string(),
            });
        }

        let mut builder = ProcessCommandBuilder::new(&self.kubectl).arg("exec");
        if !target.namespace.is_empty() {
            builder = builder.args(["-n", target.namespace.as_str()]);
        }
        builder = builder.arg(&target.pod);
        if let Some(container) = &target.container {
            builder = builder.args(["-c", container.as_str()]);
        }
        if let Some(input) = invocation.stdin() {
            builder = builder.arg("-i").stdin(input.to_string());
        }

        Ok(builder.arg("--").args(invocation.argv()).build())
    }
}

/// Runs the command on this host; the target is only used for logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    fn command(&self, invocation: &Invocation) -> Result<ProcessCommand, ProcessError> {
        let mut builder = ProcessCommandBuilder::from_argv(invocation.argv()).ok_or_else(|| {
            ProcessError::InvalidCommand {
                message: format!("empty command for target {}", invocation.target()),
            }
        })?;
        if let Some(input) = invocation.stdin() {
            builder = builder.stdin(input.to_string());
        }
        Ok(builder.build())
    }
}
