//! Observe command implementation

use anyhow::Result;
use tracing::info;

use crate::cli::args::{FlowQueryArgs, ObserveArgs};
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::observe::StreamingObserver;
use crate::remote::{Invocation, RemoteTarget};

/// Start the stream, wait for the first matching line and print it
pub async fn run_observe_command(args: ObserveArgs, config: &ProbeConfig) -> Result<()> {
    let filter = args.matcher.filter()?;
    let timeout = args.timeout.unwrap_or(config.wait_timeout);
    let invocation =
        stream_invocation(&args.command, &args.query, args.target.target(), &config.hubble)?;
    let executor = args.target.executor(config);

    let observer = StreamingObserver::start(&executor, &invocation, config.observer_config())
        .await
        .map_err(ProbeError::from)?;

    let result = tokio::select! {
        result = observer.wait_for_match(filter, timeout) => result.map_err(ProbeError::from),
        _ = tokio::signal::ctrl_c() => Err(ProbeError::other("interrupted")),
    };
    observer.stop().await;

    let matched = result?;
    info!(
        observer = %observer.id(),
        "Matched {:?} after {:?} ({} lines scanned)",
        matched.value,
        matched.elapsed,
        matched.lines_scanned
    );
    println!("{}", matched.line.text);
    Ok(())
}

/// The explicit command when one was given, otherwise the flow observation
/// described by `query`.
pub(crate) fn stream_invocation(
    command: &[String],
    query: &FlowQueryArgs,
    target: RemoteTarget,
    hubble: &str,
) -> Result<Invocation, ProbeError> {
    let invocation = if command.is_empty() {
        query.query().invocation(target, hubble)
    } else {
        Invocation::builder(target)
            .args(command)
            .streaming()
            .build()
    };
    invocation.map_err(ProbeError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::FlowType;
    use crate::remote::ExecutionMode;

    #[test]
    fn test_default_stream_is_flow_observation() {
        let query = FlowQueryArgs {
            flow_type: Some(FlowType::L7),
            protocol: Some("http".to_string()),
            ..FlowQueryArgs::default()
        };
        let invocation =
            stream_invocation(&[], &query, RemoteTarget::new("kube-system", "hubble-cli"), "hubble")
                .unwrap();

        assert_eq!(invocation.mode(), ExecutionMode::Streaming);
        assert_eq!(
            invocation.command_line(),
            "hubble observe --follow -o json --type l7 --protocol http"
        );
    }

    #[test]
    fn test_explicit_command_wins() {
        let command = vec!["tail".to_string(), "-f".to_string(), "/var/log/flows.json".to_string()];
        let query = FlowQueryArgs {
            to_port: Some(80),
            ..FlowQueryArgs::default()
        };
        let invocation = stream_invocation(&command, &query, RemoteTarget::local(), "hubble").unwrap();
        assert_eq!(invocation.argv(), command.as_slice());
    }
}
