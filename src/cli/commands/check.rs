//! Check command implementation
//!
//! Wires the command line into a [`FlowCheck`]: the flow stream runs where `--pod`
//! points, the trigger where `--trigger-pod` points, and the optional metrics scrape
//! runs next to the flow stream.

use anyhow::Result;
use tracing::{info, warn};

use crate::check::{CheckReport, FlowCheck, FlowCheckRunner, MetricsCheck};
use crate::cli::args::CheckArgs;
use crate::cli::commands::observe::stream_invocation;
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::flows::{curl_fail, metrics_url, FlowCounter, MetricsProbe};
use crate::poll::PollExecutor;
use crate::remote::{Invocation, RemoteExecutor};
use crate::visibility::{Visibility, VisibilityAnnotation};

pub async fn run_check_command(args: CheckArgs, config: &ProbeConfig) -> Result<()> {
    let check = build_check(&args, config)?;

    let executor = args.target.executor(config);
    let poller = PollExecutor::new(executor.clone(), config.poll_config());
    let runner = FlowCheckRunner::new(executor, poller, config.observer_config())
        .with_trigger_executor(args.trigger_target().executor(config));

    let Some(port) = args.l7_visibility else {
        return run(&runner, &check).await;
    };

    let (namespace, selector) = match (&args.query.to_namespace, &args.query.to_label) {
        (Some(namespace), Some(selector)) => (namespace.as_str(), selector.as_str()),
        _ => {
            return Err(ProbeError::config(
                "--l7-visibility needs --to-namespace and --to-label",
            )
            .into())
        }
    };
    let visibility = Visibility::new(
        RemoteExecutor::local(),
        PollExecutor::new(RemoteExecutor::kubectl(&config.kubectl), config.poll_config()),
        &config.kubectl,
        &config.agent_namespace,
        &config.agent_selector,
    )
    .with_timeout(config.poll_timeout);

    visibility
        .add(namespace, selector, &VisibilityAnnotation::ingress_http(port))
        .await
        .map_err(ProbeError::from)?;
    let result = run(&runner, &check).await;
    if let Err(e) = visibility.remove(namespace, selector).await {
        warn!("Failed to remove visibility annotation: {}", e);
    }
    result
}

fn build_check(args: &CheckArgs, config: &ProbeConfig) -> Result<FlowCheck, ProbeError> {
    let filter = args.matcher.filter()?;
    let target = args.target.target();
    let observe = stream_invocation(&[], &args.query, target.clone(), &config.hubble)?;
    let mut check = FlowCheck::new(
        observe,
        filter,
        args.timeout.unwrap_or(config.wait_timeout),
    );

    let trigger = Invocation::builder(args.trigger_target().target());
    if let Some(line) = &args.trigger {
        check = check.with_trigger(trigger.command_line(line)?.build()?);
    } else if let Some(url) = &args.trigger_url {
        check = check.with_trigger(trigger.args(curl_fail(url)).build()?);
    }

    if let Some(host) = &args.metrics_host {
        let counter = match args.metrics_counter.as_str() {
            "http" => FlowCounter::forwarded_http(),
            _ => FlowCounter::forwarded_to_endpoint(),
        };
        let probe = MetricsProbe::new(metrics_url(host, args.metrics_port), counter);
        check = check.with_metrics(MetricsCheck {
            invocation: probe.invocation(target)?,
            expected: probe.counter.series(),
            timeout: config.poll_timeout,
        });
    }
    Ok(check)
}

async fn run(runner: &FlowCheckRunner, check: &FlowCheck) -> Result<()> {
    let report = tokio::select! {
        report = runner.run(check) => report.map_err(ProbeError::from)?,
        _ = tokio::signal::ctrl_c() => return Err(ProbeError::other("interrupted").into()),
    };
    print_report(check, &report);
    Ok(())
}

fn print_report(check: &FlowCheck, report: &CheckReport) {
    info!(
        observer = %report.observer,
        "{} lines received, {} dropped",
        report.lines_received,
        report.lines_dropped
    );
    println!(
        "matched {} after {:?}",
        check.filter, report.matched.elapsed
    );
    println!("{}", report.matched.line.text);
    if let Some(metrics) = &report.metrics {
        println!(
            "metrics confirmed after {} attempts ({:?})",
            metrics.attempts, metrics.elapsed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::{FlowQueryArgs, MatchArgs, TargetArgs};
    use crate::flows::FlowType;

    fn args() -> CheckArgs {
        CheckArgs {
            target: TargetArgs {
                namespace: "kube-system".to_string(),
                pod: Some("hubble-cli-x7k2p".to_string()),
                container: None,
            },
            matcher: MatchArgs {
                field: "{$.Type}".to_string(),
                equals: Some("L3_L4".to_string()),
                contains: None,
                matches: None,
            },
            query: FlowQueryArgs {
                last: Some(1),
                flow_type: Some(FlowType::Trace),
                to_port: Some(80),
                ..FlowQueryArgs::default()
            },
            timeout: None,
            trigger: None,
            trigger_url: Some("http://10.96.0.12/public".to_string()),
            trigger_namespace: "demo".to_string(),
            trigger_pod: Some("app2-58757b7dd5-6bq9q".to_string()),
            metrics_host: Some("192.168.36.11".to_string()),
            metrics_port: 9091,
            metrics_counter: "to-endpoint".to_string(),
            l7_visibility: None,
        }
    }

    #[test]
    fn test_build_check_from_args() {
        let config = ProbeConfig::default();
        let check = build_check(&args(), &config).unwrap();

        assert_eq!(check.timeout, config.wait_timeout);
        assert_eq!(check.observe.target().pod, "hubble-cli-x7k2p");
        assert!(check.observe.command_line().starts_with("hubble observe --follow"));

        let trigger = check.trigger.unwrap();
        assert_eq!(trigger.target().namespace, "demo");
        assert_eq!(trigger.argv()[0], "curl");

        let metrics = check.metrics.unwrap();
        assert_eq!(metrics.invocation.target().pod, "hubble-cli-x7k2p");
        assert!(metrics
            .invocation
            .argv()
            .contains(&"192.168.36.11:9091/metrics".to_string()));
        assert!(metrics.expected.contains("to-endpoint"));
    }

    #[test]
    fn test_trigger_command_line_is_split() {
        let mut args = args();
        args.trigger_url = None;
        args.trigger = Some("curl -s 'http://10.96.0.12/public?a=1 b'".to_string());
        let check = build_check(&args, &ProbeConfig::default()).unwrap();

        assert_eq!(
            check.trigger.unwrap().argv(),
            ["curl", "-s", "http://10.96.0.12/public?a=1 b"]
        );
    }

    #[test]
    fn test_bad_field_path_is_config_error() {
        let mut args = args();
        args.matcher.field = "a[".to_string();
        let err = build_check(&args, &ProbeConfig::default()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
