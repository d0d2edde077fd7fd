//! Poll command implementation

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::cli::args::PollArgs;
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::poll::PollExecutor;
use crate::remote::Invocation;

/// Re-run the command until its output contains `--expect`, then print that output
pub async fn run_poll_command(args: PollArgs, config: &ProbeConfig) -> Result<()> {
    let invocation = Invocation::builder(args.target.target())
        .args(&args.command)
        .build()
        .map_err(ProbeError::from)?;

    let mut poll_config = config.poll_config();
    if let Some(interval) = args.interval {
        poll_config.interval = interval;
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let poller = PollExecutor::new(args.target.executor(config), poll_config)
        .with_cancellation(cancel);
    let result = poller
        .poll_until(
            &invocation,
            &args.expect,
            args.timeout.unwrap_or(config.poll_timeout),
        )
        .await;
    watcher.abort();

    let matched = result.map_err(ProbeError::from)?;
    tracing::info!(
        "'{}' found after {} attempts ({:?})",
        args.expect,
        matched.attempts,
        matched.elapsed
    );
    print!("{}", matched.output);
    Ok(())
}
