//! Command routing and execution

use anyhow::Result;

use crate::cli::args::Commands;
use crate::cli::commands::*;
use crate::config::ProbeConfig;

/// Execute a CLI command based on the parsed arguments
pub async fn execute_command(command: Commands, config: &ProbeConfig) -> Result<()> {
    match command {
        Commands::Observe(args) => run_observe_command(args, config).await,
        Commands::Poll(args) => run_poll_command(args, config).await,
        Commands::Extract(args) => run_extract_command(args).await,
        Commands::Check(args) => run_check_command(args, config).await,
    }
}
