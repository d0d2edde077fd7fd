use clap::Parser;
use flowprobe::app::{handle_fatal_error, init_logging, AppConfig};
use flowprobe::cli::{execute_command, Cli};
use flowprobe::config::ProbeConfig;
use flowprobe::error::ProbeError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let app_config = AppConfig::new(cli.verbose).with_config_path(cli.config.clone());
    init_logging(&app_config);

    if let Err(e) = run(cli, &app_config).await {
        handle_fatal_error(e, app_config.verbose);
    }
}

async fn run(cli: Cli, app_config: &AppConfig) -> anyhow::Result<()> {
    let config = ProbeConfig::load(app_config.config_path.as_deref()).map_err(ProbeError::from)?;
    execute_command(cli.command, &config).await
}
