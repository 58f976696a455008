use brrtchain::cli::{run_cli, Cli};
use brrtchain::logging::{init_logging_with_config, LogConfig};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::for_cli();
    let _log_guard = init_logging_with_config(&log_config)?;

    run_cli(cli).await
}
