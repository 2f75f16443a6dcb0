use clap::Parser;
use datastreams_telemetry::init_tracing;
use tracing::error;

use crate::commands::{Cli, run};
use crate::config::load_importer_config;

mod commands;
mod config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app_name = env!("CARGO_BIN_NAME");
    let _log_flusher = init_tracing(app_name)?;

    let config = load_importer_config()?;
    if let Err(err) = run(cli.command, &config).await {
        error!("{err:#}");
        return Err(err);
    }

    Ok(())
}
