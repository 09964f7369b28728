//! Main entry point for the ctxprobe CLI.

use clap::Parser;
use dotenv::dotenv;
use logging::{LoggingConfig, initialize_tracing};

mod commands;
mod logging;

/// ctxprobe CLI
#[derive(Parser)]
#[command(name = "ctxprobe", version)]
#[command(
    about = "Find the largest usable context window for each model on a local inference server",
    long_about = "Interactively selects models, log source, sweep parameters and stop criteria, \
then probes increasing context sizes until a budget is violated. Results are written to \
optimal_ollama_result_<timestamp>.csv alongside a _specs.txt hardware description."
)]
struct Cli {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _cli = Cli::parse();
    let level = initialize_tracing(&LoggingConfig::from_env());
    tracing::debug!(level = %level, "logging initialized");

    commands::probe::run_probe().await
}
