//! The probe session: connect, ask, write the specs artifact, sweep, summarize.

use super::console::{ConsoleObserver, optimal_line};
use super::setup::{Prompter, SetupContext, collect_configuration};
use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use shared::config::{ProbeTimings, RunConfiguration};
use shared::probe::{
    BenchmarkOrchestrator, InferenceBackend, ModelRun, OllamaClient, SystemHardware,
    TelemetryReader,
};
use shared::report::{CsvResultSink, ResultFiles, render_specs, write_specs};
use tracing::info;

/// Run one interactive probe session.
///
/// # Errors
/// Returns an error if the server is unreachable, setup is aborted, or the
/// output files cannot be written.
pub async fn run_probe() -> Result<()> {
    let server_url =
        RunConfiguration::server_url_from_env().context("failed to resolve server URL")?;
    let client = OllamaClient::new(server_url.clone(), ProbeTimings::default())?;

    println!("Connecting to {server_url} ...");
    let models = client.list_models().await?;
    if models.is_empty() {
        anyhow::bail!("the server at {server_url} has no models installed");
    }

    let hardware = tokio::task::spawn_blocking(SystemHardware::detect)
        .await
        .context("hardware detection task failed")?;

    let context = SetupContext {
        server_url,
        models: &models,
        integrated_gpu: hardware.has_integrated_gpu(),
        output_dir: RunConfiguration::output_dir_from_env(),
    };
    let config = collect_configuration(&mut Prompter::stdio(), &context)?;

    let started = Local::now();
    let files = ResultFiles::new(&config.output_dir, started);
    write_specs(&files.specs, &render_specs(started, &hardware))
        .with_context(|| format!("failed to write {}", files.specs.display()))?;
    let mut sink = CsvResultSink::create(&files.csv)
        .with_context(|| format!("failed to create {}", files.csv.display()))?;
    info!(csv = %files.csv.display(), specs = %files.specs.display(), "output files ready");

    println!("\n{}", "=".repeat(70));
    println!("{}", "Starting Benchmark".bold());
    println!("Gen Tokens: {}", config.sweep.num_predict);
    println!("Log Source: {}", config.log_source.mode());
    println!("{}\n", "=".repeat(70));

    let telemetry = TelemetryReader::new(config.log_source.clone(), config.timings.log_timeout);
    let orchestrator = BenchmarkOrchestrator::new(config, client, telemetry)?;
    let runs = orchestrator
        .run(&mut sink, &ConsoleObserver)
        .await
        .context("failed to record results")?;

    print_summary(&runs);
    println!("Results: {}", files.csv.display());
    println!("Specs:   {}", files.specs.display());
    Ok(())
}

fn print_summary(runs: &[ModelRun]) {
    println!("{}", "Summary".green().bold());
    for run in runs {
        let stop = run
            .stopping_step()
            .map_or_else(String::new, |step| format!(" [{}]", step.status));
        println!("- {}{stop}", run.model.name);
        println!("{}", optimal_line(run));
    }
    println!();
}
