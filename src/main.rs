use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use telemetry_agent::config::{Cli, Settings};
use telemetry_agent::output_writer::{run_writer, ReportWriter};
use telemetry_agent::tailer::TailerConfig;
use telemetry_agent::watcher::run_discovery;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings =
        Settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    let _log_guard = init_tracing(&settings)?;

    let destination = cli.destination_path();
    info!(
        pattern = %cli.source_glob,
        destination = %destination.display(),
        "telemetry agent starting"
    );

    let (report_tx, report_rx) = mpsc::channel(settings.writer.channel_capacity);

    let writer_handle = tokio::spawn(run_writer(ReportWriter::new(destination), report_rx));

    let tailer_config = TailerConfig {
        poll_interval: settings.poll_interval(),
        stall_timeout: settings.stall_timeout(),
    };

    let discovery_handle = tokio::spawn({
        let pattern = cli.source_glob_expanded();
        let discovery = settings.discovery.clone();
        async move {
            if let Err(err) = run_discovery(pattern, discovery, tailer_config, report_tx).await {
                error!(error = %err, "discovery loop terminated");
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed while waiting for shutdown signal")?;
    info!("shutdown signal received");

    // Abrupt teardown: reassembly state is in-memory only, so there is
    // nothing to flush beyond what the writer already drained.
    discovery_handle.abort();
    writer_handle.abort();

    Ok(())
}

fn init_tracing(settings: &Settings) -> Result<WorkerGuard> {
    let log_dir = settings.log_directory();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "telemetry-agent.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    Ok(guard)
}
