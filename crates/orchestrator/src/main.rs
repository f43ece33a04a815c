//! Cost Orchestrator - resilient cloud cost analysis
//!
//! Runs one analysis over an inventory snapshot and writes the report as
//! JSON. Collaborator failures are recorded in the report; only invalid
//! configuration or requests make the process exit non-zero.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use orchestrator_lib::{
    collector::SnapshotProvider, CostAnalysisEngine, JsonFileSink, ReportSink, ResourceType,
};
use prometheus::{Encoder, TextEncoder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    /// JSON lines (default)
    #[default]
    Json,
    /// Human-readable multi-line output
    Pretty,
}

/// Resilient cloud cost collection and analysis
#[derive(Parser)]
#[command(name = "cost-orchestrator")]
#[command(author, version, about = "Resilient cloud cost collection and analysis", long_about = None)]
struct Cli {
    /// Inventory snapshot (JSON) to analyze
    #[arg(long)]
    snapshot: PathBuf,

    /// Regions to collect, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    regions: Vec<String>,

    /// Resource categories, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,

    /// Days of history to analyze
    #[arg(long, default_value_t = 30)]
    period_days: u32,

    /// Wall-clock budget for the whole run, in seconds
    #[arg(long, default_value_t = 300)]
    deadline_secs: u64,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory the report is written to
    #[arg(long, default_value = "reports")]
    output_dir: PathBuf,

    /// Write the report as single-line JSON
    #[arg(long)]
    compact: bool,

    /// Write Prometheus metrics in text format to this file
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// Regions whose inventory calls fail, for rehearsing outages
    #[arg(long, value_delimiter = ',')]
    fail_regions: Vec<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init(),
    }
}

async fn write_metrics(path: &Path) -> Result<()> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    tokio::fs::write(path, &buffer)
        .await
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting cost-orchestrator");

    let settings = config::load(cli.config.as_deref())?;
    let engine_config = settings.into_engine_config()?;

    let provider = Arc::new(
        SnapshotProvider::load(&cli.snapshot)
            .await?
            .with_failing_regions(cli.fail_regions.iter().cloned()),
    );
    let engine = CostAnalysisEngine::builder()
        .inventory(provider.clone())
        .metrics_provider(provider.clone())
        .cost_provider(provider)
        .config(engine_config)
        .build()?;

    let shutdown = engine.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("SIGINT received, abandoning in-flight work");
            shutdown.cancel();
        }
    });

    let categories = if cli.categories.is_empty() {
        ResourceType::ALL
            .iter()
            .map(|c| c.as_str().to_string())
            .collect()
    } else {
        cli.categories.clone()
    };

    let report = engine
        .run_analysis(
            &cli.regions,
            &categories,
            cli.period_days,
            Duration::from_secs(cli.deadline_secs),
        )
        .await?;

    let mut sink = JsonFileSink::new(&cli.output_dir);
    if cli.compact {
        sink = sink.compact();
    }
    let location = sink.save(&report).await?;
    if let Some(path) = &cli.metrics_out {
        write_metrics(path).await?;
    }

    info!(
        report = %location,
        resources = report.total_resources_analyzed(),
        monthly_savings = %report.summary().monthly_savings,
        failed_units = report.partial_failures().len(),
        alerting_budgets = report.budgets().iter().filter(|b| b.is_alerting()).count(),
        complete = report.is_complete(),
        "Shutting down"
    );
    println!("{}", location);

    Ok(())
}
