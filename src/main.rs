//! gasmon - windowed averaging of gas sensor readings
//!
//! Reads raw sensor events from stdin, a JSONL file or a TCP listener,
//! drops duplicate deliveries, and emits per-location and cross-location
//! averages for each time window until the run duration elapses.
//!
//! Module structure:
//! - `domain/` - Core types (RawEvent, Location, averages, catalog)
//! - `io/` - External interfaces (event sources, TCP listener, egress)
//! - `services/` - Aggregator, windows, pipeline composition
//! - `infra/` - Infrastructure (Config, Metrics, Clock)

use anyhow::Context;
use clap::Parser;
use gasmon::domain::LocationCatalog;
use gasmon::domain::types::{AveragedEvent, SensorsAverage, WindowOutput};
use gasmon::infra::{Config, Metrics, SourceKind};
use gasmon::io::{
    bind_event_listener, run_event_listener, ChannelSource, JsonLinesSource, JsonlSink, LogSink,
};
use gasmon::services::aggregator::IntoEvent;
use gasmon::services::{compose, Aggregator, AggregatorConfig, AggregatorStats, Sink, Split, Tee};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// gasmon - gas sensor window aggregator
#[derive(Parser, Debug)]
#[command(name = "gasmon", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Total run duration in seconds
    #[arg(long)]
    run_secs: Option<u64>,

    /// Window duration in seconds
    #[arg(long)]
    window_secs: Option<u64>,

    /// Read events from this JSONL file
    #[arg(short, long)]
    input: Option<String>,

    /// Location catalog JSON file
    #[arg(long)]
    catalog: Option<String>,
}

fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "gasmon starting");

    let args = Args::parse();
    let config = apply_overrides(load_config(&args), &args);

    info!(
        config_file = %config.config_file(),
        run_secs = %config.run_secs(),
        window_secs = %config.window_secs(),
        catalog_file = %config.catalog_file(),
        source = %config.source_kind().as_str(),
        on_unknown_location = %config.unknown_location().as_str(),
        egress_enabled = %config.egress_enabled(),
        "config_loaded"
    );

    let catalog = LocationCatalog::from_file(config.catalog_file())
        .with_context(|| format!("Failed to load location catalog {}", config.catalog_file()))?;

    let metrics = Arc::new(Metrics::new());
    let mut aggregator = Aggregator::new(AggregatorConfig::from_config(&config), catalog)
        .context("Invalid aggregation settings")?
        .with_metrics(metrics.clone());

    let result = match config.source_kind() {
        SourceKind::Stdin => {
            let source = JsonLinesSource::stdin().with_metrics(metrics.clone());
            run_pipeline(&mut aggregator, &config, source)
        }
        SourceKind::File => {
            let path = config.source_path().context("source.path is required for file sources")?;
            let source = JsonLinesSource::from_path(path)
                .with_context(|| format!("Failed to open event file {}", path))?
                .with_metrics(metrics.clone());
            run_pipeline(&mut aggregator, &config, source)
        }
        SourceKind::Tcp => run_tcp(&mut aggregator, &config, metrics.clone()),
    };

    if config.log_metrics_summary() {
        metrics.summary().log();
    }

    match result {
        Ok(stats) => {
            log_stats(&stats);
            Ok(())
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "run_failed");
            Err(e)
        }
    }
}

fn load_config(args: &Args) -> Config {
    let path = args.config.clone().unwrap_or_else(|| Config::resolve_config_path(&[]));
    Config::load_from_path(&path)
}

fn apply_overrides(mut config: Config, args: &Args) -> Config {
    if let Some(secs) = args.run_secs {
        config = config.with_run_secs(secs);
    }
    if let Some(secs) = args.window_secs {
        config = config.with_window_secs(secs);
    }
    if let Some(path) = &args.input {
        config = config.with_source_path(path);
    }
    if let Some(path) = &args.catalog {
        config = config.with_catalog_file(path);
    }
    config
}

/// Serve producers on a background runtime and aggregate on this thread
fn run_tcp(
    aggregator: &mut Aggregator,
    config: &Config,
    metrics: Arc<Metrics>,
) -> anyhow::Result<AggregatorStats> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    let listener = runtime
        .block_on(bind_event_listener(config.listen_port()))
        .with_context(|| format!("Failed to bind event listener on port {}", config.listen_port()))?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(config.channel_capacity());
    runtime.spawn(run_event_listener(listener, event_tx, metrics, shutdown_rx));

    // Keeps the receive from blocking past the run once the feed goes quiet
    let source = ChannelSource::new(event_rx, runtime.handle().clone())
        .with_run_deadline(Duration::from_secs(config.run_secs()));

    let result = run_pipeline(aggregator, config, source);

    let _ = shutdown_tx.send(true);
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

fn run_pipeline<I>(
    aggregator: &mut Aggregator,
    config: &Config,
    source: I,
) -> anyhow::Result<AggregatorStats>
where
    I: IntoIterator,
    I::Item: IntoEvent,
{
    let mut log_sink = LogSink::new();
    let mut sink: Box<dyn Sink<WindowOutput> + '_> = if config.egress_enabled() {
        let files = Split::new(
            JsonlSink::<AveragedEvent>::new(config.averaged_file()),
            JsonlSink::<SensorsAverage>::new(config.sensors_file()),
        );
        Box::new(Tee::new(&mut log_sink, files))
    } else {
        Box::new(&mut log_sink)
    };

    let passed = compose(&mut *aggregator, &mut *sink).run(source);
    drop(sink);

    // Stats are final once the output sequence has been dropped
    let stats = aggregator.stats().clone();
    let passed = passed.context("Aggregation run failed")?;
    info!(
        items = %passed,
        averaged_events = %log_sink.averaged(),
        sensors_averages = %log_sink.sensors(),
        "output_complete"
    );
    Ok(stats)
}

fn log_stats(stats: &AggregatorStats) {
    info!(
        received = %stats.received,
        accepted = %stats.accepted,
        duplicates = %stats.duplicates,
        windows_closed = %stats.windows_closed,
        averaged_events = %stats.averaged_events,
        sensors_averages = %stats.sensors_averages,
        unknown_skipped = %stats.unknown_skipped,
        discarded_readings = %stats.discarded_readings,
        stop_reason = %stats.stop_reason.as_ref().map_or("unknown", |r| r.as_str()),
        "run_complete"
    );
}
