// Slurm Metrics Collector - cluster node inventory exporter
//
// Periodically samples the Slurm scheduler's node inventory (`sinfo --json`)
// and republishes per-partition and cluster-wide CPU/memory/state aggregates
// for a pull-based monitoring system.
//
// # Features
// - Per-partition CPU and memory totals
// - Cluster-wide CPU totals, CPUs per node state, memory totals
// - Scrape error counter
// - Throttled, single-flight access to the scheduler CLI
// - Prometheus text format endpoint
//
// # Usage
// slurm-metrics-collector [--config <file>] [--listen <addr>] [--nodes-file <file>]
//                         [--poll-limit <secs>] [--fetch-timeout <secs>] [--once [--json]]
//
// Example:
// slurm-metrics-collector --listen 0.0.0.0:9092 --poll-limit 10

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Module declarations
mod aggregate;
mod cache;
mod config;
mod exposition;
mod fetcher;
mod inventory;
mod metrics;
mod registry;
mod server;

use cache::ThrottledCache;
use config::ExporterSettings;
use fetcher::{CliFetcher, FileFetcher, Fetcher};
use metrics::create_all_collectors;
use registry::MetricRegistry;

/// Application entry point
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging
/// 3. Loads and validates settings
/// 4. Builds the fetcher, the shared throttled cache and the collectors
/// 5. Serves the scrape endpoint (or gathers once and exits)
#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("=== Slurm Metrics Collector Starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = parse_arguments(env::args().collect())?;
    let settings = load_settings(&args)?;
    let listen_addr = settings.validate().context("Invalid exporter settings")?;
    settings.log_summary();

    let fetcher = build_fetcher(&settings)?;
    let cache = Arc::new(ThrottledCache::new(fetcher, settings.throttle_policy()));

    let mut registry = MetricRegistry::new();
    for collector in create_all_collectors(Arc::clone(&cache)) {
        registry
            .register(collector)
            .context("Failed to register collector")?;
    }
    anyhow::ensure!(!registry.is_empty(), "No collectors registered");
    info!("Registered {} metric collector(s)", registry.len());

    if args.once {
        return collect_once(&registry, args.json).await;
    }

    server::serve(listen_addr, Arc::new(registry)).await
}

/// Application configuration parsed from command-line arguments
#[derive(Debug, Default, PartialEq)]
struct AppConfig {
    /// Optional JSON settings file
    config_path: Option<PathBuf>,

    /// Overrides `listen_address`
    listen: Option<String>,

    /// Overrides `nodes_file`
    nodes_file: Option<PathBuf>,

    /// Overrides `poll_limit_secs`
    poll_limit_secs: Option<u64>,

    /// Overrides `fetch_timeout_secs`
    fetch_timeout_secs: Option<u64>,

    /// Gather once, print to stdout and exit
    once: bool,

    /// With `once`, print JSON lines instead of the text format
    json: bool,
}

/// Parses command-line arguments
///
/// # Arguments
/// * --config <file> - JSON settings file (optional)
/// * --listen <addr> - Scrape endpoint address (optional)
/// * --nodes-file <file> - Read the node inventory from a file (optional)
/// * --poll-limit <secs> - Minimum seconds between fetches (optional)
/// * --fetch-timeout <secs> - Timeout for the inventory command (optional)
/// * --once - Collect once and print the result (optional)
/// * --json - With --once, print one JSON object per sample (optional)
///
/// # Examples
/// ```bash
/// slurm-metrics-collector --config /etc/slurm-metrics-collector.json
/// slurm-metrics-collector --nodes-file /tmp/sinfo.json --once
/// ```
fn parse_arguments(args: Vec<String>) -> Result<AppConfig> {
    // Helper function to find argument value
    let find_arg = |flag: &str| -> Option<String> {
        args.iter()
            .position(|arg| arg == flag)
            .and_then(|pos| args.get(pos + 1))
            .map(|s| s.to_string())
    };

    let parse_secs = |flag: &str| -> Result<Option<u64>> {
        find_arg(flag)
            .map(|v| {
                v.parse::<u64>()
                    .with_context(|| format!("Invalid value for {}: {}", flag, v))
            })
            .transpose()
    };

    Ok(AppConfig {
        config_path: find_arg("--config").map(PathBuf::from),
        listen: find_arg("--listen"),
        nodes_file: find_arg("--nodes-file").map(PathBuf::from),
        poll_limit_secs: parse_secs("--poll-limit")?,
        fetch_timeout_secs: parse_secs("--fetch-timeout")?,
        once: args.iter().any(|a| a == "--once"),
        json: args.iter().any(|a| a == "--json"),
    })
}

/// Loads the settings file (if any) and applies command-line overrides.
fn load_settings(args: &AppConfig) -> Result<ExporterSettings> {
    let mut settings = match &args.config_path {
        Some(path) => ExporterSettings::from_file(path).context("Failed to load settings file")?,
        None => ExporterSettings::default(),
    };

    if let Some(listen) = &args.listen {
        settings.listen_address = listen.clone();
    }
    if let Some(path) = &args.nodes_file {
        settings.nodes_file = Some(path.clone());
    }
    if let Some(secs) = args.poll_limit_secs {
        settings.poll_limit_secs = secs;
    }
    if let Some(secs) = args.fetch_timeout_secs {
        settings.fetch_timeout_secs = secs;
    }

    Ok(settings)
}

fn build_fetcher(settings: &ExporterSettings) -> Result<Box<dyn Fetcher>> {
    if let Some(path) = &settings.nodes_file {
        return Ok(Box::new(FileFetcher::new(path.clone())));
    }

    let fetcher = CliFetcher::from_command(&settings.sinfo_command, settings.fetch_timeout())
        .context("sinfo_command must not be empty")?;
    Ok(Box::new(fetcher))
}

/// Performs a single gather and prints it to stdout
///
/// Useful for checking the data source and the derived metrics without
/// running the HTTP endpoint.
async fn collect_once(registry: &MetricRegistry, json: bool) -> Result<()> {
    info!("Running one-time metric collection");
    let samples = registry.gather().await;

    if json {
        for sample in &samples {
            println!("{}", serde_json::to_string(sample)?);
        }
    } else {
        let text = exposition::render(registry.descriptors(), &samples)
            .context("Failed to encode metrics")?;
        print!("{}", text);
    }

    info!("One-time collection complete: {} sample(s)", samples.len());
    Ok(())
}

/// Initializes the logging subsystem
///
/// Sets up structured logging with:
/// - Timestamp for each log entry
/// - Log level and target module name
/// - Colored output when running in terminal
/// - JSON output when running as systemd service
///
/// # Log Levels
/// Default: INFO
/// Can be overridden with RUST_LOG environment variable
///
/// # Examples
/// ```bash
/// RUST_LOG=debug slurm-metrics-collector ...  # Cache hits and fetch timings
/// RUST_LOG=trace slurm-metrics-collector ...  # Every node record
/// ```
fn init_logging() {
    // Systemd sets INVOCATION_ID environment variable
    let is_systemd = env::var("INVOCATION_ID").is_ok();

    // Logs go to stderr; stdout is reserved for --once output

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if is_systemd {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    }
}
