//! `fleet-monitor` binary entry point.
//!
//! Builds a static fleet from CLI / env-var configuration, installs every
//! registered metric plus the requested moving averages, and exports the
//! collected series until the run length elapses or a shutdown signal is
//! received.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};

use alloy::primitives::Address;
use anyhow::Context;
use clap::Parser;
use fleet_monitor::{
    Monitor, MonitorConfig,
    network::{Network, StaticApplication, StaticNetwork, StaticNode},
    sources::install_transactions_throughput_sma,
};
use tracing::{info, warn};
use url::Url;

/// Configuration for the fleet monitor.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fleet-monitor",
    version,
    about = "Collects and exports metrics of a test-network fleet"
)]
struct Args {
    // ── Fleet ────────────────────────────────────────────────
    /// Node RPC endpoints as `label=url` pairs.
    #[arg(long = "node", env = "FLEET_MONITOR_NODES", value_delimiter = ',')]
    nodes: Vec<String>,

    /// Node log files as `label=path` pairs.
    #[arg(long = "node-log", env = "FLEET_MONITOR_NODE_LOGS", value_delimiter = ',')]
    node_logs: Vec<String>,

    /// Application RPC endpoints as `name=url` pairs.
    #[arg(long = "app", env = "FLEET_MONITOR_APPS", value_delimiter = ',')]
    apps: Vec<String>,

    /// Application accounts as `name=address` pairs, in account order.
    #[arg(long = "account", env = "FLEET_MONITOR_ACCOUNTS", value_delimiter = ',')]
    accounts: Vec<String>,

    // ── Collection ───────────────────────────────────────────
    /// Directory receiving `monitoring.csv`.
    #[arg(long, env = "FLEET_MONITOR_OUTPUT_DIR", default_value = "./output")]
    output_dir: PathBuf,

    /// Sampling period of the periodic metrics, in ms.
    #[arg(
        long,
        env = "FLEET_MONITOR_SAMPLING_PERIOD_MS",
        default_value = "1000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    sampling_period_ms: u64,

    /// Interval between export flushes, in ms.
    #[arg(
        long,
        env = "FLEET_MONITOR_FLUSH_INTERVAL_MS",
        default_value = "5000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    flush_interval_ms: u64,

    /// Moving-average windows (in blocks) of the transactions throughput.
    #[arg(long, env = "FLEET_MONITOR_SMA_PERIODS", value_delimiter = ',')]
    sma_period: Vec<usize>,

    /// Stop after this many seconds instead of waiting for a signal.
    #[arg(long, env = "FLEET_MONITOR_DURATION_SECS")]
    duration_secs: Option<u64>,

    // ── Observability ────────────────────────────────────────
    /// Log level.
    #[arg(long, env = "FLEET_MONITOR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format: `json` or `text`.
    #[arg(long, env = "FLEET_MONITOR_LOG_FORMAT", default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    init_tracing(&args.log_level, &args.log_format);
    info!(version = env!("CARGO_PKG_VERSION"), "starting fleet-monitor");

    let network = build_network(&args).await?;
    let config = MonitorConfig {
        output_dir: args.output_dir.clone(),
        sampling_period: Duration::from_millis(args.sampling_period_ms),
        flush_interval: Duration::from_millis(args.flush_interval_ms),
    };
    let monitor = Monitor::new(Arc::clone(&network) as Arc<dyn Network>, config)?;

    monitor.install_registered_sources().await.context("failed to install metric sources")?;
    for &period in &args.sma_period {
        install_transactions_throughput_sma(&monitor, period)
            .with_context(|| format!("failed to install moving average over {period} blocks"))?;
    }
    monitor.start_flusher();
    info!(sources = ?monitor.source_names(), "monitoring started");

    await_stop(args.duration_secs.map(Duration::from_secs)).await;

    let result = monitor.shutdown().await;
    let summary = serde_json::json!({
        "sources": monitor.source_names(),
        "nodes": monitor.log_dispatcher().nodes(),
        "output": args.output_dir.join(fleet_monitor::monitor::EXPORT_FILE_NAME),
    });
    info!(%summary, "fleet-monitor shut down");
    result.context("errors were collected during the run")?;
    Ok(())
}

/// Splits a `key=value` flag.
fn parse_pair(raw: &str) -> anyhow::Result<(&str, &str)> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .with_context(|| format!("expected `key=value`, got `{raw}`"))
}

/// Build the static fleet described by the configuration.
async fn build_network(args: &Args) -> anyhow::Result<Arc<StaticNetwork>> {
    let node = |label: &str| StaticNode { label: label.to_string(), rpc_url: None, log_path: None };
    let mut nodes: BTreeMap<&str, StaticNode> = BTreeMap::new();

    for raw in &args.nodes {
        let (label, url) = parse_pair(raw)?;
        let url: Url = url.parse().with_context(|| format!("invalid RPC URL for node {label}"))?;
        nodes.entry(label).or_insert_with(|| node(label)).rpc_url = Some(url);
    }
    for raw in &args.node_logs {
        let (label, path) = parse_pair(raw)?;
        nodes.entry(label).or_insert_with(|| node(label)).log_path = Some(PathBuf::from(path));
    }

    let mut apps: BTreeMap<&str, StaticApplication> = BTreeMap::new();
    for raw in &args.apps {
        let (name, url) = parse_pair(raw)?;
        let url: Url = url.parse().with_context(|| format!("invalid RPC URL for app {name}"))?;
        let app = StaticApplication { name: name.to_string(), rpc_url: Some(url), accounts: vec![] };
        apps.insert(name, app);
    }
    for raw in &args.accounts {
        let (name, address) = parse_pair(raw)?;
        let address: Address =
            address.parse().with_context(|| format!("invalid address for app {name}"))?;
        match apps.get_mut(name) {
            Some(app) => app.accounts.push(address),
            None => warn!(app = name, "account of unknown application ignored"),
        }
    }

    let network = Arc::new(StaticNetwork::new());
    for (_, node) in nodes {
        info!(
            node = %node.label,
            rpc = node.rpc_url.is_some(),
            log = node.log_path.is_some(),
            "adding node"
        );
        network.add_node(Arc::new(node)).await;
    }
    for (_, app) in apps {
        info!(app = %app.name, accounts = app.accounts.len(), "adding application");
        network.add_application(Arc::new(app)).await;
    }
    Ok(network)
}

/// Initialise `tracing` with the given level and format (`json` or `text`).
fn init_tracing(level: &str, format: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        "json" => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Wait for SIGINT / SIGTERM, or for `duration` when given.
async fn await_stop(duration: Option<Duration>) {
    use tokio::signal;

    let elapsed = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to register SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("received SIGTERM, shutting down");
        }
        _ = elapsed => {
            info!("run length elapsed, shutting down");
        }
    }
}
