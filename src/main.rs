use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gatekeeper_sim::config::{
    SimConfig, DEFAULT_HISTORY_CAPACITY, DEFAULT_SCAN_PERIOD_MS, DEFAULT_TRAFFIC_PERIOD_MS,
    MAX_HISTORY_CAPACITY,
};
use gatekeeper_sim::format::{download_gauge, format_bytes, format_percent, upload_gauge};
use gatekeeper_sim::scanner::ScanEngine;
use gatekeeper_sim::server::{self, AppState};
use gatekeeper_sim::traffic::TrafficEngine;
use gatekeeper_sim::types::{ScanState, TrafficState};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// gatekeeper-sim — simulated network gateway: fake endpoint scanner and per-app traffic monitor.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "gatekeeper-sim",
    version,
    about = "Simulated network gateway: fake endpoint scanner and per-app traffic monitor.",
    long_about = None
)]
struct Cli {
    /// Milliseconds between scan ticks.
    #[arg(long = "scan-period-ms", default_value_t = DEFAULT_SCAN_PERIOD_MS)]
    scan_period_ms: u64,

    /// Milliseconds between traffic ticks.
    #[arg(long = "traffic-period-ms", default_value_t = DEFAULT_TRAFFIC_PERIOD_MS)]
    traffic_period_ms: u64,

    /// Most recent discovered endpoints to keep (1-20).
    #[arg(
        long = "history-capacity",
        default_value_t = DEFAULT_HISTORY_CAPACITY as u64,
        value_parser = clap::value_parser!(u64).range(1..=MAX_HISTORY_CAPACITY as u64)
    )]
    history_capacity: u64,

    /// Fixed RNG seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Do not start a scan automatically in terminal mode.
    #[arg(long = "no-scan", default_value_t = false)]
    no_scan: bool,

    /// How long terminal mode runs before printing the final report.
    #[arg(long = "duration-secs", default_value_t = 10)]
    duration_secs: u64,

    /// Write the final snapshots as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Start the HTTP relay instead of terminal mode.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Address for the HTTP relay.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directory of static files served next to the API.
    #[arg(long = "ui-dir", default_value = "ui")]
    ui_dir: PathBuf,

    /// Tracing filter, e.g. `info` or `gatekeeper_sim=debug`.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn sim_config(&self) -> SimConfig {
        SimConfig {
            scan_period_ms: self.scan_period_ms,
            traffic_period_ms: self.traffic_period_ms,
            history_capacity: self.history_capacity as usize,
            seed: self.seed,
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    scan: &'a ScanState,
    traffic: &'a TrafficState,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .init();

    let config = cli.sim_config();
    info!(?config, serve_ui = cli.serve_ui, "gatekeeper-sim starting");

    let mut scan = ScanEngine::new(&config);
    let mut traffic = TrafficEngine::new(&config);
    traffic.start();

    if cli.serve_ui {
        let state = AppState::new(scan, traffic);
        tokio::select! {
            res = server::spawn_server(&cli.bind, state, &cli.ui_dir) => res?,
            _ = tokio::signal::ctrl_c() => info!("shutting down"),
        }
        return Ok(());
    }

    if !cli.no_scan {
        scan.start_scan();
    }
    run_terminal(&scan, Duration::from_secs(cli.duration_secs)).await;
    traffic.stop();

    let scan_state = scan.snapshot();
    let traffic_state = traffic.snapshot();
    print_scan_table(&scan_state);
    print_traffic_table(&traffic_state);

    if let Some(path) = cli.output.as_deref() {
        write_report_json(path, &scan_state, &traffic_state)?;
        println!("Wrote JSON report to {}", path.display());
    }

    Ok(())
}

/// Print scan progress as snapshots arrive; connect to the first open
/// endpoint once the scan completes.
async fn run_terminal(scan: &ScanEngine, duration: Duration) {
    let mut rx = scan.subscribe();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let mut connected = false;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted");
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = rx.borrow_and_update().clone();
                println!(
                    "scan {:>6}  discovered {:>2}  open {:>2}",
                    format_percent(snap.progress_percent),
                    snap.discovered.len(),
                    snap.open_count()
                );
                if !snap.is_active && !connected {
                    if let Some(r) = snap.discovered.iter().find(|r| r.is_open()) {
                        connected = scan.select_endpoint(r);
                    }
                }
            }
        }
    }
}

fn print_scan_table(state: &ScanState) {
    let mut addr_w = "address".len();
    for r in &state.discovered {
        addr_w = addr_w.max(r.address.len());
    }
    let port_w = 5usize;
    let lat_w = "latency_ms".len();

    println!(
        "\nDiscovered endpoints: {} (open: {}, progress: {})",
        state.discovered.len(),
        state.open_count(),
        format_percent(state.progress_percent)
    );
    println!(
        "{:<addr_w$}  {:>port_w$}  {:<8}  {:>lat_w$}  {:<7}",
        "address",
        "port",
        "state",
        "latency_ms",
        "service",
        addr_w = addr_w,
        port_w = port_w,
        lat_w = lat_w
    );
    println!(
        "{:-<addr_w$}  {:-<port_w$}  {:-<8}  {:-<lat_w$}  {:-<7}",
        "",
        "",
        "",
        "",
        "",
        addr_w = addr_w,
        port_w = port_w,
        lat_w = lat_w
    );
    for r in &state.discovered {
        println!(
            "{:<addr_w$}  {:>port_w$}  {:<8}  {:>lat_w$}  {:<7}",
            r.address,
            r.port,
            r.state.as_str(),
            r.latency_ms,
            r.service.map(|s| s.as_str()).unwrap_or("-"),
            addr_w = addr_w,
            port_w = port_w,
            lat_w = lat_w
        );
    }
    match &state.selected_endpoint {
        Some(r) => println!("CONNECTED to {}:{} ({}ms)", r.address, r.port, r.latency_ms),
        None => println!("DISCONNECTED"),
    }
}

fn print_traffic_table(state: &TrafficState) {
    println!(
        "\nTotal upload {} ({:.0}%)  total download {} ({:.0}%)  apps routed {}/{}",
        format_bytes(state.total_upload_bytes),
        upload_gauge(state.total_upload_bytes),
        format_bytes(state.total_download_bytes),
        download_gauge(state.total_download_bytes),
        state.routed_count(),
        state.entries.len()
    );
    for e in &state.entries {
        println!(
            "{} {:<10}  up {:>9}  down {:>9}  {}",
            e.icon,
            e.name,
            format_bytes(e.upload_bytes),
            format_bytes(e.download_bytes),
            e.status.as_str()
        );
    }
}

fn write_report_json(path: &Path, scan: &ScanState, traffic: &TrafficState) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, &Report { scan, traffic })?;
    Ok(())
}
