use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use port_scan_rs::export;
use port_scan_rs::logging;
use port_scan_rs::ports::{self, Preset};
use port_scan_rs::scanner::{self, ScanOptions};
use port_scan_rs::server;
use port_scan_rs::types::{PortResult, ScanEvent, ScanReport, ScanRequest, ScanState};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};

/// port-scan-rs: TCP connect port scanner for a single target.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "port-scan-rs",
    version,
    about = "TCP connect port scanner for a single target, with live progress and Ctrl+C to stop.",
    long_about = None
)]
struct Cli {
    /// Hostname or IP address to scan.
    #[arg(required_unless_present = "serve")]
    target: Option<String>,

    /// Inclusive port range, e.g. `1-1024` or `443`.
    #[arg(long, conflicts_with_all = ["preset", "start_port", "end_port"])]
    range: Option<String>,

    /// First port of the range.
    #[arg(long = "start-port", conflicts_with = "preset")]
    start_port: Option<u16>,

    /// Last port of the range.
    #[arg(long = "end-port", conflicts_with = "preset")]
    end_port: Option<u16>,

    /// Named range: common (1-1024), top100 (1-100) or full (1-65535).
    #[arg(long)]
    preset: Option<Preset>,

    /// Socket connect timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 500)]
    timeout_ms: u64,

    /// Probes in flight at once. Results are still reported in port order.
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Show CLOSED and ERROR ports too, not only OPEN ones.
    #[arg(long, default_value_t = false)]
    all: bool,

    /// Only show rows whose port, status or service contains this text.
    #[arg(long)]
    filter: Option<String>,

    /// Write the results (all states) as CSV to this path.
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Write the full report as pretty JSON to this path.
    #[arg(long)]
    json: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Run the JSON control API on this address instead of a one-shot scan.
    #[arg(long, value_name = "ADDR")]
    serve: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Some(bind) = cli.serve.as_deref() {
        println!("Control API at http://{}/api (Ctrl+C to stop)", bind);
        tokio::select! {
            res = server::spawn_server(bind) => res?,
            _ = tokio::signal::ctrl_c() => log::info!("[main] shutdown requested"),
        }
        return Ok(());
    }

    let target = cli.target.clone().context("a target is required")?;
    let (start_port, end_port) = port_range(&cli)?;
    let request = ScanRequest::new(target, start_port, end_port)
        .with_timeout(Duration::from_millis(cli.timeout_ms));
    let options = ScanOptions::with_concurrency(cli.concurrency);

    let mut handle = scanner::start(request, options).context("invalid scan request")?;

    // Ctrl-C cancels the scan.
    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nStop requested, finishing current port...");
            canceller.cancel();
        }
    });

    let started = Instant::now();
    let mut last_pct: Option<u8> = None;
    while let Some(ev) = handle.next_event().await {
        match ev {
            ScanEvent::Resolved(t) => {
                eprintln!("Scanning {} ports {}-{}", t, start_port, end_port);
            }
            ScanEvent::Scanning(port) => log::debug!("[main] scanning: port={}", port),
            ScanEvent::Progress(pct) => {
                if last_pct != Some(pct) {
                    last_pct = Some(pct);
                    eprint!("\rProgress: {:>3}%", pct);
                    let _ = std::io::stderr().flush();
                }
            }
            ScanEvent::Found(r) if r.is_open() => {
                let service = r
                    .service
                    .as_deref()
                    .map(|s| format!(" ({s})"))
                    .unwrap_or_default();
                eprintln!("\rOPEN {}{}", r.port, service);
            }
            ScanEvent::Found(_) => {}
            ScanEvent::ResolveFailed(msg) => eprintln!("Scan failed: {msg}"),
            ScanEvent::Completed => eprintln!("\nScan completed."),
            ScanEvent::Stopped => eprintln!("\nScan stopped by user."),
        }
    }

    let report = handle.wait().await?;
    let elapsed = started.elapsed().as_secs();

    if report.state == ScanState::Failed {
        bail!("could not scan {}", report.request.target);
    }

    let rows: Vec<&PortResult> =
        export::filter_results(&report.results, cli.filter.as_deref().unwrap_or(""))
            .into_iter()
            .filter(|r| cli.all || r.is_open())
            .collect();
    print_results_table(&report, &rows);
    println!(
        "Elapsed: {:02}:{:02}  state: {}",
        elapsed / 60,
        elapsed % 60,
        report.state
    );

    if let Some(path) = cli.csv.as_deref() {
        match export::write_csv_file(path, &report.results) {
            Ok(()) => println!("Wrote CSV results to {}", path.display()),
            Err(e) => eprintln!("Failed to write CSV to {}: {e:#}", path.display()),
        }
    }
    if let Some(path) = cli.json.as_deref() {
        match export::write_json_file(path, &report) {
            Ok(()) => println!("Wrote JSON results to {}", path.display()),
            Err(e) => eprintln!("Failed to write JSON to {}: {e:#}", path.display()),
        }
    }

    Ok(())
}

fn port_range(cli: &Cli) -> Result<(u16, u16)> {
    if let Some(r) = cli.range.as_deref() {
        return Ok(ports::parse_range(r)?);
    }
    if let Some(p) = cli.preset {
        return Ok(p.range());
    }
    let (default_start, default_end) = Preset::Common.range();
    Ok((
        cli.start_port.unwrap_or(default_start),
        cli.end_port.unwrap_or(default_end),
    ))
}

fn print_results_table(report: &ScanReport, rows: &[&PortResult]) {
    let port_w = 5usize;
    let state_w = 6usize;
    let mut service_w = "service".len();
    for r in rows {
        service_w = service_w.max(r.service.as_deref().map_or(0, str::len));
    }
    let lat_w = "latency_ms".len();

    println!(
        "\nOpen ports found: {} (scanned: {}/{})",
        report.open_count(),
        report.progress.scanned,
        report.progress.total
    );
    println!(
        "{:>port_w$}  {:<state_w$}  {:<service_w$}  {:>lat_w$}",
        "port", "status", "service", "latency_ms",
    );
    println!(
        "{:-<port_w$}  {:-<state_w$}  {:-<service_w$}  {:-<lat_w$}",
        "", "", "", "",
    );
    for r in rows {
        println!(
            "{:>port_w$}  {:<state_w$}  {:<service_w$}  {:>lat_w$}",
            r.port,
            r.state.as_str(),
            r.service.as_deref().unwrap_or(""),
            r.latency_ms,
        );
    }
}
