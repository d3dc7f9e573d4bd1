//! CLI implementation for reconcile
//!
//! Loads a JSON batch of reconciliation requests, runs it against the
//! configured chains and writes the report as pretty JSON or CSV.

use crate::cache::DecimalsCache;
use crate::config::{load_endpoints, EngineConfig};
use crate::engine::{AsOf, Progress, ReconciliationEngine};
use crate::records::{
    write_csv, write_json, ReconciliationRequest, ReconciliationResult, ReportSummary,
};
use crate::rpc::{HttpTransport, RetryPolicy};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Balance reconciliation CLI tool
#[derive(Parser)]
#[command(name = "reconcile")]
#[command(about = "Check reported token balances against on-chain state")]
pub struct Cli {
    /// JSON file holding an array of reconciliation requests
    requests: PathBuf,

    /// Endpoints file (`chain = url` per line); overrides environment variables
    #[arg(short, long)]
    endpoints: Option<PathBuf>,

    /// Default as-of time (RFC 3339) for rows without their own timestamp
    #[arg(long, value_parser = parse_rfc3339)]
    as_of: Option<DateTime<Utc>>,

    /// Default block number for rows without their own block or timestamp
    #[arg(long)]
    block: Option<u64>,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Write the report here instead of stdout
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Rows reconciled concurrently
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// RPC requests in flight per chain
    #[arg(long, default_value_t = 4)]
    per_chain: usize,

    /// Attempts per RPC call, including the first
    #[arg(long, default_value_t = 3)]
    attempts: u32,

    /// Base retry delay in milliseconds (doubles per attempt)
    #[arg(long, default_value_t = 250)]
    backoff_ms: u64,

    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value_t = 20)]
    timeout_secs: u64,

    /// Hide the progress bar
    #[arg(long)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Csv,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_workers: self.workers,
            per_chain_in_flight: self.per_chain,
            request_timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.attempts,
                base_delay: Duration::from_millis(self.backoff_ms),
                ..RetryPolicy::default()
            },
        }
    }

    fn as_of(&self) -> AsOf {
        AsOf {
            timestamp: self.as_of,
            block: self.block,
        }
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 time like 2024-12-31T23:59:59Z: {}", e))
}

/// Load a batch of requests from a JSON array.
pub fn load_requests(path: &Path) -> Result<Vec<ReconciliationRequest>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read requests file: {:?}", path))?;
    let requests: Vec<ReconciliationRequest> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse requests file: {:?}", path))?;

    if let Some(bad) = requests.iter().find(|r| r.row_index == 0) {
        anyhow::bail!("row_index must start at 1 (wallet {})", bad.wallet_address);
    }
    Ok(requests)
}

fn progress_bar(quiet: bool, total: usize) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("{bar:40.green} {pos}/{len} rows ({elapsed})") {
        bar.set_style(style);
    }
    bar
}

/// Write the report and flush it, so a failed final write is an error.
fn write_report<W: Write>(results: &[ReconciliationResult], format: Format, mut out: W) -> Result<()> {
    match format {
        Format::Json => write_json(results, &mut out)?,
        Format::Csv => write_csv(results, &mut out)?,
    }
    out.flush().context("Failed to flush report")
}

/// Parse arguments and run a batch.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let requests = load_requests(&cli.requests)?;
    let registry = load_endpoints(cli.endpoints.as_deref())?
        .into_registry()
        .context("Invalid endpoint configuration")?;
    info!("Loaded {} requests from {:?}", requests.len(), cli.requests);

    let config = cli.engine_config();
    let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
    let engine = ReconciliationEngine::new(
        registry,
        transport,
        &config,
        Arc::new(DecimalsCache::new()),
    )
    .with_defaults(cli.as_of());

    let bar = progress_bar(cli.quiet, requests.len());
    let sink = |p: Progress| bar.set_position(p.completed as u64);

    // Handle Ctrl+C by cancelling the run; the partial report is still written
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received Ctrl+C, cancelling outstanding rows...");
                cancel.cancel();
            }
        })
    };

    let results = engine
        .run(&requests, &sink, &cancel)
        .await
        .context("Cannot start reconciliation")?;
    ctrl_c.abort();
    bar.finish_and_clear();

    let out: Box<dyn Write> = match &cli.out {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        )),
        None => Box::new(io::stdout().lock()),
    };
    write_report(&results, cli.format, out)?;

    let summary = ReportSummary::of(&results);
    info!(
        "{} rows: {} matched, {} discrepancies, {} errors",
        summary.total, summary.matched, summary.discrepancies, summary.errors
    );
    Ok(())
}
