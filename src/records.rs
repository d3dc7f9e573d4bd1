//! Request and result records
//!
//! `ReconciliationRequest` is what an ingestion collaborator hands in,
//! `ReconciliationResult` is what comes back, one per request, in order.

use crate::amount::deserialize_reported;
use crate::error::ReconError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// One row to reconcile. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReconciliationRequest {
    /// Origin line number, 1-based.
    pub row_index: u64,
    /// Free-text chain alias.
    #[serde(alias = "blockchain")]
    pub chain: String,
    #[serde(alias = "wallet")]
    pub wallet_address: String,
    /// Absent or a sentinel (`n/a`, empty) means the native token.
    #[serde(default)]
    pub token_address: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(deserialize_with = "deserialize_reported", alias = "value", alias = "balance")]
    pub reported_balance: Decimal,
    /// Absent means "current".
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Explicit block pin; wins over `timestamp`.
    #[serde(default)]
    pub block_number: Option<u64>,
}

impl ReconciliationRequest {
    pub fn new(row_index: u64, chain: &str, wallet: &str, reported: Decimal) -> Self {
        Self {
            row_index,
            chain: chain.to_string(),
            wallet_address: wallet.to_string(),
            token_address: None,
            symbol: None,
            reported_balance: reported,
            timestamp: None,
            block_number: None,
        }
    }

    pub fn with_token(mut self, token_address: &str, symbol: Option<&str>) -> Self {
        self.token_address = Some(token_address.to_string());
        self.symbol = symbol.map(str::to_string);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn at_block(mut self, block: u64) -> Self {
        self.block_number = Some(block);
        self
    }
}

/// A successful on-chain read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub onchain: Decimal,
    /// `onchain - reported`
    pub delta: Decimal,
    /// Block the balance was read at; `None` for latest.
    pub block: Option<u64>,
}

/// Outcome for one request. Holds either a reading or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationResult {
    pub row_index: u64,
    pub chain: String,
    pub wallet: String,
    pub token_symbol: String,
    pub reported: Decimal,
    pub outcome: Result<Reconciled, ReconError>,
}

impl ReconciliationResult {
    pub fn onchain(&self) -> Option<Decimal> {
        self.outcome.as_ref().ok().map(|r| r.onchain)
    }

    pub fn delta(&self) -> Option<Decimal> {
        self.outcome.as_ref().ok().map(|r| r.delta)
    }

    pub fn error(&self) -> Option<&ReconError> {
        self.outcome.as_ref().err()
    }

    /// On-chain balance equals the reported one.
    pub fn is_match(&self) -> bool {
        self.delta().map_or(false, |d| d.is_zero())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub matched: usize,
    pub discrepancies: usize,
    pub errors: usize,
}

impl ReportSummary {
    pub fn of(results: &[ReconciliationResult]) -> Self {
        let mut summary = ReportSummary {
            total: results.len(),
            ..Default::default()
        };
        for r in results {
            match &r.outcome {
                Ok(_) if r.is_match() => summary.matched += 1,
                Ok(_) => summary.discrepancies += 1,
                Err(_) => summary.errors += 1,
            }
        }
        summary
    }
}

/// Flat output row: `row, chain, wallet, token, block, reported, onchain, delta, error`.
#[derive(Debug, Serialize)]
pub struct ReportRow {
    pub row: u64,
    pub chain: String,
    pub wallet: String,
    pub token: String,
    pub block: Option<u64>,
    pub reported: String,
    pub onchain: Option<String>,
    pub delta: Option<String>,
    /// `<code>: <message>`, e.g. `UnknownChain: unknown chain: "solana"`.
    pub error: Option<String>,
}

impl From<&ReconciliationResult> for ReportRow {
    fn from(r: &ReconciliationResult) -> Self {
        let (block, onchain, delta, error) = match &r.outcome {
            Ok(ok) => (
                ok.block,
                Some(ok.onchain.normalize().to_string()),
                Some(ok.delta.normalize().to_string()),
                None,
            ),
            Err(e) => (None, None, None, Some(format!("{}: {}", e.code(), e))),
        };
        ReportRow {
            row: r.row_index,
            chain: r.chain.clone(),
            wallet: r.wallet.clone(),
            token: r.token_symbol.clone(),
            block,
            reported: r.reported.normalize().to_string(),
            onchain,
            delta,
            error,
        }
    }
}

/// Write the report as pretty JSON: `{"summary": {...}, "rows": [...]}`.
pub fn write_json<W: Write>(results: &[ReconciliationResult], out: W) -> Result<()> {
    #[derive(Serialize)]
    struct JsonReport {
        summary: ReportSummary,
        rows: Vec<ReportRow>,
    }

    let report = JsonReport {
        summary: ReportSummary::of(results),
        rows: results.iter().map(ReportRow::from).collect(),
    };
    serde_json::to_writer_pretty(out, &report).context("Failed to write JSON report")
}

/// Write the report as CSV with a header row.
pub fn write_csv<W: Write>(results: &[ReconciliationResult], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for r in results {
        writer
            .serialize(ReportRow::from(r))
            .with_context(|| format!("Failed to write CSV row {}", r.row_index))?;
    }
    writer.flush().context("Failed to flush CSV report")
}
