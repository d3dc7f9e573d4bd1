//! Batch reconciliation
//!
//! Fans a batch of requests out over a bounded set of concurrent row tasks
//! and collects the results back into input order. A row's failure is
//! recorded in its result and never stops the batch; only a missing
//! endpoint, detected before any row starts, is fatal.

use crate::address::{parse_address, TokenRef};
use crate::block::BlockResolver;
use crate::cache::DecimalsCache;
use crate::chain::{ChainId, ChainRegistry, ChainSpec, Lookup};
use crate::config::EngineConfig;
use crate::error::{ConfigError, ReconError};
use crate::fetcher::BalanceFetcher;
use crate::records::{Reconciled, ReconciliationRequest, ReconciliationResult, ReportSummary};
use crate::rpc::{RpcClient, RpcTransport};
use crate::types::BlockTag;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, Instrument};

/// Rows completed so far out of the batch total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Receives a progress update after every finished row.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

impl ProgressSink for mpsc::UnboundedSender<Progress> {
    fn report(&self, progress: Progress) {
        // a closed receiver just means nobody is watching
        let _ = self.send(progress);
    }
}

/// Discards progress updates.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: Progress) {}
}

/// Batch-wide as-of point for rows that carry neither a block nor a timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsOf {
    pub timestamp: Option<DateTime<Utc>>,
    pub block: Option<u64>,
}

/// Where a row's balance is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Point {
    Latest,
    Block(u64),
    Timestamp(u64),
}

pub struct ReconciliationEngine {
    registry: ChainRegistry,
    clients: HashMap<ChainId, RpcClient>,
    fetcher: BalanceFetcher,
    max_workers: usize,
    defaults: AsOf,
}

impl ReconciliationEngine {
    /// Build an engine with one rate-capped RPC client per configured chain.
    pub fn new(
        registry: ChainRegistry,
        transport: Arc<dyn RpcTransport>,
        config: &EngineConfig,
        decimals: Arc<DecimalsCache>,
    ) -> Self {
        let clients = registry
            .specs()
            .map(|spec| {
                let client = RpcClient::new(
                    spec.rpc_endpoint.clone(),
                    transport.clone(),
                    config.retry.clone(),
                    config.per_chain_in_flight,
                );
                (spec.id, client)
            })
            .collect();

        Self {
            registry,
            clients,
            fetcher: BalanceFetcher::new(decimals),
            max_workers: config.max_workers.max(1),
            defaults: AsOf::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: AsOf) -> Self {
        self.defaults = defaults;
        self
    }

    /// Every known chain the batch needs must have an endpoint.
    pub fn preflight(&self, requests: &[ReconciliationRequest]) -> Result<(), ConfigError> {
        let mut missing: Vec<ChainId> = requests
            .iter()
            .filter_map(|r| match self.registry.resolve(&r.chain) {
                Err(Lookup::Unconfigured(id)) => Some(id),
                _ => None,
            })
            .collect();
        missing.sort();
        missing.dedup();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingEndpoints(missing))
        }
    }

    /// Reconcile a batch. Returns one result per request, in request order.
    pub async fn run(
        &self,
        requests: &[ReconciliationRequest],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReconciliationResult>, ConfigError> {
        self.preflight(requests)?;

        let total = requests.len();
        let historical: HashSet<(ChainId, u64)> = requests
            .iter()
            .filter_map(|r| {
                let chain = self.registry.resolve(&r.chain).ok()?;
                match self.point(r) {
                    Point::Timestamp(ts) => Some((chain.id, ts)),
                    _ => None,
                }
            })
            .collect();
        info!(
            "Reconciling {} rows ({} distinct historical points, {} workers)",
            total,
            historical.len(),
            self.max_workers
        );

        let resolver = BlockResolver::new();
        let resolver = &resolver;

        let mut rows = stream::iter(requests.iter().enumerate())
            .map(move |(idx, req)| async move {
                if cancel.is_cancelled() {
                    return (idx, self.failed(req, ReconError::Cancelled));
                }
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => self.failed(req, ReconError::Cancelled),
                    result = self
                        .reconcile_row(req, resolver)
                        .instrument(debug_span!("row", row = req.row_index)) => result,
                };
                (idx, result)
            })
            .buffer_unordered(self.max_workers);

        let mut slots: Vec<Option<ReconciliationResult>> = vec![None; total];
        let mut completed = 0;
        while let Some((idx, result)) = rows.next().await {
            slots[idx] = Some(result);
            completed += 1;
            progress.report(Progress { completed, total });
        }

        let results: Vec<ReconciliationResult> = slots.into_iter().flatten().collect();
        let summary = ReportSummary::of(&results);
        info!(
            "Batch complete: {} matched, {} discrepancies, {} errors",
            summary.matched, summary.discrepancies, summary.errors
        );
        Ok(results)
    }

    fn point(&self, req: &ReconciliationRequest) -> Point {
        let unix = |t: DateTime<Utc>| Point::Timestamp(t.timestamp().max(0) as u64);
        if let Some(block) = req.block_number {
            Point::Block(block)
        } else if let Some(ts) = req.timestamp {
            unix(ts)
        } else if let Some(block) = self.defaults.block {
            Point::Block(block)
        } else if let Some(ts) = self.defaults.timestamp {
            unix(ts)
        } else {
            Point::Latest
        }
    }

    async fn reconcile_row(
        &self,
        req: &ReconciliationRequest,
        resolver: &BlockResolver,
    ) -> ReconciliationResult {
        let chain = self.registry.resolve(&req.chain).ok();
        let outcome = self.reconcile(req, chain, resolver).await;
        match &outcome {
            Ok(_) => debug!("row done"),
            Err(e) => debug!("row failed: {}", e.code()),
        }
        self.result(req, chain, outcome)
    }

    async fn reconcile(
        &self,
        req: &ReconciliationRequest,
        chain: Option<&ChainSpec>,
        resolver: &BlockResolver,
    ) -> Result<Reconciled, ReconError> {
        let unknown = || ReconError::UnknownChain(req.chain.trim().to_string());
        let chain = chain.ok_or_else(unknown)?;
        let rpc = self.clients.get(&chain.id).ok_or_else(unknown)?;

        // address problems are caught before any round-trip
        let wallet = parse_address(&req.wallet_address)?;
        let token = TokenRef::parse(req.token_address.as_deref())?;

        let tag = match self.point(req) {
            Point::Latest => BlockTag::Latest,
            Point::Block(n) => BlockTag::Number(n),
            Point::Timestamp(ts) => {
                debug!("resolving block for timestamp {}", ts);
                resolver.resolve(chain, rpc, ts).await?.tag()
            }
        };

        debug!("fetching balance at {}", tag);
        let balance = self.fetcher.fetch(chain, rpc, wallet, token, tag).await?;
        let delta = balance
            .amount
            .checked_sub(req.reported_balance)
            .ok_or_else(|| {
                ReconError::Overflow(format!(
                    "{} - {}",
                    balance.amount, req.reported_balance
                ))
            })?;

        Ok(Reconciled {
            onchain: balance.amount,
            delta,
            block: match tag {
                BlockTag::Number(n) => Some(n),
                BlockTag::Latest => None,
            },
        })
    }

    fn failed(&self, req: &ReconciliationRequest, error: ReconError) -> ReconciliationResult {
        let chain = self.registry.resolve(&req.chain).ok();
        self.result(req, chain, Err(error))
    }

    fn result(
        &self,
        req: &ReconciliationRequest,
        chain: Option<&ChainSpec>,
        outcome: Result<Reconciled, ReconError>,
    ) -> ReconciliationResult {
        ReconciliationResult {
            row_index: req.row_index,
            chain: chain.map_or_else(|| req.chain.trim().to_string(), |c| c.id.name().to_string()),
            wallet: req.wallet_address.trim().to_string(),
            token_symbol: token_label(req, chain),
            reported: req.reported_balance,
            outcome,
        }
    }
}

/// Native rows show the chain's symbol; token rows the given symbol, else the contract.
fn token_label(req: &ReconciliationRequest, chain: Option<&ChainSpec>) -> String {
    let symbol = req
        .symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match TokenRef::parse(req.token_address.as_deref()) {
        Ok(TokenRef::Native) => chain
            .map(|c| c.native_symbol)
            .or(symbol)
            .unwrap_or_default()
            .to_string(),
        _ => symbol
            .or(req.token_address.as_deref().map(str::trim))
            .unwrap_or_default()
            .to_string(),
    }
}
