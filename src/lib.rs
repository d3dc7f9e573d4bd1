//! chainrecon - reported vs on-chain balance reconciliation
//!
//! This library checks balances reported by an external ledger export against
//! the balances recorded on EVM chains, either at the current head or at the
//! block matching a historical timestamp.

pub mod address;
pub mod amount;
pub mod block;
pub mod cache;
pub mod chain;
pub mod cli;
pub mod config;
pub mod engine;
pub mod erc20;
pub mod error;
pub mod fetcher;
pub mod records;
pub mod rpc;
pub mod types;

#[cfg(test)]
mod testutil;

// Re-export the main types for convenience
pub use chain::{ChainId, ChainRegistry, ChainSpec};
pub use engine::{AsOf, NoProgress, Progress, ProgressSink, ReconciliationEngine};
pub use error::{ConfigError, ReconError, RpcError, RpcErrorKind};
pub use records::{Reconciled, ReconciliationRequest, ReconciliationResult, ReportSummary};
