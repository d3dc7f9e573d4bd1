//! Error taxonomy
//!
//! `ConfigError` is fatal and stops a run before any row is processed.
//! Everything else is a per-row `ReconError` recorded in that row's result.

use crate::chain::ChainId;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Classification of a failed JSON-RPC call after retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RpcErrorKind {
    Timeout,
    RateLimited,
    InvalidResponse,
    Reverted,
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RpcErrorKind::Timeout => "Timeout",
            RpcErrorKind::RateLimited => "RateLimited",
            RpcErrorKind::InvalidResponse => "InvalidResponse",
            RpcErrorKind::Reverted => "Reverted",
        };
        f.write_str(s)
    }
}

/// A JSON-RPC failure surfaced by the RPC client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::InvalidResponse, message)
    }

    /// Timeouts and rate limits may succeed if asked again later.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, RpcErrorKind::Timeout | RpcErrorKind::RateLimited)
    }
}

/// Per-row failure. Never aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconError {
    #[error("unknown chain: {0:?}")]
    UnknownChain(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid token {token}: {reason}")]
    InvalidToken { token: String, reason: String },

    #[error("block resolution failed on {chain} for timestamp {target}: {source}")]
    BlockResolutionFailed {
        chain: ChainId,
        target: u64,
        source: RpcError,
    },

    #[error("rpc error ({0})")]
    Rpc(#[from] RpcError),

    #[error("amount out of range: {0}")]
    Overflow(String),

    #[error("cancelled before completion")]
    Cancelled,
}

impl ReconError {
    /// Stable identifier for reports and log filtering.
    pub fn code(&self) -> String {
        match self {
            ReconError::UnknownChain(_) => "UnknownChain".to_string(),
            ReconError::InvalidAddress(_) => "InvalidAddress".to_string(),
            ReconError::InvalidToken { .. } => "InvalidToken".to_string(),
            ReconError::BlockResolutionFailed { .. } => "BlockResolutionFailed".to_string(),
            ReconError::Rpc(e) => format!("RpcError{{{}}}", e.kind),
            ReconError::Overflow(_) => "Overflow".to_string(),
            ReconError::Cancelled => "Cancelled".to_string(),
        }
    }

    /// The RPC kind for `Rpc` errors, if any.
    pub fn rpc_kind(&self) -> Option<RpcErrorKind> {
        match self {
            ReconError::Rpc(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// Fatal configuration problems discovered before processing begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no RPC endpoint configured for: {}", format_chains(.0))]
    MissingEndpoints(Vec<ChainId>),

    #[error("invalid RPC endpoint for {chain}: {url}")]
    InvalidEndpoint { chain: ChainId, url: String },
}

fn format_chains(chains: &[ChainId]) -> String {
    chains
        .iter()
        .map(|c| format!("{} (set {})", c, c.env_var()))
        .collect::<Vec<_>>()
        .join(", ")
}
