//! Shared caches
//!
//! `SingleFlight` memoizes an async computation per key: concurrent misses
//! for one key wait on a single computation and all observe its result.
//! `DecimalsCache` builds on it to resolve ERC20 decimals once per
//! (chain, token).

use crate::address::TokenRef;
use crate::chain::{ChainId, ChainSpec};
use crate::erc20::{decimals_calldata, decode_uint8};
use crate::error::{ReconError, RpcErrorKind};
use crate::rpc::RpcClient;
use crate::types::BlockTag;
use alloy_primitives::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Get-or-compute map with one in-flight computation per key.
///
/// A value, once set, is never replaced. If the computing future is
/// dropped before finishing, the next caller for that key computes afresh.
pub struct SingleFlight<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, computing it with `compute` on a miss.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = {
            let mut cells = self.cells.lock();
            cells.entry(key).or_default().clone()
        };
        cell.get_or_init(compute).await.clone()
    }

    /// The settled value for `key`, if any.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.cells.lock().get(key).and_then(|c| c.get().cloned())
    }

    /// Drop a settled entry when `pred` holds, so the next request recomputes.
    pub fn forget_if(&self, key: &K, pred: impl Fn(&V) -> bool) {
        let mut cells = self.cells.lock();
        let settled_match = cells
            .get(key)
            .and_then(|c| c.get())
            .map_or(false, |v| pred(v));
        if settled_match {
            cells.remove(key);
        }
    }

    /// Number of keys with a settled value.
    pub fn len(&self) -> usize {
        self.cells
            .lock()
            .values()
            .filter(|c| c.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide ERC20 decimals, keyed by (chain, contract).
///
/// `Address` equality ignores the case of the hex it was parsed from.
/// Failures caused by timeouts or rate limits are not kept; a token that
/// reverts or returns malformed data stays marked invalid.
#[derive(Default)]
pub struct DecimalsCache {
    inner: SingleFlight<(ChainId, Address), Result<u8, ReconError>>,
}

impl DecimalsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decimals for a token. Native tokens never touch the network.
    pub async fn decimals_for(
        &self,
        chain: &ChainSpec,
        rpc: &RpcClient,
        token: TokenRef,
    ) -> Result<u8, ReconError> {
        let contract = match token {
            TokenRef::Native => return Ok(chain.native_decimals),
            TokenRef::Erc20(addr) => addr,
        };

        let key = (chain.id, contract);
        let result = self
            .inner
            .get_or_compute(key, || fetch_decimals(rpc, chain.id, contract))
            .await;

        if result.is_err() {
            self.inner
                .forget_if(&key, |r| matches!(r, Err(ReconError::Rpc(e)) if e.is_transient()));
        }
        result
    }

    /// Cached decimals for a token, without fetching.
    pub fn cached(&self, chain: ChainId, contract: Address) -> Option<u8> {
        self.inner.peek(&(chain, contract)).and_then(|r| r.ok())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

async fn fetch_decimals(rpc: &RpcClient, chain: ChainId, contract: Address) -> Result<u8, ReconError> {
    let invalid = |reason: String| ReconError::InvalidToken {
        token: format!("0x{:x}", contract),
        reason,
    };

    let data = match rpc
        .eth_call(contract, &decimals_calldata(), BlockTag::Latest)
        .await
    {
        Ok(data) => data,
        Err(e) if e.kind == RpcErrorKind::Reverted => {
            return Err(invalid(format!("decimals() reverted: {}", e.message)))
        }
        Err(e) => return Err(e.into()),
    };

    let decimals = decode_uint8(&data).map_err(|e| invalid(format!("decimals(): {}", e)))?;
    debug!("decimals for {:?} on {}: {}", contract, chain, decimals);
    Ok(decimals)
}
