//! Historical block resolution
//!
//! Maps a Unix timestamp to the latest block whose timestamp is not after
//! it, by binary search over block numbers. Targets past the head resolve
//! to the head; targets before the search floor resolve to the floor.

use crate::chain::{ChainId, ChainSpec};
use crate::cache::SingleFlight;
use crate::error::{ReconError, RpcError};
use crate::rpc::RpcClient;
use crate::types::BlockTag;
use tracing::{debug, warn};

/// Set when the target fell outside the chain's block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clamp {
    /// Target is later than the head block; the head was used.
    AfterHead,
    /// Target is earlier than the first searchable block; that block was used.
    BeforeGenesis,
}

/// A resolved block pinning a historical query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockReference {
    pub chain: ChainId,
    pub number: u64,
    pub timestamp: u64,
    pub clamp: Option<Clamp>,
}

impl BlockReference {
    pub fn tag(&self) -> BlockTag {
        BlockTag::Number(self.number)
    }
}

/// Resolves (chain, timestamp) pairs for one batch run.
///
/// The head block number is fetched once per chain, and each distinct
/// (chain, timestamp) is searched once; concurrent requests for the same
/// pair share the search.
#[derive(Default)]
pub struct BlockResolver {
    heads: SingleFlight<ChainId, Result<u64, RpcError>>,
    resolved: SingleFlight<(ChainId, u64), Result<BlockReference, ReconError>>,
}

impl BlockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest block on `chain` with timestamp <= `target`.
    pub async fn resolve(
        &self,
        chain: &ChainSpec,
        rpc: &RpcClient,
        target: u64,
    ) -> Result<BlockReference, ReconError> {
        self.resolved
            .get_or_compute((chain.id, target), || async move {
                self.search(chain, rpc, target)
                    .await
                    .map_err(|source| ReconError::BlockResolutionFailed {
                        chain: chain.id,
                        target,
                        source,
                    })
            })
            .await
    }

    /// Number of distinct (chain, timestamp) pairs resolved so far.
    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    async fn head(&self, chain: &ChainSpec, rpc: &RpcClient) -> Result<u64, RpcError> {
        let head = self
            .heads
            .get_or_compute(chain.id, || rpc.block_number())
            .await;
        if head.is_err() {
            self.heads.forget_if(&chain.id, |h| h.is_err());
        }
        head
    }

    async fn search(
        &self,
        chain: &ChainSpec,
        rpc: &RpcClient,
        target: u64,
    ) -> Result<BlockReference, RpcError> {
        let head = self.head(chain, rpc).await?;
        let mut high = head;
        let mut low = chain.genesis_block.min(head);

        let head_ts = rpc.block_header(high).await?.timestamp;
        if target >= head_ts {
            return Ok(BlockReference {
                chain: chain.id,
                number: high,
                timestamp: head_ts,
                clamp: (target > head_ts).then_some(Clamp::AfterHead),
            });
        }

        let mut low_ts = rpc.block_header(low).await?.timestamp;
        if target < low_ts {
            warn!(
                "{}: timestamp {} predates block {} ({}), using it anyway",
                chain.id, target, low, low_ts
            );
            return Ok(BlockReference {
                chain: chain.id,
                number: low,
                timestamp: low_ts,
                clamp: Some(Clamp::BeforeGenesis),
            });
        }

        // timestamp(low) <= target < timestamp(high)
        let mut probes = 0u32;
        while low < high {
            let mid = low + (high - low + 1) / 2;
            let mid_ts = rpc.block_header(mid).await?.timestamp;
            probes += 1;
            if mid_ts <= target {
                low = mid;
                low_ts = mid_ts;
            } else {
                high = mid - 1;
            }
        }

        debug!(
            "{}: timestamp {} -> block {} ({}) after {} probes",
            chain.id, target, low, low_ts, probes
        );
        Ok(BlockReference {
            chain: chain.id,
            number: low,
            timestamp: low_ts,
            clamp: None,
        })
    }
}
