//! Balance fetching
//!
//! Reads a wallet's native or ERC20 balance, optionally pinned to a block,
//! and scales it by the token's decimals.

use crate::address::{parse_address, TokenRef};
use crate::amount::to_decimal;
use crate::block::BlockReference;
use crate::cache::DecimalsCache;
use crate::chain::ChainSpec;
use crate::erc20::{balance_of_calldata, decode_uint256};
use crate::error::{ReconError, RpcError};
use crate::rpc::RpcClient;
use crate::types::BlockTag;
use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// A balance in both smallest-unit and human form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub raw: U256,
    pub decimals: u8,
    pub amount: Decimal,
}

pub struct BalanceFetcher {
    decimals: Arc<DecimalsCache>,
}

impl BalanceFetcher {
    pub fn new(decimals: Arc<DecimalsCache>) -> Self {
        Self { decimals }
    }

    /// Validate raw addresses, then fetch. Malformed input costs no RPC call.
    pub async fn fetch_raw(
        &self,
        chain: &ChainSpec,
        rpc: &RpcClient,
        wallet: &str,
        token: Option<&str>,
        block: Option<&BlockReference>,
    ) -> Result<Decimal, ReconError> {
        let wallet = parse_address(wallet)?;
        let token = TokenRef::parse(token)?;
        let tag = block.map_or(BlockTag::Latest, BlockReference::tag);
        Ok(self.fetch(chain, rpc, wallet, token, tag).await?.amount)
    }

    /// Balance of `wallet` at `block`.
    pub async fn fetch(
        &self,
        chain: &ChainSpec,
        rpc: &RpcClient,
        wallet: Address,
        token: TokenRef,
        block: BlockTag,
    ) -> Result<Balance, ReconError> {
        let (raw, decimals) = match token {
            TokenRef::Native => {
                let raw = rpc.get_balance(wallet, block).await?;
                (raw, chain.native_decimals)
            }
            TokenRef::Erc20(contract) => {
                // decimals first: it is what tells us the address is a token at all
                let decimals = self.decimals.decimals_for(chain, rpc, token).await?;
                let data = rpc
                    .eth_call(contract, &balance_of_calldata(wallet), block)
                    .await?;
                let raw = decode_uint256(&data).map_err(|e| {
                    RpcError::invalid_response(format!("balanceOf(0x{:x}): {}", wallet, e))
                })?;
                (raw, decimals)
            }
        };

        let amount = to_decimal(raw, decimals)?;
        debug!(
            "{} balance of {:?} ({:?}) at {}: {} raw / {} decimals",
            chain.id, wallet, token, block, raw, decimals
        );
        Ok(Balance {
            raw,
            decimals,
            amount,
        })
    }
}
