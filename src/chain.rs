//! Chain registry
//!
//! Static table of supported EVM chains, their identifier aliases and
//! native-token metadata. A `ChainRegistry` pairs that table with the RPC
//! endpoints supplied at startup.

use reqwest::Url;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Canonical chain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ChainId {
    Ethereum,
    Arbitrum,
    Optimism,
    Base,
    Polygon,
    Avalanche,
    BnbChain,
}

struct ChainInfo {
    id: ChainId,
    name: &'static str,
    env_var: &'static str,
    aliases: &'static [&'static str],
    native_symbol: &'static str,
    native_decimals: u8,
}

/// Aliases are stored lower-cased; lookups lower-case the input.
const CHAINS: &[ChainInfo] = &[
    ChainInfo {
        id: ChainId::Ethereum,
        name: "Ethereum",
        env_var: "ETHEREUM",
        aliases: &["ethereum", "eth", "mainnet", "ethereum mainnet", "eth mainnet", "homestead"],
        native_symbol: "ETH",
        native_decimals: 18,
    },
    ChainInfo {
        id: ChainId::Arbitrum,
        name: "Arbitrum One",
        env_var: "ARBITRUM",
        aliases: &["arbitrum", "arbitrum one", "arbitrum-one", "arbitrum_one", "arb1", "arb"],
        native_symbol: "ETH",
        native_decimals: 18,
    },
    ChainInfo {
        id: ChainId::Optimism,
        name: "Optimism",
        env_var: "OPTIMISM",
        aliases: &["optimism", "op", "op mainnet", "oeth"],
        native_symbol: "ETH",
        native_decimals: 18,
    },
    ChainInfo {
        id: ChainId::Base,
        name: "Base",
        env_var: "BASE",
        aliases: &["base", "base mainnet"],
        native_symbol: "ETH",
        native_decimals: 18,
    },
    ChainInfo {
        id: ChainId::Polygon,
        name: "Polygon",
        env_var: "POLYGON",
        aliases: &["polygon", "polygon pos", "matic", "pol"],
        native_symbol: "POL",
        native_decimals: 18,
    },
    ChainInfo {
        id: ChainId::Avalanche,
        name: "Avalanche C-Chain",
        env_var: "AVALANCHE",
        aliases: &["avalanche", "avalanche c-chain", "avax", "avaxc", "c-chain"],
        native_symbol: "AVAX",
        native_decimals: 18,
    },
    ChainInfo {
        id: ChainId::BnbChain,
        name: "BNB Smart Chain",
        env_var: "BSC",
        aliases: &["bsc", "bnb", "bnb chain", "bnb smart chain", "binance smart chain"],
        native_symbol: "BNB",
        native_decimals: 18,
    },
];

impl ChainId {
    /// All supported chains, in table order.
    pub fn all() -> impl Iterator<Item = ChainId> {
        CHAINS.iter().map(|c| c.id)
    }

    /// Look up a chain by alias. Case-insensitive, trims whitespace, exact match only.
    pub fn from_alias(raw: &str) -> Option<ChainId> {
        let needle = raw.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        CHAINS
            .iter()
            .find(|c| c.aliases.iter().any(|a| *a == needle))
            .map(|c| c.id)
    }

    fn info(self) -> &'static ChainInfo {
        // The table has exactly one entry per variant.
        CHAINS
            .iter()
            .find(|c| c.id == self)
            .unwrap_or(&CHAINS[0])
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Environment variable holding this chain's RPC endpoint.
    pub fn env_var(self) -> &'static str {
        self.info().env_var
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A configured chain: static metadata plus its RPC endpoint.
#[derive(Debug, Clone)]
pub struct ChainSpec {
    pub id: ChainId,
    pub aliases: &'static [&'static str],
    pub rpc_endpoint: Url,
    pub native_symbol: &'static str,
    pub native_decimals: u8,
    /// Lowest block the resolver will search.
    pub genesis_block: u64,
}

impl ChainSpec {
    pub fn new(id: ChainId, rpc_endpoint: Url) -> Self {
        let info = id.info();
        Self {
            id,
            aliases: info.aliases,
            rpc_endpoint,
            native_symbol: info.native_symbol,
            native_decimals: info.native_decimals,
            genesis_block: 0,
        }
    }

    pub fn with_genesis_block(mut self, block: u64) -> Self {
        self.genesis_block = block;
        self
    }
}

/// Why an identifier did not resolve to a usable chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// No chain has this alias.
    NotFound,
    /// The chain is known but has no endpoint configured.
    Unconfigured(ChainId),
}

/// Immutable set of configured chains, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: HashMap<ChainId, ChainSpec>,
}

impl ChainRegistry {
    pub fn new(specs: impl IntoIterator<Item = ChainSpec>) -> Self {
        Self {
            chains: specs.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    /// Resolve a free-text chain identifier against the configured chains.
    pub fn resolve(&self, raw: &str) -> Result<&ChainSpec, Lookup> {
        let id = ChainId::from_alias(raw).ok_or(Lookup::NotFound)?;
        self.chains.get(&id).ok_or(Lookup::Unconfigured(id))
    }

    pub fn specs(&self) -> impl Iterator<Item = &ChainSpec> {
        self.chains.values()
    }
}
