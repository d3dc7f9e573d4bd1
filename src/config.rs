//! Endpoint configuration and engine tuning
//!
//! RPC endpoints come from the environment (`AVALANCHE=https://...` or
//! `AVALANCHE_RPC_URL=https://...`) and optionally from an endpoints file,
//! which takes precedence.
//!
//! # Example file format:
//! ```text
//! # chain alias = endpoint
//! avalanche = https://api.avax.network/ext/bc/C/rpc
//! arb1 = https://arb1.arbitrum.io/rpc
//! # lowest block the timestamp search will consider
//! arb1.genesis = 22207817
//! ```

use crate::chain::{ChainId, ChainRegistry, ChainSpec};
use crate::error::ConfigError;
use crate::rpc::RetryPolicy;
use anyhow::{Context, Result};
use reqwest::Url;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Endpoint URLs and search floors per chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConfig {
    pub endpoints: HashMap<ChainId, String>,
    pub genesis: HashMap<ChainId, u64>,
}

impl EndpointConfig {
    /// Read endpoints from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read endpoints through `lookup`, trying `<CHAIN>` then `<CHAIN>_RPC_URL`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        for chain in ChainId::all() {
            let var = chain.env_var();
            let value = lookup(var)
                .or_else(|| lookup(&format!("{}_RPC_URL", var)))
                .filter(|v| !v.trim().is_empty());
            if let Some(url) = value {
                config.endpoints.insert(chain, url.trim().to_string());
            }
        }
        config
    }

    /// Overlay entries from an endpoints file onto this config.
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read endpoints file: {:?}", path))?;

        for (line_num, line) in contents.lines().enumerate() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').with_context(|| {
                format!("Expected `chain = url` on line {}: {}", line_num + 1, line)
            })?;
            let (key, value) = (key.trim(), value.trim());

            let (alias, is_genesis) = match key.strip_suffix(".genesis") {
                Some(alias) => (alias, true),
                None => (key, false),
            };
            let chain = ChainId::from_alias(alias).with_context(|| {
                format!("Unknown chain {:?} on line {}", alias, line_num + 1)
            })?;

            if is_genesis {
                let block = value.parse::<u64>().with_context(|| {
                    format!("Invalid genesis block on line {}: {}", line_num + 1, value)
                })?;
                self.genesis.insert(chain, block);
            } else {
                self.endpoints.insert(chain, value.to_string());
            }
        }
        Ok(())
    }

    /// Validate URLs and build the chain registry.
    pub fn into_registry(self) -> Result<ChainRegistry, ConfigError> {
        let mut specs = Vec::with_capacity(self.endpoints.len());
        for (chain, url) in self.endpoints {
            let parsed = Url::parse(&url)
                .map_err(|_| ConfigError::InvalidEndpoint { chain, url: url.clone() })?;
            let genesis = self.genesis.get(&chain).copied().unwrap_or(0);
            specs.push(ChainSpec::new(chain, parsed).with_genesis_block(genesis));
        }
        Ok(ChainRegistry::new(specs))
    }
}

/// Load endpoints from the environment, then the optional file.
pub fn load_endpoints(path: Option<&Path>) -> Result<EndpointConfig> {
    let mut config = EndpointConfig::from_env();
    if let Some(path) = path {
        config.merge_file(path)?;
    }
    Ok(config)
}

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Rows processed concurrently.
    pub max_workers: usize,
    /// RPC requests in flight per chain.
    pub per_chain_in_flight: usize,
    /// HTTP timeout for a single attempt.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            per_chain_in_flight: 4,
            request_timeout: Duration::from_secs(20),
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("AVALANCHE", "https://avax.example/rpc"),
            ("ARBITRUM_RPC_URL", "https://arb.example"),
            ("BASE", "   "),
        ]
        .into_iter()
        .collect();
        let config = EndpointConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[&ChainId::Avalanche], "https://avax.example/rpc");
        assert_eq!(config.endpoints[&ChainId::Arbitrum], "https://arb.example");
    }

    #[test]
    fn test_merge_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# endpoints").unwrap();
        writeln!(file, "").unwrap();
        writeln!(file, "Avalanche = https://file.example/avax").unwrap();
        writeln!(file, "arb1 = https://file.example/arb").unwrap();
        writeln!(file, "arb1.genesis = 22207817").unwrap();
        file.flush().unwrap();

        let mut config = EndpointConfig::from_lookup(|k| {
            (k == "AVALANCHE").then(|| "https://env.example/avax".to_string())
        });
        config.merge_file(file.path()).unwrap();
        assert_eq!(config.endpoints[&ChainId::Avalanche], "https://file.example/avax");
        assert_eq!(config.genesis[&ChainId::Arbitrum], 22_207_817);

        let registry = config.into_registry().unwrap();
        assert_eq!(registry.resolve("arbitrum").unwrap().genesis_block, 22_207_817);
        assert_eq!(registry.resolve("avax").unwrap().genesis_block, 0);
    }

    #[test]
    fn test_merge_file_rejects_unknown_chain() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "solana = https://sol.example").unwrap();
        file.flush().unwrap();
        let mut config = EndpointConfig::default();
        assert!(config.merge_file(file.path()).is_err());
    }

    #[test]
    fn test_merge_file_rejects_malformed_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "avalanche https://avax.example").unwrap();
        file.flush().unwrap();
        let mut config = EndpointConfig::default();
        assert!(config.merge_file(file.path()).is_err());
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let mut config = EndpointConfig::default();
        config.endpoints.insert(ChainId::Polygon, "::nope".to_string());
        assert!(matches!(
            config.into_registry(),
            Err(ConfigError::InvalidEndpoint { chain: ChainId::Polygon, .. })
        ));
    }
}
