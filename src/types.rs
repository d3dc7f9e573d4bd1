//! Ethereum JSON-RPC types
//!
//! Block header subset and block tag used by the resolver and fetcher,
//! plus hex quantity decoding for JSON-RPC responses.

use crate::error::RpcError;
use alloy_primitives::U256;
use serde::{Deserialize, Deserializer};
use std::fmt;

/// The fields of a block the resolver needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BlockHeader {
    /// Block number (hex string in JSON, parsed to u64)
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    /// Unix timestamp in seconds (hex string in JSON)
    #[serde(rename = "timestamp", deserialize_with = "deserialize_hex_u64")]
    pub timestamp: u64,
}

/// Block selector for state queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Latest => f.write_str("latest"),
            BlockTag::Number(n) => write!(f, "0x{:x}", n),
        }
    }
}

/// Pad an odd-length hex string with a leading zero.
/// This handles cases where RPC returns hex strings without leading zeros.
fn pad_hex_string(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Parse a hex quantity (`0x1a`) into u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, RpcError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Err(RpcError::invalid_response(format!("empty quantity {:?}", s)));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| RpcError::invalid_response(format!("bad quantity {:?}: {}", s, e)))
}

/// Parse a hex quantity into U256. `0x` decodes as zero.
pub fn parse_hex_u256(s: &str) -> Result<U256, RpcError> {
    let bytes = decode_hex_bytes(s)?;
    if bytes.len() > 32 {
        return Err(RpcError::invalid_response(format!(
            "quantity wider than 256 bits: {} bytes",
            bytes.len()
        )));
    }
    Ok(U256::from_be_slice(&bytes))
}

/// Decode `0x`-prefixed hex data into bytes.
pub fn decode_hex_bytes(s: &str) -> Result<Vec<u8>, RpcError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(Vec::new());
    }
    hex::decode(pad_hex_string(digits))
        .map_err(|e| RpcError::invalid_response(format!("bad hex {:?}: {}", s, e)))
}

fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}
