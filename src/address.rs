//! Address validation
//!
//! Wallet and token addresses are checked here, before any RPC call is made.
//! Accepts `0x` + 40 hex chars. All-lowercase and all-uppercase input is
//! accepted as-is; mixed case must carry a valid EIP-55 checksum.

use crate::error::ReconError;
use alloy_primitives::Address;

/// Token column values that mean "the chain's native token".
const NATIVE_SENTINELS: &[&str] = &["", "n/a", "na", "none", "nan", "null", "native", "-"];

/// Which asset a row refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenRef {
    Native,
    Erc20(Address),
}

impl TokenRef {
    /// Parse the optional token column of a request.
    pub fn parse(raw: Option<&str>) -> Result<Self, ReconError> {
        let raw = match raw {
            Some(s) => s.trim(),
            None => return Ok(TokenRef::Native),
        };
        if NATIVE_SENTINELS.contains(&raw.to_lowercase().as_str()) {
            return Ok(TokenRef::Native);
        }
        parse_address(raw).map(TokenRef::Erc20)
    }

    pub fn is_native(&self) -> bool {
        matches!(self, TokenRef::Native)
    }
}

/// Parse and validate a 20-byte hex address.
pub fn parse_address(raw: &str) -> Result<Address, ReconError> {
    let s = raw.trim();
    let hex_part = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| ReconError::InvalidAddress(format!("{:?} is missing the 0x prefix", s)))?;

    if hex_part.len() != 40 {
        return Err(ReconError::InvalidAddress(format!(
            "{:?} must be 40 hex chars, got {}",
            s,
            hex_part.len()
        )));
    }

    let bytes = hex::decode(hex_part)
        .map_err(|_| ReconError::InvalidAddress(format!("{:?} is not valid hex", s)))?;
    let addr = Address::from_slice(&bytes);

    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        let expected = addr.to_checksum(None);
        if expected[2..] != *hex_part {
            return Err(ReconError::InvalidAddress(format!(
                "{:?} fails checksum (expected {})",
                s, expected
            )));
        }
    }

    Ok(addr)
}
