//! Amount conversion
//!
//! On-chain amounts are integers in the token's smallest unit. They are
//! scaled into `Decimal` through their base-10 digits, never through floats.

use crate::error::ReconError;
use alloy_primitives::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;
use tracing::warn;

/// Scale a smallest-unit integer by `10^decimals`.
///
/// Fractional digits beyond `Decimal`'s 28-digit scale are rounded; an
/// integer part wider than 96 bits is an `Overflow`.
pub fn to_decimal(raw: U256, decimals: u8) -> Result<Decimal, ReconError> {
    let digits = raw.to_string();
    let scale = decimals as usize;

    let text = if scale == 0 {
        digits
    } else if digits.len() > scale {
        let (int, frac) = digits.split_at(digits.len() - scale);
        format!("{}.{}", int, frac)
    } else {
        format!("0.{}{}", "0".repeat(scale - digits.len()), digits)
    };

    let value = Decimal::from_str(&text)
        .map(|d| d.normalize())
        .map_err(|_| ReconError::Overflow(format!("{} with {} decimals", raw, decimals)))?;
    if rounded(&text, value) {
        warn!("{} with {} decimals does not fit exactly, rounded to {}", raw, decimals, value);
    }
    Ok(value)
}

/// True when `value` dropped significant digits of the plain decimal `text`.
fn rounded(text: &str, value: Decimal) -> bool {
    let significant = if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    };
    significant != value.to_string()
}

/// Parse a human-entered amount: `"1,234.50"`, `" 12 "`, `"1e-3"`.
pub fn parse_reported(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '_')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

/// Accepts a JSON string or number for a reported balance.
pub fn deserialize_reported<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let text = match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        // arbitrary_precision keeps the literal's digits
        Value::Number(n) => n.to_string(),
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected amount as string or number, got {}",
                other
            )))
        }
    };
    parse_reported(&text)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid amount {:?}", text)))
}
