//! ERC20 call encoding
//!
//! Builds calldata for `balanceOf(address)` and `decimals()` and decodes
//! their single-word return values.

use alloy_primitives::{Address, U256};

/// keccak256("balanceOf(address)")[..4]
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// keccak256("decimals()")[..4]
pub const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];

/// Why a return value could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// No return data at all, typical of an address without code.
    Empty,
    /// Return data shorter than one ABI word.
    Short(usize),
    /// Word does not fit the declared return type.
    OutOfRange,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Empty => f.write_str("empty return data (no contract at address?)"),
            DecodeError::Short(n) => write!(f, "return data is {} bytes, expected 32", n),
            DecodeError::OutOfRange => f.write_str("return value out of range"),
        }
    }
}

/// Calldata for `balanceOf(owner)`: selector followed by the left-padded address.
pub fn balance_of_calldata(owner: Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&BALANCE_OF_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(owner.as_slice());
    data
}

pub fn decimals_calldata() -> Vec<u8> {
    DECIMALS_SELECTOR.to_vec()
}

/// Decode a `uint256` return value (first word of the return data).
pub fn decode_uint256(data: &[u8]) -> Result<U256, DecodeError> {
    match data.len() {
        0 => Err(DecodeError::Empty),
        n if n < 32 => Err(DecodeError::Short(n)),
        _ => Ok(U256::from_be_slice(&data[..32])),
    }
}

/// Decode a `uint8` return value. Upper bytes of the word must be zero.
pub fn decode_uint8(data: &[u8]) -> Result<u8, DecodeError> {
    let word = decode_uint256(data)?;
    if word > U256::from(u8::MAX) {
        return Err(DecodeError::OutOfRange);
    }
    Ok(word.as_limbs()[0] as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_of_calldata() {
        let owner = Address::from_slice(
            &hex::decode("70997970c51812dc3a010c7d01b50e0d17dc79c8").unwrap(),
        );
        let data = balance_of_calldata(owner);
        assert_eq!(
            hex::encode(&data),
            "70a08231\
             00000000000000000000000070997970c51812dc3a010c7d01b50e0d17dc79c8"
        );
    }

    #[test]
    fn test_decode_uint8() {
        let mut word = [0u8; 32];
        word[31] = 6;
        assert_eq!(decode_uint8(&word), Ok(6));

        word[0] = 1;
        assert_eq!(decode_uint8(&word), Err(DecodeError::OutOfRange));
    }

    #[test]
    fn test_decode_empty_and_short() {
        assert_eq!(decode_uint256(&[]), Err(DecodeError::Empty));
        assert_eq!(decode_uint256(&[0u8; 4]), Err(DecodeError::Short(4)));
    }
}
