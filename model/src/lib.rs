pub mod account;
pub mod address_hexadecimal;
pub mod order;
pub mod quota_token;
pub mod resource;
pub mod service;
pub mod token_policy;
pub mod withdrawal;

use hex::FromHexError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A 32 byte chain address (accounts on the payment chain, token audiences,
/// withdrawal recipients). Serialized as a `0x` prefixed hex string.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(#[serde(with = "address_hexadecimal")] pub [u8; 32]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let mut address = Self::default();
        if bytes.len() != address.0.len() {
            return None;
        }
        address.0.copy_from_slice(bytes);
        Some(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut bytes = [0u8; 2 + 32 * 2];
        bytes[..2].copy_from_slice(b"0x");
        // Can only fail if the buffer size does not match but we know it is correct.
        hex::encode_to_slice(self.0, &mut bytes[2..]).unwrap();
        // Hex encoding is always valid utf8.
        f.write_str(std::str::from_utf8(&bytes).unwrap())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").ok_or(FromHexError::InvalidStringLength)?;
        let mut address = Self::default();
        hex::decode_to_slice(s, &mut address.0)?;
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip() {
        let original = "0x0101010101010101010101010101010101010101010101010101010101010101";
        let address: Address = original.parse().unwrap();
        assert_eq!(address.to_string(), original);
    }

    #[test]
    fn address_requires_prefix_and_length() {
        assert!(Address::from_str("0101").is_err());
        assert!(Address::from_str("0x01").is_err());
        assert!(Address::from_str("0xzz01010101010101010101010101010101010101010101010101010101010101").is_err());
    }

    #[test]
    fn address_serde() {
        let address = Address([0x11; 32]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(
            json,
            "\"0x1111111111111111111111111111111111111111111111111111111111111111\""
        );
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), address);
    }
}
