//! Leaf encoding
//!
//! A market leaf is `keccak256(abi.encodePacked(uint256 marketId, address marketAddress))`,
//! i.e. the 32-byte big-endian id followed by the 20-byte address. The factory
//! contract recomputes the same digest when it checks a membership proof.

use alloy_primitives::{hex, Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::hasher::Keccak256Hasher;

/// Account identifier width
pub const ADDRESS_LEN: usize = 20;

/// Length of the packed `(uint256, address)` encoding
pub const PACKED_LEAF_LEN: usize = 32 + ADDRESS_LEN;

/// Leaf input error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeafError {
    /// A leaf field could not be interpreted
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl LeafError {
    fn market_id(reason: impl Into<String>) -> Self {
        Self::InvalidInput { field: "market id", reason: reason.into() }
    }

    fn market_address(reason: impl Into<String>) -> Self {
        Self::InvalidInput { field: "market address", reason: reason.into() }
    }
}

/// A market registered by the factory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketLeaf {
    /// Factory-assigned market id
    pub market_id: U256,
    /// Deployed market contract
    pub market_address: Address,
}

impl MarketLeaf {
    /// Create a leaf from typed fields
    pub const fn new(market_id: U256, market_address: Address) -> Self {
        Self { market_id, market_address }
    }

    /// Parse a leaf from its textual form.
    ///
    /// The id may be decimal or `0x`-prefixed hex; the address must be 20 bytes of hex.
    pub fn parse(market_id: &str, market_address: &str) -> Result<Self, LeafError> {
        Ok(Self::new(parse_market_id(market_id)?, parse_market_address(market_address)?))
    }

    /// Build a leaf from raw big-endian id bytes and raw address bytes
    pub fn from_raw(market_id: &[u8], market_address: &[u8]) -> Result<Self, LeafError> {
        let market_id = U256::try_from_be_slice(market_id)
            .ok_or_else(|| LeafError::market_id(format!("{} bytes exceed 256 bits", market_id.len())))?;
        if market_address.len() != ADDRESS_LEN {
            return Err(LeafError::market_address(format!(
                "expected 20 bytes, got {}",
                market_address.len()
            )));
        }
        Ok(Self::new(market_id, Address::from_slice(market_address)))
    }

    /// Packed encoding: 32-byte big-endian id followed by the address
    pub fn packed(&self) -> [u8; PACKED_LEAF_LEN] {
        let mut packed = [0u8; PACKED_LEAF_LEN];
        packed[..32].copy_from_slice(&self.market_id.to_be_bytes::<32>());
        packed[32..].copy_from_slice(self.market_address.as_slice());
        packed
    }

    /// Leaf digest committed into the tree
    pub fn digest(&self) -> B256 {
        Keccak256Hasher::hash(&self.packed())
    }
}

/// Encode a `(marketId, marketAddress)` pair into its leaf digest
pub fn encode_leaf(market_id: U256, market_address: Address) -> B256 {
    MarketLeaf::new(market_id, market_address).digest()
}

/// Parse a market id given as decimal or `0x`-prefixed hex
pub fn parse_market_id(s: &str) -> Result<U256, LeafError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(LeafError::market_id("empty"));
    }
    s.parse::<U256>().map_err(|e| LeafError::market_id(format!("{s}: {e}")))
}

/// Parse a 20-byte hex address, `0x` prefix optional
pub fn parse_market_address(s: &str) -> Result<Address, LeafError> {
    let bytes = hex::decode(s.trim()).map_err(|e| LeafError::market_address(format!("{s}: {e}")))?;
    if bytes.len() != ADDRESS_LEN {
        return Err(LeafError::market_address(format!("expected 20 bytes, got {}", bytes.len())));
    }
    Ok(Address::from_slice(&bytes))
}
