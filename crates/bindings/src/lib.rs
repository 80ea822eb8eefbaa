//! Contract bindings
//!
//! Hand-written interface to the market factory: the `MarketCreated` event the
//! indexer follows, and the root getter/setter the publisher calls.

mod log;

use alloy_primitives::B256;
use predmarket_merkle::Keccak256Hasher;

pub use log::{parse_quantity, DecodeError, MarketCreated, RawLog};

/// Event emitted by the factory for every new market
pub const MARKET_CREATED_EVENT: &str = "MarketCreated(uint256,address)";

/// Factory entry point that stores the published registry root
pub const UPDATE_ROOT_FUNCTION: &str = "updateMarketsMerkleRoot(bytes32)";

/// Public getter of the stored registry root
pub const ROOT_GETTER_FUNCTION: &str = "marketsMerkleRoot()";

/// 4-byte function selector for a canonical signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256Hasher::hash(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// `topic0` of an event with the given canonical signature
pub fn event_topic(signature: &str) -> B256 {
    Keccak256Hasher::hash(signature.as_bytes())
}

/// `topic0` of the `MarketCreated` event
pub fn market_created_topic() -> B256 {
    event_topic(MARKET_CREATED_EVENT)
}

/// Calldata for `updateMarketsMerkleRoot(bytes32)`
pub fn encode_update_root(root: &B256) -> Vec<u8> {
    let mut calldata = Vec::with_capacity(4 + 32);
    calldata.extend_from_slice(&selector(UPDATE_ROOT_FUNCTION));
    calldata.extend_from_slice(root.as_slice());
    calldata
}

/// Calldata for `marketsMerkleRoot()`
pub fn encode_root_getter() -> Vec<u8> {
    selector(ROOT_GETTER_FUNCTION).to_vec()
}

/// Decode a single `bytes32` return value
pub fn decode_bytes32(data: &[u8]) -> Result<B256, DecodeError> {
    if data.len() < 32 {
        return Err(DecodeError::ShortReturn(data.len()));
    }
    Ok(B256::from_slice(&data[..32]))
}

/// Receipt status of a mined transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TxStatus {
    /// Execution reverted
    Reverted = 0,
    /// Execution succeeded
    Success = 1,
}

impl TxStatus {
    /// Interpret the hex `status` field of a receipt
    pub fn from_quantity(status: &str) -> Result<Self, DecodeError> {
        match parse_quantity(status)? {
            1 => Ok(Self::Success),
            _ => Ok(Self::Reverted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selector() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_known_event_topic() {
        let transfer: B256 = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
            .parse()
            .unwrap();
        assert_eq!(event_topic("Transfer(address,address,uint256)"), transfer);
        assert_eq!(market_created_topic(), Keccak256Hasher::hash(MARKET_CREATED_EVENT.as_bytes()));
    }

    #[test]
    fn test_update_root_calldata() {
        let root = B256::repeat_byte(0x42);
        let calldata = encode_update_root(&root);
        assert_eq!(calldata.len(), 36);
        assert_eq!(&calldata[..4], &selector(UPDATE_ROOT_FUNCTION));
        assert_eq!(&calldata[4..], root.as_slice());
    }

    #[test]
    fn test_decode_bytes32() {
        let mut data = vec![0u8; 32];
        data[31] = 5;
        assert_eq!(decode_bytes32(&data).unwrap(), B256::with_last_byte(5));
        assert!(matches!(decode_bytes32(&[0u8; 4]), Err(DecodeError::ShortReturn(4))));
    }

    #[test]
    fn test_tx_status() {
        assert_eq!(TxStatus::from_quantity("0x1").unwrap(), TxStatus::Success);
        assert_eq!(TxStatus::from_quantity("0x0").unwrap(), TxStatus::Reverted);
        assert!(TxStatus::from_quantity("zz").is_err());
    }
}
