//! `MarketCreated` log decoding

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::market_created_topic;

/// Log decoding error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Log carries no `topic0`
    #[error("log has no topics")]
    MissingTopic,
    /// `topic0` belongs to another event
    #[error("unexpected event topic {0}")]
    UnexpectedTopic(B256),
    /// Log has not been mined yet
    #[error("log has no block position")]
    Pending,
    /// Fewer than the two event arguments were found
    #[error("expected 2 event words, found {0}")]
    MissingWords(usize),
    /// Address word has non-zero upper bytes
    #[error("address word has non-zero padding: {0}")]
    DirtyAddress(B256),
    /// Malformed hex quantity
    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),
    /// Return data shorter than one word
    #[error("return data too short: {0} bytes")]
    ShortReturn(usize),
}

/// Log entry as returned by `eth_getLogs`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics, `topic0` first
    pub topics: Vec<B256>,
    /// Non-indexed arguments
    #[serde(default)]
    pub data: Bytes,
    /// Hex block number, `None` while pending
    #[serde(default)]
    pub block_number: Option<String>,
    /// Hex index of the log within its block
    #[serde(default)]
    pub log_index: Option<String>,
    /// Transaction that emitted the log
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    /// Set when the log was dropped by a reorg
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// `(block, log index)` position of a mined log
    pub fn position(&self) -> Result<(u64, u64), DecodeError> {
        let block = parse_quantity(self.block_number.as_deref().ok_or(DecodeError::Pending)?)?;
        let index = parse_quantity(self.log_index.as_deref().ok_or(DecodeError::Pending)?)?;
        Ok((block, index))
    }
}

/// Decoded `MarketCreated(uint256 marketId, address marketAddress)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketCreated {
    /// Factory-assigned market id
    pub market_id: U256,
    /// Deployed market contract
    pub market_address: Address,
    /// Block containing the event
    pub block_number: u64,
    /// Position of the log within the block
    pub log_index: u64,
}

impl MarketCreated {
    /// Decode a raw log.
    ///
    /// Indexed arguments come from topics and the rest from data, so both the
    /// indexed and the non-indexed declaration of the event are accepted.
    pub fn decode(log: &RawLog) -> Result<Self, DecodeError> {
        let topic0 = log.topics.first().ok_or(DecodeError::MissingTopic)?;
        if *topic0 != market_created_topic() {
            return Err(DecodeError::UnexpectedTopic(*topic0));
        }
        let (block_number, log_index) = log.position()?;

        let words: Vec<B256> = log.topics[1..]
            .iter()
            .copied()
            .chain(log.data.chunks_exact(32).map(B256::from_slice))
            .take(2)
            .collect();
        let &[id_word, address_word] = words.as_slice() else {
            return Err(DecodeError::MissingWords(words.len()));
        };

        if address_word[..12].iter().any(|b| *b != 0) {
            return Err(DecodeError::DirtyAddress(address_word));
        }

        Ok(Self {
            market_id: U256::from_be_bytes(id_word.0),
            market_address: Address::from_slice(&address_word[12..]),
            block_number,
            log_index,
        })
    }
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(s: &str) -> Result<u64, DecodeError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|_| DecodeError::InvalidQuantity(s.to_string()))
}
