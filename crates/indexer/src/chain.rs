//! Chain access seam
//!
//! Everything the indexer needs from the chain goes through [`ChainClient`], so
//! the event source and the publisher can run against a node or an in-memory
//! double.

use std::time::Duration;

use alloy_primitives::B256;
use async_trait::async_trait;
use predmarket_bindings::{DecodeError, RawLog};

/// Chain access error
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// HTTP transport failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Node returned a JSON-RPC error object
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
    },
    /// Response did not have the expected shape
    #[error("malformed rpc response: {0}")]
    Malformed(String),
    /// Returned data could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Root update was mined but reverted
    #[error("transaction {0} reverted")]
    Reverted(B256),
    /// Root update was not mined in time
    #[error("transaction {0} not confirmed within {1:?}")]
    Unconfirmed(B256, Duration),
    /// No account is configured to send transactions
    #[error("no signer configured")]
    NoSigner,
}

impl ChainError {
    /// Whether retrying the same call later may succeed
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Rpc { .. } | Self::Unconfirmed(..))
    }
}

/// Reads and writes against the market factory
#[async_trait]
pub trait ChainClient: Send + Sync + std::fmt::Debug {
    /// Current head block number
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// `MarketCreated` logs emitted by the factory in `from_block..=to_block`
    async fn market_created_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError>;

    /// Root currently stored by the factory
    async fn published_root(&self) -> Result<B256, ChainError>;

    /// Send a root update and wait until it is mined successfully.
    ///
    /// Returns the transaction hash.
    async fn submit_root(&self, root: B256) -> Result<B256, ChainError>;
}
