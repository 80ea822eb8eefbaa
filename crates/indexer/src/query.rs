//! Proof queries
//!
//! Read-only access to the registry for consumers that need the current root
//! or an inclusion proof for a market.

use alloy_primitives::{Address, B256, U256};
use predmarket_merkle::{verify_proof, CommitmentTree, LeafError, MarketLeaf};
use serde::Serialize;

use crate::controller::{IndexReader, IndexStatus};

/// Query error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The market is not committed
    #[error("market {0} is not in the registry")]
    NotFound(U256),
    /// No market has been committed yet
    #[error("registry has no markets yet")]
    Unavailable,
    /// Malformed market id or address
    #[error(transparent)]
    InvalidInput(#[from] LeafError),
}

/// Inclusion proof for one market against the current root
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketProof {
    /// Market id
    pub market_id: U256,
    /// Market contract
    pub market_address: Address,
    /// Leaf digest
    pub leaf: B256,
    /// Leaf position
    pub leaf_index: usize,
    /// Root the proof verifies against
    pub root: B256,
    /// Sibling digests, leaf level first
    pub path: Vec<B256>,
}

/// Answers root and proof queries from a consistent snapshot
#[derive(Clone, Debug)]
pub struct ProofService {
    reader: IndexReader,
}

impl ProofService {
    /// Create a service over `reader`
    pub const fn new(reader: IndexReader) -> Self {
        Self { reader }
    }

    /// Current root
    pub async fn get_root(&self) -> Result<B256, QueryError> {
        self.reader
            .read(|tree, _| if tree.is_empty() { Err(QueryError::Unavailable) } else { Ok(tree.root()) })
            .await
    }

    /// Proof for a market given its id and address
    pub async fn get_proof(
        &self,
        market_id: U256,
        market_address: Address,
    ) -> Result<MarketProof, QueryError> {
        let leaf = MarketLeaf::new(market_id, market_address);
        self.reader.read(|tree, _| prove(tree, leaf)).await
    }

    /// Proof for a market looked up by id alone
    pub async fn get_proof_by_id(&self, market_id: U256) -> Result<MarketProof, QueryError> {
        self.reader
            .read(|tree, ledger| {
                let entry = ledger.get(&market_id).ok_or(if tree.is_empty() {
                    QueryError::Unavailable
                } else {
                    QueryError::NotFound(market_id)
                })?;
                prove(tree, entry.leaf())
            })
            .await
    }

    /// Check a proof for a market against a root
    pub fn verify(market_id: U256, market_address: Address, path: &[B256], root: &B256) -> bool {
        verify_proof(&MarketLeaf::new(market_id, market_address).digest(), path, root)
    }

    /// Registry summary
    pub async fn status(&self) -> IndexStatus {
        self.reader.status().await
    }
}

fn prove(tree: &CommitmentTree, leaf: MarketLeaf) -> Result<MarketProof, QueryError> {
    if tree.is_empty() {
        return Err(QueryError::Unavailable);
    }
    let proof = tree.proof_for_leaf(&leaf.digest()).ok_or(QueryError::NotFound(leaf.market_id))?;
    Ok(MarketProof {
        market_id: leaf.market_id,
        market_address: leaf.market_address,
        leaf: proof.leaf,
        leaf_index: proof.leaf_index,
        root: proof.root,
        path: proof.siblings,
    })
}
