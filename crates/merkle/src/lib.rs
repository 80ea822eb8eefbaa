//! Merkle commitment over the prediction-market registry
//!
//! Every market the factory creates becomes one leaf,
//! `keccak256(abi.encodePacked(marketId, marketAddress))`, appended in event
//! order. Key properties:
//! - Append-only: leaves are never reordered or removed
//! - Sorted pairs: parent = keccak256(min(a, b) ‖ max(a, b)), matching the
//!   on-chain verifier
//! - Positional pairing: insertion order determines the root

mod hasher;
mod leaf;
mod proof;
mod tree;

use alloy_primitives::B256;

pub use hasher::Keccak256Hasher;
pub use leaf::{
    encode_leaf, parse_market_address, parse_market_id, LeafError, MarketLeaf, ADDRESS_LEN,
    PACKED_LEAF_LEN,
};
pub use proof::{compute_root, verify_proof, MerkleProof};
pub use tree::CommitmentTree;

/// Root of a tree with no leaves.
///
/// Zero is what an unset `bytes32` root reads as on-chain before the first publish.
pub const EMPTY_ROOT: B256 = B256::ZERO;
