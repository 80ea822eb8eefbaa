//! Inclusion proof generation and verification

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::hasher::Keccak256Hasher;

/// Inclusion proof for one leaf, bound to the root it was generated against
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleProof {
    /// Leaf digest being proven
    pub leaf: B256,
    /// Position of the leaf in insertion order
    pub leaf_index: usize,
    /// Sibling digests from the leaf level up to just below the root
    pub siblings: Vec<B256>,
    /// Root at generation time
    pub root: B256,
}

impl MerkleProof {
    /// Verify against the root captured alongside the proof
    pub fn verify(&self) -> bool {
        verify_proof(&self.leaf, &self.siblings, &self.root)
    }

    /// Verify against some other root
    pub fn verify_against(&self, root: &B256) -> bool {
        verify_proof(&self.leaf, &self.siblings, root)
    }

    /// Root implied by the leaf and its siblings
    pub fn compute_root(&self) -> B256 {
        compute_root(&self.leaf, &self.siblings)
    }
}

/// Fold a leaf up through its sibling path using the sorted-pair rule
pub fn compute_root(leaf: &B256, siblings: &[B256]) -> B256 {
    siblings
        .iter()
        .fold(*leaf, |node, sibling| Keccak256Hasher::hash_sorted_pair(&node, sibling))
}

/// Check that `leaf` and `siblings` reproduce `root`
pub fn verify_proof(leaf: &B256, siblings: &[B256], root: &B256) -> bool {
    compute_root(leaf, siblings) == *root
}
