//! Append-only commitment tree

use std::collections::HashMap;

use alloy_primitives::B256;

use crate::{hasher::Keccak256Hasher, proof::MerkleProof, EMPTY_ROOT};

/// Append-only Merkle tree over leaf digests.
///
/// Nodes pair by position (0 with 1, 2 with 3, ...) and each pair is hashed in
/// sorted byte order. A trailing odd node on a level wider than one is paired
/// with itself. Only the rightmost path changes on append, so updates cost
/// O(log n).
#[derive(Clone, Debug)]
pub struct CommitmentTree {
    /// `layers[0]` holds the leaves; the last layer holds only the root
    layers: Vec<Vec<B256>>,
    /// First position of each leaf digest
    positions: HashMap<B256, usize>,
}

impl CommitmentTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self { layers: vec![Vec::new()], positions: HashMap::new() }
    }

    /// Rebuild a tree by replaying an ordered leaf sequence
    pub fn from_leaves<I>(leaves: I) -> Self
    where
        I: IntoIterator<Item = B256>,
    {
        let mut tree = Self::new();
        for leaf in leaves {
            tree.append_leaf(leaf);
        }
        tree
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        self.layers[0].len()
    }

    /// Whether no leaf has been appended yet
    pub fn is_empty(&self) -> bool {
        self.layers[0].is_empty()
    }

    /// Leaves in insertion order
    pub fn leaves(&self) -> &[B256] {
        &self.layers[0]
    }

    /// Current root, [`EMPTY_ROOT`] when the tree has no leaves
    pub fn root(&self) -> B256 {
        self.layers.last().and_then(|top| top.first()).copied().unwrap_or(EMPTY_ROOT)
    }

    /// Position of a leaf digest
    pub fn position(&self, leaf: &B256) -> Option<usize> {
        self.positions.get(leaf).copied()
    }

    /// Append a leaf and return the new root.
    ///
    /// The tree does not deduplicate; callers decide what may enter it.
    pub fn append_leaf(&mut self, leaf: B256) -> B256 {
        let path = self.rightmost_path(leaf);
        let mut index = self.len();
        self.positions.entry(leaf).or_insert(index);

        for (level, node) in path.iter().enumerate() {
            if self.layers.len() == level {
                self.layers.push(Vec::new());
            }
            let layer = &mut self.layers[level];
            if index < layer.len() {
                layer[index] = *node;
            } else {
                layer.push(*node);
            }
            index /= 2;
        }

        self.root()
    }

    /// Root the tree would have after appending `leaf`, without mutating it
    pub fn root_after(&self, leaf: &B256) -> B256 {
        self.rightmost_path(*leaf).last().copied().unwrap_or(EMPTY_ROOT)
    }

    /// Inclusion proof for the leaf at `index`
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        let leaf = *self.layers[0].get(index)?;
        let inner = &self.layers[..self.layers.len() - 1];

        let mut siblings = Vec::with_capacity(inner.len());
        let mut i = index;
        for layer in inner {
            // odd tail pairs with itself
            siblings.push(layer.get(i ^ 1).copied().unwrap_or(layer[i]));
            i /= 2;
        }

        Some(MerkleProof { leaf, leaf_index: index, siblings, root: self.root() })
    }

    /// Inclusion proof for a leaf digest
    pub fn proof_for_leaf(&self, leaf: &B256) -> Option<MerkleProof> {
        self.proof(self.position(leaf)?)
    }

    /// Check a proof path against a root
    pub fn verify(leaf: &B256, siblings: &[B256], root: &B256) -> bool {
        crate::proof::verify_proof(leaf, siblings, root)
    }

    /// Nodes of the rightmost path after appending `leaf`, leaf first, root last
    fn rightmost_path(&self, leaf: B256) -> Vec<B256> {
        let mut path = Vec::with_capacity(self.layers.len() + 1);
        let mut node = leaf;
        let mut index = self.len();
        let mut width = index + 1;
        let mut level = 0;

        loop {
            path.push(node);
            if width == 1 {
                break;
            }
            let sibling = if index % 2 == 1 { self.layers[level][index - 1] } else { node };
            node = Keccak256Hasher::hash_sorted_pair(&sibling, &node);
            index /= 2;
            width = width.div_ceil(2);
            level += 1;
        }

        path
    }
}

impl Default for CommitmentTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_leaf;
    use alloy_primitives::{Address, U256};

    /// Full rebuild, level by level
    fn reference_root(leaves: &[B256]) -> B256 {
        if leaves.is_empty() {
            return EMPTY_ROOT;
        }
        let mut level = leaves.to_vec();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| Keccak256Hasher::hash_sorted_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
        }
        level[0]
    }

    fn leaf(n: u64) -> B256 {
        encode_leaf(U256::from(n), Address::with_last_byte(n as u8))
    }

    #[test]
    fn test_empty_tree() {
        let tree = CommitmentTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.root(), EMPTY_ROOT);
        assert!(tree.proof(0).is_none());
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let mut tree = CommitmentTree::new();
        let l = leaf(1);
        assert_eq!(tree.append_leaf(l), l);
        let proof = tree.proof(0).unwrap();
        assert!(proof.siblings.is_empty());
        assert!(proof.verify());
    }

    #[test]
    fn test_two_market_scenario() {
        let l1 = encode_leaf(U256::from(1u64), Address::repeat_byte(0xaa));
        let l2 = encode_leaf(U256::from(2u64), Address::repeat_byte(0xbb));
        let mut tree = CommitmentTree::new();
        tree.append_leaf(l1);
        let root = tree.append_leaf(l2);

        let (low, high) = if l1 <= l2 { (l1, l2) } else { (l2, l1) };
        let mut concat = Vec::with_capacity(64);
        concat.extend_from_slice(low.as_slice());
        concat.extend_from_slice(high.as_slice());
        assert_eq!(root, Keccak256Hasher::hash(&concat));

        let proof = tree.proof(0).unwrap();
        assert_eq!(proof.siblings, vec![l2]);
        assert_eq!(proof.root, root);
    }

    #[test]
    fn test_odd_leaf_pairs_with_itself() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let tree = CommitmentTree::from_leaves([a, b, c]);
        let ab = Keccak256Hasher::hash_sorted_pair(&a, &b);
        let cc = Keccak256Hasher::hash_sorted_pair(&c, &c);
        assert_eq!(tree.root(), Keccak256Hasher::hash_sorted_pair(&ab, &cc));

        let proof = tree.proof(2).unwrap();
        assert_eq!(proof.siblings, vec![c, ab]);
        assert!(proof.verify());
    }

    #[test]
    fn test_incremental_matches_rebuild() {
        let mut tree = CommitmentTree::new();
        let mut leaves = Vec::new();
        for n in 0..37 {
            let l = leaf(n);
            leaves.push(l);
            assert_eq!(tree.append_leaf(l), reference_root(&leaves), "after {} leaves", leaves.len());
        }
    }

    #[test]
    fn test_every_leaf_verifies_after_each_append() {
        let mut tree = CommitmentTree::new();
        for n in 0..20 {
            tree.append_leaf(leaf(n));
            let root = tree.root();
            for index in 0..tree.len() {
                let proof = tree.proof(index).unwrap();
                assert!(CommitmentTree::verify(&proof.leaf, &proof.siblings, &root));
            }
        }
    }

    #[test]
    fn test_order_matters() {
        let forward = CommitmentTree::from_leaves([leaf(1), leaf(2), leaf(3)]);
        let shuffled = CommitmentTree::from_leaves([leaf(3), leaf(1), leaf(2)]);
        assert_ne!(forward.root(), shuffled.root());
    }

    #[test]
    fn test_stale_proof_fails_against_new_root() {
        let mut tree = CommitmentTree::from_leaves([leaf(1), leaf(2)]);
        let proof = tree.proof(0).unwrap();
        assert!(proof.verify());

        let new_root = tree.append_leaf(leaf(3));
        assert!(!proof.verify_against(&new_root));
        assert!(proof.verify());
    }

    #[test]
    fn test_root_after_does_not_mutate() {
        let mut tree = CommitmentTree::from_leaves([leaf(1), leaf(2), leaf(3)]);
        let before = tree.root();
        let preview = tree.root_after(&leaf(4));
        assert_eq!(tree.root(), before);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.append_leaf(leaf(4)), preview);
    }

    #[test]
    fn test_proof_for_leaf() {
        let tree = CommitmentTree::from_leaves((0..5).map(leaf));
        let proof = tree.proof_for_leaf(&leaf(3)).unwrap();
        assert_eq!(proof.leaf_index, 3);
        assert!(proof.verify());
        assert!(tree.proof_for_leaf(&leaf(99)).is_none());
    }
}
