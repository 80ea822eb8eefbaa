//! Keccak256 hasher for the commitment tree

use alloy_primitives::B256;
use tiny_keccak::{Hasher, Keccak};

/// Keccak256 hasher
#[derive(Debug, Clone, Copy)]
pub struct Keccak256Hasher;

impl Keccak256Hasher {
    /// Hash arbitrary bytes
    pub fn hash(data: &[u8]) -> B256 {
        let mut hasher = Keccak::v256();
        hasher.update(data);
        let mut output = B256::ZERO;
        hasher.finalize(&mut output.0);
        output
    }

    /// Hash two nodes after ordering them by raw byte value.
    ///
    /// The parent does not depend on which child sits on the left, which is
    /// what lets proofs carry bare siblings without direction bits.
    pub fn hash_sorted_pair(a: &B256, b: &B256) -> B256 {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let mut hasher = Keccak::v256();
        hasher.update(low.as_slice());
        hasher.update(high.as_slice());
        let mut output = B256::ZERO;
        hasher.finalize(&mut output.0);
        output
    }
}
