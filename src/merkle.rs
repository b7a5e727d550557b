//! Merkle tree committing bundle leaves.
//!
//! Pairs are hashed sorted (`keccak256(min(a,b) || max(a,b))`) and odd layers
//! are zero-padded, so independent recomputations over the same leaf ordering
//! commit to the same root and proofs verify without a position index.

use alloy::primitives::{keccak256, B256};

/// Errors returned by [`MerkleTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    /// The tree has no leaves.
    #[error("empty tree")]
    EmptyTree,
    /// Requested leaf index is out of bounds.
    #[error("leaf index {0} out of bounds")]
    IndexOutOfBounds(usize),
}

/// Merkle tree over bundle leaf hashes.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// Tree layers, leaves first, root layer last. Never empty.
    layers: Vec<Vec<B256>>,
}

impl MerkleTree {
    /// Builds a tree from `leaves`. A single-leaf tree's root is the leaf.
    pub fn new(leaves: Vec<B256>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyTree);
        }

        let mut layers = vec![leaves];
        while layers.last().is_some_and(|layer| layer.len() > 1) {
            let prev = &layers[layers.len() - 1];
            let mut next = Vec::with_capacity(prev.len().div_ceil(2));
            for pair in prev.chunks(2) {
                let right = pair.get(1).copied().unwrap_or(B256::ZERO);
                next.push(hash_pair(pair[0], right));
            }
            layers.push(next);
        }

        Ok(Self { layers })
    }

    /// Root of the tree.
    pub fn root(&self) -> B256 {
        self.layers[self.layers.len() - 1][0]
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.layers[0].len()
    }

    /// Whether the tree has no leaves. Always false: construction rejects
    /// empty leaf sets.
    pub fn is_empty(&self) -> bool {
        self.layers[0].is_empty()
    }

    /// Inclusion proof for the leaf at `index`. Empty for a single-leaf tree.
    pub fn proof(&self, index: usize) -> Result<Vec<B256>, MerkleError> {
        if index >= self.len() {
            return Err(MerkleError::IndexOutOfBounds(index));
        }

        let mut proof = Vec::with_capacity(self.layers.len() - 1);
        let mut idx = index;
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = idx ^ 1;
            proof.push(layer.get(sibling).copied().unwrap_or(B256::ZERO));
            idx /= 2;
        }

        Ok(proof)
    }
}

/// Verifies an inclusion proof produced by [`MerkleTree::proof`].
pub fn verify_proof(root: B256, leaf: B256, proof: &[B256]) -> bool {
    proof.iter().fold(leaf, |acc, sibling| hash_pair(acc, *sibling)) == root
}

/// Root committing `leaves`, or [`B256::ZERO`] for an empty set.
pub fn commit(leaves: Vec<B256>) -> Result<B256, MerkleError> {
    if leaves.is_empty() {
        return Ok(B256::ZERO);
    }
    Ok(MerkleTree::new(leaves)?.root())
}

fn hash_pair(a: B256, b: B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo.as_slice());
    buf[32..].copy_from_slice(hi.as_slice());
    keccak256(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> B256 {
        B256::from([byte; 32])
    }

    #[test]
    fn empty_tree_is_rejected() {
        assert_eq!(MerkleTree::new(vec![]).unwrap_err(), MerkleError::EmptyTree);
        assert_eq!(commit(vec![]), Ok(B256::ZERO));
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let tree = MerkleTree::new(vec![leaf(42)]).unwrap();
        assert_eq!(tree.root(), leaf(42));
        assert_eq!(tree.proof(0), Ok(vec![]));
        assert!(verify_proof(tree.root(), leaf(42), &[]));
    }

    #[test]
    fn pair_hash_is_order_invariant() {
        let ab = MerkleTree::new(vec![leaf(1), leaf(2)]).unwrap().root();
        let ba = MerkleTree::new(vec![leaf(2), leaf(1)]).unwrap().root();
        assert_eq!(ab, ba);
    }

    #[test]
    fn proofs_verify_for_odd_leaf_counts() {
        let leaves: Vec<_> = (0u8..7).map(leaf).collect();
        let tree = MerkleTree::new(leaves.clone()).unwrap();
        for (i, l) in leaves.iter().enumerate() {
            let proof = tree.proof(i).unwrap();
            assert!(verify_proof(tree.root(), *l, &proof), "leaf {i}");
        }
        assert!(!verify_proof(tree.root(), leaf(9), &tree.proof(0).unwrap()));
    }

    #[test]
    fn out_of_bounds_proof_is_rejected() {
        let tree = MerkleTree::new(vec![leaf(1), leaf(2)]).unwrap();
        assert_eq!(tree.proof(2), Err(MerkleError::IndexOutOfBounds(2)));
    }

    #[test]
    fn identical_leaves_identical_root() {
        let leaves: Vec<_> = (0u8..12).map(leaf).collect();
        let a = MerkleTree::new(leaves.clone()).unwrap().root();
        let b = MerkleTree::new(leaves).unwrap().root();
        assert_eq!(a, b);
    }
}
