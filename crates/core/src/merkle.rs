//! Binary Merkle tree over a block's transactions.
//!
//! Leaves are paired left to right; an odd node at the end of a level is
//! carried up unchanged, so `[a, b, c]` and `[a, b, c, c]` commit to
//! different roots. An empty list commits to [`Hash::ZERO`].

use crate::hash::{hash_concat, Hash};
use crate::transaction::BlockTransaction;

fn parent_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|pair| match pair.get(1) {
            Some(right) => hash_concat(&[pair[0].as_ref(), right.as_ref()]),
            None => pair[0],
        })
        .collect()
}

/// Root over a list of leaf hashes.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    MerkleTree::from_leaves(leaves).root()
}

/// A fully materialised tree, kept so inclusion proofs can be produced later.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// Leaves first, root last.
    levels: Vec<Vec<Hash>>,
    leaf_count: usize,
}

/// Inclusion proof for one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf: Hash,
    pub index: usize,
    /// Leaves in the tree; tells which levels promote the node unpaired.
    pub leaf_count: usize,
    /// Sibling hashes from the leaf level upward, skipping promotions.
    pub siblings: Vec<Hash>,
}

impl MerkleTree {
    pub fn from_leaves(leaves: &[Hash]) -> Self {
        if leaves.is_empty() {
            return Self {
                levels: vec![vec![Hash::ZERO]],
                leaf_count: 0,
            };
        }

        let mut levels = vec![leaves.to_vec()];
        while let Some(top) = levels.last() {
            if top.len() <= 1 {
                break;
            }
            let next = parent_level(top);
            levels.push(next);
        }
        Self {
            levels,
            leaf_count: leaves.len(),
        }
    }

    /// Tree over the ordered transactions of a block.
    pub fn from_transactions(transactions: &[BlockTransaction]) -> Self {
        let leaves: Vec<Hash> = transactions.iter().map(BlockTransaction::hash).collect();
        Self::from_leaves(&leaves)
    }

    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or(Hash::ZERO)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            if let Some(sibling) = level.get(idx ^ 1) {
                siblings.push(*sibling);
            }
            idx /= 2;
        }

        Some(MerkleProof {
            leaf: self.levels[0][index],
            index,
            leaf_count: self.leaf_count,
            siblings,
        })
    }
}

impl MerkleProof {
    /// Fold the proof up to a root and compare.
    pub fn verify(&self, root: &Hash) -> bool {
        if self.index >= self.leaf_count {
            return false;
        }

        let mut current = self.leaf;
        let mut idx = self.index;
        let mut width = self.leaf_count;
        let mut siblings = self.siblings.iter();
        while width > 1 {
            if idx ^ 1 < width {
                let Some(sibling) = siblings.next() else {
                    return false;
                };
                current = if idx % 2 == 0 {
                    hash_concat(&[current.as_ref(), sibling.as_ref()])
                } else {
                    hash_concat(&[sibling.as_ref(), current.as_ref()])
                };
            }
            idx /= 2;
            width = width.div_ceil(2);
        }
        siblings.next().is_none() && current == *root
    }
}
