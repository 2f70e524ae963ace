//! Binary Merkle tree over seal signatures.
//!
//! Structural shape (lazy rebuild-on-dirty, left/right sibling bookkeeping,
//! duplicate-last-on-odd) follows this crate's earlier transcript-proof
//! Merkle tree (`hash_pair`/`build_proof`/`verify_proof`), rebuilt over
//! SHA-256 instead of domain-tagged Blake2b since these leaves are seal
//! signatures, not transcript digests.

use sha2::{Digest, Sha256};

use crate::signer::constant_time_equals;

/// `HashPair(L, R) = SHA-256(L || R)`.
fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn hash_leaf(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn fold_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    let mut next = Vec::with_capacity(level.len().div_ceil(2));
    let mut i = 0;
    while i < level.len() {
        if i + 1 < level.len() {
            next.push(hash_pair(&level[i], &level[i + 1]));
        } else {
            // Odd count: duplicate the final element and hash it with itself.
            next.push(hash_pair(&level[i], &level[i]));
        }
        i += 2;
    }
    next
}

/// A sibling hash encountered while walking a Merkle proof, with the side
/// it occupies relative to the running hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofStep {
    /// Sibling digest paired with the running hash at this level.
    pub sibling: [u8; 32],
    /// `true` if the sibling sits to the left of the running hash.
    pub is_left: bool,
}

/// An O(log n) inclusion proof for a single leaf, verifiable standalone
/// without the source tree.
#[derive(Debug, Clone)]
pub struct MerkleProof {
    leaf_index: usize,
    leaf_hash: [u8; 32],
    siblings: Vec<ProofStep>,
    root_hash: [u8; 32],
}

impl MerkleProof {
    /// Index of the leaf this proof covers.
    pub fn leaf_index(&self) -> usize {
        self.leaf_index
    }

    /// Defensive copy of the leaf hash.
    pub fn leaf_hash(&self) -> [u8; 32] {
        self.leaf_hash
    }

    /// Defensive copy of the sibling path, leaf-adjacent sibling first.
    pub fn siblings(&self) -> Vec<ProofStep> {
        self.siblings.clone()
    }

    /// Defensive copy of the committed root hash.
    pub fn root_hash(&self) -> [u8; 32] {
        self.root_hash
    }

    /// Recomputes the root from `leaf_hash` and the sibling path and
    /// compares it against `root_hash` in constant time. Callers hold an
    /// owned copy of the sibling path via `siblings()`; mutating that copy
    /// never affects this proof's own verification.
    pub fn verify(&self) -> bool {
        let mut current = self.leaf_hash;
        for step in &self.siblings {
            current = if step.is_left {
                hash_pair(&step.sibling, &current)
            } else {
                hash_pair(&current, &step.sibling)
            };
        }
        constant_time_equals(&current, &self.root_hash)
    }
}

/// Binary Merkle tree over 32-byte leaf hashes, with lazy rebuild.
#[derive(Debug, Clone, Default)]
pub struct MerkleTree {
    leaves: Vec<[u8; 32]>,
    levels: Vec<Vec<[u8; 32]>>,
    dirty: bool,
}

impl MerkleTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree whose leaves are the given seal signatures, in order.
    /// Signatures wider than 32 bytes (Ed25519) are folded down with
    /// [`crate::seal::link_hash`] so the tree always operates over
    /// fixed-width leaves regardless of signer kind; a 32-byte signature
    /// (the default `HashChainSigner`) passes through unchanged.
    pub fn from_seals(seals: &[crate::seal::PolicySeal]) -> Self {
        let mut tree = Self::new();
        for seal in seals {
            tree.add_leaf_hash(crate::seal::link_hash(&seal.signature()));
        }
        tree
    }

    /// Hashes `data` with SHA-256 and stores the result as a new leaf,
    /// returning its index.
    pub fn add_leaf(&mut self, data: &[u8]) -> usize {
        self.add_leaf_hash(hash_leaf(data))
    }

    /// Stores a precomputed 32-byte leaf hash directly, returning its
    /// index.
    pub fn add_leaf_hash(&mut self, hash: [u8; 32]) -> usize {
        self.leaves.push(hash);
        self.dirty = true;
        self.leaves.len() - 1
    }

    /// Number of leaves currently in the tree.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether the tree has no leaves.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    fn rebuild_if_dirty(&mut self) {
        if !self.dirty {
            return;
        }
        self.levels.clear();
        if !self.leaves.is_empty() {
            self.levels.push(self.leaves.clone());
            while self.levels.last().unwrap().len() > 1 {
                let next = fold_level(self.levels.last().unwrap());
                self.levels.push(next);
            }
        }
        self.dirty = false;
    }

    /// Returns the current root hash, rebuilding if leaves were added
    /// since the last rebuild. `None` for an empty tree.
    pub fn root_hash(&mut self) -> Option<[u8; 32]> {
        self.rebuild_if_dirty();
        self.levels.last().map(|level| level[0])
    }

    /// Builds an inclusion proof for the leaf at `index`, rebuilding the
    /// tree first if dirty. Returns `None` if `index` is out of range.
    pub fn generate_proof(&mut self, index: usize) -> Option<MerkleProof> {
        self.rebuild_if_dirty();
        if index >= self.leaves.len() {
            return None;
        }
        let root_hash = self.levels.last()?[0];
        let leaf_hash = self.leaves[index];

        let mut siblings = Vec::new();
        let mut i = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_index = i ^ 1;
            let sibling = if sibling_index < level.len() {
                level[sibling_index]
            } else {
                // Odd count at this level: the duplicated final element
                // is the node's own value.
                level[i]
            };
            let is_left = i % 2 == 1;
            siblings.push(ProofStep { sibling, is_left });
            i /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            leaf_hash,
            siblings,
            root_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0] = n;
        out
    }

    #[test]
    fn empty_tree_has_no_root() {
        let mut tree = MerkleTree::new();
        assert_eq!(tree.root_hash(), None);
    }

    #[test]
    fn proof_verifies_for_every_leaf_even_count() {
        let mut tree = MerkleTree::new();
        for n in 1..=4u8 {
            tree.add_leaf_hash(leaf(n));
        }
        let root = tree.root_hash().unwrap();
        for i in 0..4 {
            let proof = tree.generate_proof(i).unwrap();
            assert_eq!(proof.root_hash(), root);
            assert!(proof.verify());
        }
    }

    #[test]
    fn proof_verifies_with_odd_leaf_count() {
        let mut tree = MerkleTree::new();
        for n in 1..=5u8 {
            tree.add_leaf_hash(leaf(n));
        }
        let root = tree.root_hash().unwrap();
        for i in 0..5 {
            let proof = tree.generate_proof(i).unwrap();
            assert_eq!(proof.root_hash(), root);
            assert!(proof.verify());
        }
    }

    #[test]
    fn single_leaf_tree_self_roots() {
        let mut tree = MerkleTree::new();
        tree.add_leaf_hash(leaf(7));
        let root = tree.root_hash().unwrap();
        assert_eq!(root, leaf(7));
        let proof = tree.generate_proof(0).unwrap();
        assert!(proof.siblings().is_empty());
        assert!(proof.verify());
    }

    #[test]
    fn mutated_leaf_hash_fails_verification() {
        let mut tree = MerkleTree::new();
        for n in 1..=4u8 {
            tree.add_leaf_hash(leaf(n));
        }
        let mut proof = tree.generate_proof(2).unwrap();
        proof.leaf_hash = hash_leaf(b"unrelated");
        assert!(!proof.verify());
    }

    #[test]
    fn proof_does_not_verify_against_a_different_tree() {
        let mut tree_a = MerkleTree::new();
        let mut tree_b = MerkleTree::new();
        for n in 1..=4u8 {
            tree_a.add_leaf_hash(leaf(n));
        }
        for n in 1..=4u8 {
            tree_b.add_leaf_hash(leaf(if n == 3 { 99 } else { n }));
        }
        let proof = tree_a.generate_proof(0).unwrap();
        let root_b = tree_b.root_hash().unwrap();
        assert_ne!(proof.root_hash(), root_b);
    }

    #[test]
    fn generate_proof_out_of_range_is_none() {
        let mut tree = MerkleTree::new();
        tree.add_leaf_hash(leaf(1));
        assert!(tree.generate_proof(5).is_none());
    }

    #[test]
    fn mutating_returned_siblings_does_not_corrupt_the_proof() {
        let mut tree = MerkleTree::new();
        for n in 1..=4u8 {
            tree.add_leaf_hash(leaf(n));
        }
        let proof = tree.generate_proof(1).unwrap();
        let mut copy = proof.siblings();
        if let Some(first) = copy.first_mut() {
            first.sibling[0] ^= 0xFF;
        }
        assert!(proof.verify());
    }
}
