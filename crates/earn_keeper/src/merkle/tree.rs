//! Sorted-leaf Merkle tree over account keys, with inclusion and exclusion proofs.

use crate::tx::Pubkey;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use thiserror::Error;

pub type Hash = [u8; 32];

/// Root of the empty set.
pub const EMPTY_ROOT: Hash = [0u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("address {0} is not in the set")]
    Absent(Pubkey),
    #[error("address {0} is already in the set")]
    Present(Pubkey),
    #[error("proof for {0} does not verify against the root")]
    Invalid(Pubkey),
}

pub fn hash_leaf(key: &Pubkey) -> Hash {
    let mut h = Keccak256::new();
    h.update([LEAF_PREFIX]);
    h.update(key.as_ref());
    h.finalize().into()
}

fn hash_node(left: &Hash, right: &Hash) -> Hash {
    let mut h = Keccak256::new();
    h.update([NODE_PREFIX]);
    h.update(left);
    h.update(right);
    h.finalize().into()
}

/// One step of a proof path: the sibling hash and whether it sits to the right.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ProofElement {
    #[serde(with = "hex_hash")]
    pub node: Hash,
    pub on_right: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    #[serde(with = "crate::tx::serde_pubkey")]
    pub leaf: Pubkey,
    pub path: Vec<ProofElement>,
    #[serde(with = "hex_hash")]
    pub root: Hash,
}

impl MerkleProof {
    /// Leaf position implied by the path. A sibling on the left means this node is a right child.
    pub fn index(&self) -> usize {
        self.path
            .iter()
            .enumerate()
            .fold(0usize, |acc, (level, step)| {
                if step.on_right {
                    acc
                } else {
                    acc | (1 << level)
                }
            })
    }

    pub fn computed_root(&self) -> Hash {
        self.path.iter().fold(hash_leaf(&self.leaf), |acc, step| {
            if step.on_right {
                hash_node(&acc, &step.node)
            } else {
                hash_node(&step.node, &acc)
            }
        })
    }

    pub fn verify(&self) -> bool {
        self.computed_root() == self.root
    }

    /// True when no leaf sorts before this one: every sibling sits to the right.
    pub fn is_leftmost(&self) -> bool {
        self.path.iter().all(|step| step.on_right)
    }

    /// True when no leaf sorts after this one. Every right sibling on the path must be
    /// the node itself, which is how an odd tail is paired.
    pub fn is_rightmost(&self) -> bool {
        let mut acc = hash_leaf(&self.leaf);
        for step in &self.path {
            if step.on_right {
                if step.node != acc {
                    return false;
                }
                acc = hash_node(&acc, &step.node);
            } else {
                acc = hash_node(&step.node, &acc);
            }
        }
        true
    }
}

/// Proof that `target` is absent: its sorted neighbors, each proven present, are adjacent.
/// `lower` is `None` when the target sorts before every leaf, `upper` when after every leaf.
/// Boundaries are checked against the proof paths; `leaf_count` only vouches for the empty set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionProof {
    #[serde(with = "crate::tx::serde_pubkey")]
    pub target: Pubkey,
    pub lower: Option<MerkleProof>,
    pub upper: Option<MerkleProof>,
    pub leaf_count: usize,
    #[serde(with = "hex_hash")]
    pub root: Hash,
}

impl ExclusionProof {
    pub fn neighbors(&self) -> (Option<Pubkey>, Option<Pubkey>) {
        (
            self.lower.as_ref().map(|p| p.leaf),
            self.upper.as_ref().map(|p| p.leaf),
        )
    }

    pub fn verify(&self) -> bool {
        let proves = |p: &MerkleProof| p.root == self.root && p.verify();
        match (&self.lower, &self.upper) {
            (None, None) => self.leaf_count == 0 && self.root == EMPTY_ROOT,
            (Some(lo), None) => proves(lo) && lo.leaf < self.target && lo.is_rightmost(),
            (None, Some(hi)) => proves(hi) && self.target < hi.leaf && hi.is_leftmost(),
            (Some(lo), Some(hi)) => {
                proves(lo)
                    && proves(hi)
                    && lo.path.len() == hi.path.len()
                    && lo.leaf < self.target
                    && self.target < hi.leaf
                    && lo.index() + 1 == hi.index()
            }
        }
    }
}

/// Binary hash tree over the canonically sorted, deduplicated key set.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    leaves: Vec<Pubkey>,
    /// `levels[0]` are leaf hashes; last level holds the root.
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn build(addresses: impl IntoIterator<Item = Pubkey>) -> Self {
        let mut leaves: Vec<Pubkey> = addresses.into_iter().collect();
        leaves.sort();
        leaves.dedup();

        let mut levels = vec![leaves.iter().map(hash_leaf).collect::<Vec<_>>()];
        while levels.last().map_or(0, Vec::len) > 1 {
            let prev = levels.last().map(Vec::as_slice).unwrap_or_default();
            // Odd tail pairs with itself.
            let next: Vec<Hash> = prev
                .chunks(2)
                .map(|pair| hash_node(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            levels.push(next);
        }
        Self { leaves, levels }
    }

    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or(EMPTY_ROOT)
    }

    pub fn leaves(&self) -> &[Pubkey] {
        &self.leaves
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn contains(&self, key: &Pubkey) -> bool {
        self.leaves.binary_search(key).is_ok()
    }

    pub fn inclusion_proof(&self, key: &Pubkey) -> Result<MerkleProof, ProofError> {
        let index = self
            .leaves
            .binary_search(key)
            .map_err(|_| ProofError::Absent(*key))?;
        Ok(self.proof_at(index))
    }

    pub fn exclusion_proof(&self, key: &Pubkey) -> Result<ExclusionProof, ProofError> {
        let insert_at = match self.leaves.binary_search(key) {
            Ok(_) => return Err(ProofError::Present(*key)),
            Err(pos) => pos,
        };
        let lower = insert_at.checked_sub(1).map(|i| self.proof_at(i));
        let upper = (insert_at < self.leaves.len()).then(|| self.proof_at(insert_at));
        Ok(ExclusionProof {
            target: *key,
            lower,
            upper,
            leaf_count: self.leaves.len(),
            root: self.root(),
        })
    }

    fn proof_at(&self, index: usize) -> MerkleProof {
        let mut path = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut idx = index;
        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            let is_left = idx % 2 == 0;
            let sibling_idx = if is_left { idx + 1 } else { idx - 1 };
            let node = level.get(sibling_idx).copied().unwrap_or(level[idx]);
            path.push(ProofElement {
                node,
                on_right: is_left,
            });
            idx /= 2;
        }
        MerkleProof {
            leaf: self.leaves[index],
            path,
            root: self.root(),
        }
    }
}

pub(crate) mod hex_hash {
    use super::Hash;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(h: &Hash, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(h))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Hash, D::Error> {
        let s = String::deserialize(d)?;
        let raw = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte hash"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> Pubkey {
        let mut b = [0u8; 32];
        b[0] = n;
        b[31] = n;
        Pubkey::new_from_array(b)
    }

    #[test]
    fn root_is_order_independent() {
        let a = MerkleTree::build([key(3), key(1), key(2)]);
        let b = MerkleTree::build([key(2), key(3), key(1), key(1)]);
        assert_eq!(a.root(), b.root());
        assert_eq!(a.leaves(), &[key(1), key(2), key(3)]);
    }

    #[test]
    fn empty_and_single() {
        let empty = MerkleTree::build([]);
        assert_eq!(empty.root(), EMPTY_ROOT);
        let one = MerkleTree::build([key(9)]);
        assert_eq!(one.root(), hash_leaf(&key(9)));
        let proof = one.inclusion_proof(&key(9)).unwrap();
        assert!(proof.path.is_empty());
        assert!(proof.verify());
    }

    #[test]
    fn every_leaf_proves_inclusion() {
        for n in 1..=9u8 {
            let tree = MerkleTree::build((1..=n).map(|i| key(i * 2)));
            for (i, leaf) in tree.leaves().iter().enumerate() {
                let proof = tree.inclusion_proof(leaf).unwrap();
                assert!(proof.verify(), "n={n} leaf={i}");
                assert_eq!(proof.index(), i);
                assert_eq!(proof.root, tree.root());
            }
        }
    }

    #[test]
    fn inclusion_of_absent_fails() {
        let tree = MerkleTree::build([key(1), key(3)]);
        assert_eq!(
            tree.inclusion_proof(&key(2)),
            Err(ProofError::Absent(key(2)))
        );
    }

    #[test]
    fn exclusion_of_present_fails() {
        let tree = MerkleTree::build([key(1), key(3)]);
        assert_eq!(
            tree.exclusion_proof(&key(3)),
            Err(ProofError::Present(key(3)))
        );
    }

    #[test]
    fn exclusion_neighbors_are_adjacent() {
        let tree = MerkleTree::build((1..=7u8).map(|i| key(i * 10)));
        for target in 0..=80u8 {
            let t = key(target);
            if tree.contains(&t) {
                continue;
            }
            let proof = tree.exclusion_proof(&t).unwrap();
            assert!(proof.verify(), "target {target}");
            let (lo, hi) = proof.neighbors();
            if let Some(lo) = lo {
                assert!(lo < t);
            }
            if let Some(hi) = hi {
                assert!(t < hi);
            }
            if let (Some(lo), Some(hi)) = (&proof.lower, &proof.upper) {
                assert_eq!(lo.root, hi.root);
                assert_eq!(lo.index() + 1, hi.index());
            }
        }
    }

    #[test]
    fn exclusion_at_boundaries() {
        let tree = MerkleTree::build([key(10), key(20), key(30)]);
        let below = tree.exclusion_proof(&key(5)).unwrap();
        assert!(below.lower.is_none());
        assert_eq!(below.neighbors().1, Some(key(10)));
        assert!(below.verify());

        let above = tree.exclusion_proof(&key(40)).unwrap();
        assert!(above.upper.is_none());
        assert_eq!(above.neighbors().0, Some(key(30)));
        assert!(above.verify());

        let empty = MerkleTree::build([]).exclusion_proof(&key(1)).unwrap();
        assert!(empty.verify());
    }

    #[test]
    fn non_adjacent_neighbors_rejected() {
        let tree = MerkleTree::build([key(10), key(20), key(30)]);
        let mut proof = tree.exclusion_proof(&key(15)).unwrap();
        proof.upper = Some(tree.inclusion_proof(&key(30)).unwrap());
        assert!(!proof.verify());
    }

    #[test]
    fn interior_neighbor_cannot_pose_as_boundary() {
        let tree = MerkleTree::build([key(10), key(20), key(30)]);
        let forged_upper = ExclusionProof {
            target: key(20),
            lower: Some(tree.inclusion_proof(&key(10)).unwrap()),
            upper: None,
            leaf_count: 1,
            root: tree.root(),
        };
        assert!(!forged_upper.verify());

        let forged_lower = ExclusionProof {
            target: key(25),
            lower: None,
            upper: Some(tree.inclusion_proof(&key(30)).unwrap()),
            leaf_count: 3,
            root: tree.root(),
        };
        assert!(!forged_lower.verify());
    }

    #[test]
    fn boundary_checks_follow_tree_shape() {
        for n in 1..=9u8 {
            let tree = MerkleTree::build((1..=n).map(key));
            let last = tree.len() - 1;
            for (i, leaf) in tree.leaves().iter().enumerate() {
                let proof = tree.inclusion_proof(leaf).unwrap();
                assert_eq!(proof.is_leftmost(), i == 0, "n={n} leaf={i}");
                assert_eq!(proof.is_rightmost(), i == last, "n={n} leaf={i}");
            }
        }
    }

    #[test]
    fn tampered_path_rejected() {
        let tree = MerkleTree::build([key(1), key(2), key(3), key(4)]);
        let mut proof = tree.inclusion_proof(&key(2)).unwrap();
        proof.path[0].node[0] ^= 0xff;
        assert!(!proof.verify());
    }
}
