//! Earner-set Merkle registry.

pub(crate) mod tree;

pub use tree::{
    hash_leaf, ExclusionProof, Hash, MerkleProof, MerkleTree, ProofElement, ProofError,
    EMPTY_ROOT,
};
