use anyhow::anyhow;
use digest::Digest;
use serde::{Deserialize, Serialize};

use crate::{MerkleTreeError, StdResult};

/// Hash value of a merkle tree node or leaf.
pub type HashId = Vec<u8>;

/// Root of a tree built over no leaf: all zero bytes, of the hash output size.
pub fn empty_root<D: Digest>() -> HashId {
    vec![0u8; <D as Digest>::output_size()]
}

/// Hash of an internal node.
///
/// Siblings are hashed in byte order so that a proof does not need to record on which
/// side each sibling sits, which in turn allows proofs of nested trees to be concatenated.
pub fn hash_pair<D: Digest>(left: &[u8], right: &[u8]) -> HashId {
    let (low, high) = if left <= right {
        (left, right)
    } else {
        (right, left)
    };

    D::new()
        .chain_update(low)
        .chain_update(high)
        .finalize()
        .to_vec()
}

/// Sibling hashes from a leaf up to a root, lowest level first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof(Vec<HashId>);

impl MerkleProof {
    /// Create a proof from its sibling hashes, lowest level first.
    pub fn new(siblings: Vec<HashId>) -> Self {
        Self(siblings)
    }

    /// Sibling hashes of the proof
    pub fn siblings(&self) -> &[HashId] {
        &self.0
    }

    /// Number of levels covered by the proof
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// An empty proof proves that a leaf is the root itself
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extend this proof with the proof of its root inside an enclosing tree.
    pub fn concat(&self, upper: &MerkleProof) -> MerkleProof {
        let mut siblings = Vec::with_capacity(self.len() + upper.len());
        siblings.extend_from_slice(&self.0);
        siblings.extend_from_slice(&upper.0);

        MerkleProof(siblings)
    }

    /// Recompute the root reached from `leaf` following this proof.
    pub fn compute_root<D: Digest>(&self, leaf: &[u8]) -> HashId {
        self.0
            .iter()
            .fold(leaf.to_vec(), |current, sibling| hash_pair::<D>(&current, sibling))
    }

    /// Check that `leaf` is included under `root`.
    pub fn verify<D: Digest>(&self, root: &[u8], leaf: &[u8]) -> StdResult<()> {
        if check_proof::<D>(root, leaf, self) {
            return Ok(());
        }

        Err(anyhow!(MerkleTreeError::PathInvalid {
            leaf: hex::encode(leaf),
            root: hex::encode(root),
        }))
    }
}

/// Recompute the ancestors of `leaf` from `proof` and compare the result with `root`.
pub fn check_proof<D: Digest>(root: &[u8], leaf: &[u8], proof: &MerkleProof) -> bool {
    proof.compute_root::<D>(leaf) == root
}
