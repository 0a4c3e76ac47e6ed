//! Merkle trees batching the values signed in a round.
//!
//! Every node builds a small tree over its own leaves and reports its root to its parent,
//! which uses it as one of its leaves. The proofs of the nested trees are concatenated on
//! the way back down, so that each value ends with a path up to the single global root.

mod aggregator;
mod proof;
mod tree;

pub use aggregator::{MerkleAggregate, MerkleAggregator};
pub use proof::{HashId, MerkleProof, check_proof, empty_root, hash_pair};
pub use tree::ProofTree;
