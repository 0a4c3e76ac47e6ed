//! Cryptographic primitives of tree-structured collective signing (CoSi).
//!
//! A set of participants arranged in a tree produce a single Schnorr signature per round.
//! Each participant commits to a secret, the commitments are aggregated up the tree, the
//! root derives a challenge and the responses are aggregated back up. Participants that
//! fail to answer are recorded as exceptions and their contribution withdrawn.
//!
//! The values signed in a round are batched in nested merkle trees, one per participant,
//! so that each value can later be proven to be covered by the round signature.
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::collections::BTreeMap;
//!
//! use cosi_crypto::{CollectiveSigning, ExceptionEntry, KeyPair, Ristretto255};
//! use rand_chacha::ChaCha20Rng;
//! use rand_core::SeedableRng;
//!
//! let suite = Ristretto255;
//! let mut rng = ChaCha20Rng::from_seed([0u8; 32]);
//!
//! // A root with two leaves.
//! let root_keys = KeyPair::generate(&suite, &mut rng);
//! let leaf_keys = KeyPair::generate(&suite, &mut rng);
//! let silent = KeyPair::generate(&suite, &mut rng);
//! let roster = BTreeMap::from([
//!     ("root".to_string(), *root_keys.public_key()),
//!     ("leaf".to_string(), *leaf_keys.public_key()),
//!     ("silent".to_string(), *silent.public_key()),
//! ]);
//! let mut root = CollectiveSigning::new(suite, root_keys, &mut rng);
//! let mut leaf = CollectiveSigning::new(suite, leaf_keys, &mut rng);
//!
//! // Commitment: the second leaf never answers.
//! root.add_child_commitment("leaf".to_string(), leaf.commitment_share())?;
//! root.add_missing_child_commitment(vec![ExceptionEntry::new(
//!     "silent".to_string(),
//!     *silent.public_key(),
//! )]);
//!
//! // Challenge and response.
//! let challenge = root.compute_challenge(b"Hello World");
//! leaf.set_challenge(challenge);
//! root.add_child_response("leaf".to_string(), leaf.response_share()?)?;
//!
//! let signature = root.collective_signature()?;
//! signature.verify_with_keys(&suite, b"Hello World", &roster)?;
//! assert!(signature.is_excepted(silent.public_key()));
//! # Ok(())
//! # }
//! ```

mod collective_signature;
mod error;
mod merkle_tree;
mod suite;

pub use collective_signature::{
    CollectiveSignature, CollectiveSigning, CommitmentShare, ExceptionEntry, ResponseShare,
    challenge_for,
};
pub use error::{CollectiveSignatureError, MerkleTreeError};
pub use merkle_tree::{
    HashId, MerkleAggregate, MerkleAggregator, MerkleProof, ProofTree, check_proof, empty_root,
    hash_pair,
};
pub use suite::{KeyPair, Ristretto255, Suite};

/// Identity of a participant in the tree
pub type ParticipantId = String;

/// Generic error type
pub type StdError = anyhow::Error;

/// Generic result type
pub type StdResult<T> = anyhow::Result<T, StdError>;
