//! Crate specific errors

use crate::ParticipantId;

/// Error types related to merkle trees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleTreeError {
    /// Invalid merkle path
    #[error("Path does not verify leaf '{leaf}' against root '{root}'")]
    PathInvalid {
        /// Hex encoded leaf
        leaf: String,
        /// Hex encoded expected root
        root: String,
    },

    /// A proof was asked for a leaf that was never added to the tree
    #[error("No proof available for leaf index {0}, the tree holds {1} leaves")]
    LeafIndexOutOfBounds(usize, usize),
}

/// Errors raised while accumulating a collective signature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectiveSignatureError {
    /// A response was requested before the round challenge was known
    #[error("Challenge must be set before computing a response")]
    MissingChallenge,

    /// A child reported twice during the same phase
    #[error("Child '{0}' already reported for this phase")]
    DuplicateChild(ParticipantId),

    /// A response was received from a child which did not take part in the commitment
    #[error("Child '{0}' did not commit in this round")]
    UncommittedChild(ParticipantId),

    /// The aggregated response of a subtree does not balance the verification equation
    #[error("Partial response of the subtree does not verify")]
    InvalidPartialResponse,

    /// The challenge is not the hash of the aggregate commitment and the message
    #[error("Challenge does not match the aggregate commitment and message")]
    ChallengeMismatch,

    /// The collective signature does not verify
    #[error("Collective signature does not verify")]
    InvalidSignature,

    /// An exception is not a member of the roster, or is listed twice
    #[error("Exception '{0}' is not a distinct member of the roster")]
    InvalidException(ParticipantId),

    /// The aggregate key is not the roster minus the exceptions
    #[error("Aggregate key does not match the roster without its exceptions")]
    AggregateKeyMismatch,
}
