//! Messages exchanged between the nodes of the tree.

use cosi_crypto::{
    CollectiveSignature, CommitmentShare, HashId, MerkleProof, ResponseShare, Suite,
};
use serde::{Deserialize, Serialize};

use crate::{RoundNumber, ViewNumber, vote::Vote};

/// Type of a protocol message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display,
)]
pub enum MessageType {
    /// Start of a round, from the parent
    Announcement,
    /// Aggregated commitment, from a child
    Commitment,
    /// Challenge and merkle proof, from the parent
    Challenge,
    /// Aggregated response, from a child
    Response,
    /// Final signature, from the parent
    SignatureBroadcast,
    /// Acknowledgment of the broadcast, from a child
    StatusReturn,
    /// Request for a missing vote
    CatchUpRequest,
    /// Missing vote
    CatchUpResponse,
    /// Close the whole tree, from the parent
    CloseAll,
    /// Error reported by a peer
    Error,
}

/// Envelope of every message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SigningMessage<S: Suite> {
    /// View of the round
    pub view_nbr: ViewNumber,
    /// Round number
    pub round_nbr: RoundNumber,
    /// Index of the last vote in the log of the sender
    pub last_seen_vote: u64,
    /// Phase specific content
    pub payload: MessagePayload<S>,
}

impl<S: Suite> SigningMessage<S> {
    /// Type of the payload
    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }
}

/// Phase specific content of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum MessagePayload<S: Suite> {
    /// See [AnnouncementMessage]
    Announcement(AnnouncementMessage),
    /// See [CommitmentMessage]
    Commitment(CommitmentMessage<S>),
    /// See [ChallengeMessage]
    Challenge(ChallengeMessage<S>),
    /// See [ResponseMessage]
    Response(ResponseMessage<S>),
    /// See [SignatureBroadcastMessage]
    SignatureBroadcast(SignatureBroadcastMessage<S>),
    /// See [StatusReturnMessage]
    StatusReturn(StatusReturnMessage),
    /// Ask for the vote at `index`
    CatchUpRequest {
        /// Requested index
        index: u64,
    },
    /// Vote asked by a catch up request, `None` if unknown to the sender
    CatchUpResponse {
        /// Requested vote
        vote: Option<Vote>,
    },
    /// Close the tree
    CloseAll,
    /// Error raised by the sender while handling a message of this round
    Error(ErrorMessage),
}

impl<S: Suite> MessagePayload<S> {
    /// Type of the payload
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Announcement(_) => MessageType::Announcement,
            Self::Commitment(_) => MessageType::Commitment,
            Self::Challenge(_) => MessageType::Challenge,
            Self::Response(_) => MessageType::Response,
            Self::SignatureBroadcast(_) => MessageType::SignatureBroadcast,
            Self::StatusReturn(_) => MessageType::StatusReturn,
            Self::CatchUpRequest { .. } => MessageType::CatchUpRequest,
            Self::CatchUpResponse { .. } => MessageType::CatchUpResponse,
            Self::CloseAll => MessageType::CloseAll,
            Self::Error(_) => MessageType::Error,
        }
    }
}

/// Start of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementMessage {
    /// Tag of the round type in the registry
    pub round_type: String,
    /// Message to sign, including the digest of the vote if any
    pub message: Vec<u8>,
    /// Unix timestamp set by the root
    pub timestamp: i64,
    /// Proposal decided by this round
    pub vote: Option<Vote>,
}

/// Commitment of a subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct CommitmentMessage<S: Suite> {
    /// Schnorr aggregates of the subtree
    pub share: CommitmentShare<S>,
    /// Merkle root of the subtree, empty for rounds without merkle tree
    pub merkle_root: HashId,
}

/// Challenge of the round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ChallengeMessage<S: Suite> {
    /// Challenge `c`
    pub challenge: S::Scalar,
    /// Global merkle root
    pub merkle_root: HashId,
    /// Proof from the subtree root of the recipient up to the global root
    pub proof: MerkleProof,
}

/// Response of a subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ResponseMessage<S: Suite> {
    /// Schnorr aggregates of the subtree
    pub share: ResponseShare<S>,
}

/// Final signature of the round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SignatureBroadcastMessage<S: Suite> {
    /// Collective signature
    pub signature: CollectiveSignature<S>,
    /// Global merkle root
    pub merkle_root: HashId,
    /// Announced message
    pub message: Vec<u8>,
    /// Tallied proposal of the round
    pub vote: Option<Vote>,
}

/// Acknowledgment of the broadcast by a subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReturnMessage {
    /// Nodes of the subtree that acknowledged the broadcast
    pub nodes: u64,
    /// Children of the subtree that did not acknowledge it in time
    pub faulty: u64,
}

impl StatusReturnMessage {
    /// Add the status of a child subtree.
    pub fn merge(self, other: StatusReturnMessage) -> Self {
        Self {
            nodes: self.nodes + other.nodes,
            faulty: self.faulty + other.faulty,
        }
    }
}

/// Error reported by a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Description of the error
    pub message: String,
}

/// Bytes covered by the signature of a round: the announced message followed by the global
/// merkle root.
pub fn signed_message(message: &[u8], merkle_root: &[u8]) -> Vec<u8> {
    [message, merkle_root].concat()
}
