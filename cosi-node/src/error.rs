use thiserror::Error;

use crate::{
    PeerId, RoundNumber, StdError, ViewNumber,
    messages::MessageType,
    round::RoundPhase,
    topology::Relation,
};

/// Errors raised by the protocol engine of a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A peer sent a message it is not entitled to send in the view
    #[error(
        "Protocol violation: '{peer}' sent a {message_type} but is not the {expected} of this node in view {view}"
    )]
    ProtocolViolation {
        /// Sender of the message
        peer: PeerId,
        /// Type of the message
        message_type: MessageType,
        /// Relation the sender should hold
        expected: Relation,
        /// View of the message
        view: ViewNumber,
    },

    /// A view change is already in progress
    #[error("Already changing view")]
    AlreadyChangingView,

    /// The requested view is not newer than the current one
    #[error("Cannot change to view {requested}, the current view is {current}")]
    StaleViewChange {
        /// Requested view
        requested: ViewNumber,
        /// Current view
        current: ViewNumber,
    },

    /// Only the root of the current view can start a round
    #[error("Node '{node}' is not the root of view {view}")]
    NotRoot {
        /// This node
        node: PeerId,
        /// Current view
        view: ViewNumber,
    },

    /// No round type registered under this tag
    #[error("Unknown round type '{0}'")]
    UnknownRoundType(String),

    /// The vote kind is not supported
    #[error("Vote '{0}' is not supported, only view changes and shutdown are")]
    UnsupportedVote(String),

    /// No public key provisioned for a peer
    #[error("No public key known for peer '{0}'")]
    UnknownPeerKey(PeerId),

    /// The node does not belong to the host list of a view
    #[error("Node '{node}' is not part of the host list of view {view}")]
    NotInHostList {
        /// This node
        node: PeerId,
        /// Derived view
        view: ViewNumber,
    },

    /// A round state transition is not allowed
    #[error("Round {round} cannot go from {from} to {to}")]
    InvalidPhaseTransition {
        /// Round number
        round: RoundNumber,
        /// Current phase
        from: RoundPhase,
        /// Requested phase
        to: RoundPhase,
    },

    /// Propagation of a phase was aborted because its round was cancelled
    #[error("Round {0} was cancelled")]
    Cancelled(RoundNumber),

    /// The node is closed
    #[error("Node is closed")]
    Closed,
}

impl NodeError {
    /// Fatal errors stop the node, others are logged and the node keeps running.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NodeError::ProtocolViolation { .. })
    }
}

/// Checkpoints of a round started by the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RoundCheckpoint {
    /// Aggregation of the commitments
    #[strum(to_string = "during commitment")]
    Commitment,
    /// Full round, up to the status of every node
    #[strum(to_string = "before completion")]
    Completion,
}

/// Outcome of a failed [crate::Node::start_announcement].
#[derive(Debug, Error)]
pub enum RoundError {
    /// The round could not be started
    #[error("Round could not be started")]
    Rejected(#[source] StdError),

    /// The node was closed while the round was running
    #[error("Node closed while round {0} was running")]
    Closed(RoundNumber),

    /// The round deadline expired
    #[error("Round {round} timed out {checkpoint}")]
    Timeout {
        /// Round number
        round: RoundNumber,
        /// Last checkpoint not reached
        checkpoint: RoundCheckpoint,
    },

    /// The round was dropped by this node, e.g. because its view was forgotten
    #[error("Round {0} was cancelled")]
    Cancelled(RoundNumber),

    /// A phase handler failed
    #[error("Round {round} failed")]
    Failed {
        /// Round number
        round: RoundNumber,
        /// Phase handler error
        #[source]
        error: StdError,
    },
}

impl RoundError {
    /// True if the round ended because its deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RoundError::Timeout { .. })
    }
}

/// Extract a [NodeError] from a generic error, if any.
pub(crate) fn as_node_error(error: &StdError) -> Option<&NodeError> {
    error.downcast_ref::<NodeError>()
}
