#![warn(missing_docs)]
//! Round engine of tree-structured CoSi collective signing.
//!
//! Every [Node] holds one position in a tree of hosts and takes part in rounds started by the
//! root of the current view: the announcement goes down the tree, commitments are aggregated
//! up, the challenge goes down, responses are aggregated up and the final signature is
//! broadcast down before each subtree acknowledges it. Silent children are recorded as
//! exceptions instead of blocking the round.
//!
//! The tree is rebuilt deterministically from the host list in each view. The root rotates
//! every few rounds through a vote signed by the round itself, or earlier when a node stops
//! hearing from its parent.

mod callbacks;
mod configuration;
mod error;
mod failure;
mod heartbeat;
pub mod logging;
pub mod messages;
mod node;
pub mod round;
pub mod topology;
pub mod transport;
pub mod vote;

pub use callbacks::{NoCallbacks, RoundCallbacks, RoundCompletion, SignedValue};
pub use configuration::{FailureConfiguration, NodeConfiguration};
pub use error::{NodeError, RoundCheckpoint, RoundError};
pub use failure::{FailureInjector, FailurePolicy, NoFailure, Role};
pub use node::{AnnouncementRequest, Node, NodeBuilder, RoundSummary, ViewChangeNotification};

/// Identity of a host
pub type PeerId = cosi_crypto::ParticipantId;

/// Number of a view, the initial view is 0
pub type ViewNumber = u64;

/// Number of a round, the first round is 1
pub type RoundNumber = u64;

/// Generic error type
pub type StdError = anyhow::Error;

/// Generic result type
pub type StdResult<T> = anyhow::Result<T, StdError>;
