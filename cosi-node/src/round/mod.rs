//! Round variants and the per-round bookkeeping of a node.
//!
//! A [RoundHandler] holds the cryptographic state of one round and turns the messages of the
//! children and of the parent into the messages of this node. The node drives it phase by
//! phase: it collects the child messages, defaults the silent children, and only then hands
//! a complete set of [ChildReport] to the handler.

mod cosi;
mod phase;
mod pubkey;
mod registry;
mod table;

pub use cosi::{COSI_ROUND, CosiRound};
pub use phase::RoundPhase;
pub use pubkey::{PUBKEY_ROUND, PubKeyRound};
pub use registry::{RoundFactory, RoundRegistry};
pub(crate) use table::{RoundEntry, RoundScope, RoundTable};

use std::collections::BTreeMap;

use cosi_crypto::{CollectiveSignature, ExceptionEntry, HashId, KeyPair, Suite};

use crate::{
    PeerId, RoundNumber, StdResult, ViewNumber,
    callbacks::SignedValue,
    messages::{
        AnnouncementMessage, ChallengeMessage, CommitmentMessage, ResponseMessage,
        SignatureBroadcastMessage,
    },
};

/// What a node knows about a child at the end of a collection phase.
#[derive(Debug, Clone)]
pub enum ChildReport<S: Suite, T> {
    /// The child answered in time
    Reported {
        /// Child identity
        child: PeerId,
        /// Answer of the child
        message: T,
    },
    /// The child did not answer in time
    Missing {
        /// Child identity
        child: PeerId,
        /// The child and all its descendants, with their long term public keys
        subtree: Vec<ExceptionEntry<S>>,
    },
}

impl<S: Suite, T> ChildReport<S, T> {
    /// Identity of the child
    pub fn child(&self) -> &PeerId {
        match self {
            ChildReport::Reported { child, .. } | ChildReport::Missing { child, .. } => child,
        }
    }

    /// True if the child did not answer in time
    pub fn is_missing(&self) -> bool {
        matches!(self, ChildReport::Missing { .. })
    }
}

/// Everything a round variant needs to know about the node at creation.
#[derive(Debug, Clone)]
pub struct RoundSetup<S: Suite> {
    /// Crypto engine
    pub suite: S,
    /// Long term key pair of the node
    pub key_pair: KeyPair<S>,
    /// View of the round
    pub view: ViewNumber,
    /// Round number
    pub round: RoundNumber,
}

/// Capabilities of a round variant, one method per phase.
pub trait RoundHandler<S: Suite>: Send {
    /// Tag of the variant in the registry
    fn round_type(&self) -> &'static str;

    /// Record the announcement and the client values submitted to this node.
    fn announcement(
        &mut self,
        announcement: &AnnouncementMessage,
        values: Vec<HashId>,
    ) -> StdResult<()>;

    /// Aggregate the commitments of the children into the commitment of the subtree.
    fn commitment(
        &mut self,
        reports: Vec<ChildReport<S, CommitmentMessage<S>>>,
    ) -> StdResult<CommitmentMessage<S>>;

    /// Derive the challenge when `incoming` is `None` (root), or take it from the parent.
    /// Returns the challenge to forward to each committed child.
    fn challenge(
        &mut self,
        incoming: Option<ChallengeMessage<S>>,
    ) -> StdResult<BTreeMap<PeerId, ChallengeMessage<S>>>;

    /// Aggregate the responses of the children into the response of the subtree.
    fn response(
        &mut self,
        reports: Vec<ChildReport<S, ResponseMessage<S>>>,
    ) -> StdResult<ResponseMessage<S>>;

    /// Final signature and merkle root of the round, root only.
    fn signature(&self) -> StdResult<(CollectiveSignature<S>, HashId)>;

    /// Client values of this node signed by `broadcast`, with their proofs.
    fn stamps(&self, broadcast: &SignatureBroadcastMessage<S>) -> Vec<SignedValue<S>>;
}
