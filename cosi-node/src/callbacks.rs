//! Hooks through which an application feeds client values into the rounds and gets the
//! signed values back.

use std::collections::BTreeMap;

use cosi_crypto::{CollectiveSignature, HashId, MerkleProof, Suite};
use serde::{Deserialize, Serialize};

use crate::{
    PeerId, RoundNumber, StdResult, ViewNumber,
    messages::{AnnouncementMessage, signed_message},
};

/// Client value with the proof that the collective signature of a round covers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SignedValue<S: Suite> {
    /// Hash of the client value, a leaf of the round merkle tree
    pub value: HashId,
    /// Inclusion proof of the value up to the round merkle root
    pub proof: MerkleProof,
    /// Round merkle root
    pub merkle_root: HashId,
    /// Collective signature of the round
    pub signature: CollectiveSignature<S>,
    /// Announced message of the round
    pub message: Vec<u8>,
}

impl<S: Suite> SignedValue<S> {
    /// Check the inclusion proof and the collective signature on behalf of `roster`, the
    /// public keys of the hosts of the round.
    pub fn verify(&self, suite: &S, roster: &BTreeMap<PeerId, S::Point>) -> StdResult<()> {
        self.proof.verify::<S::Hash>(&self.merkle_root, &self.value)?;

        self.signature.verify_with_keys(
            suite,
            &signed_message(&self.message, &self.merkle_root),
            roster,
        )
    }
}

/// What a node learns at the end of a round it took part in.
#[derive(Debug, Clone)]
pub struct RoundCompletion<S: Suite> {
    /// View of the round
    pub view: ViewNumber,
    /// Round number
    pub round: RoundNumber,
    /// Round merkle root
    pub merkle_root: HashId,
    /// Collective signature of the round
    pub signature: CollectiveSignature<S>,
    /// Client values submitted to this node, with their proofs
    pub stamps: Vec<SignedValue<S>>,
}

/// Application hooks called by the node.
pub trait RoundCallbacks<S: Suite>: Send + Sync {
    /// Called on every node when a round is announced, returns the hashes of the client values
    /// to sign in this round.
    fn announcement(
        &self,
        _view: ViewNumber,
        _round: RoundNumber,
        _announcement: &AnnouncementMessage,
    ) -> Vec<HashId> {
        vec![]
    }

    /// Called once the collective signature of a round held by this node has been verified.
    fn round_completed(&self, _completion: RoundCompletion<S>) {}
}

/// Callbacks of a node that serves no client.
pub struct NoCallbacks;

impl<S: Suite> RoundCallbacks<S> for NoCallbacks {}
