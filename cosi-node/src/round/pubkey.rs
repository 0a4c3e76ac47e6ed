use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use cosi_crypto::{CollectiveSignature, CollectiveSigning, HashId, MerkleProof, Suite};
use rand_core::CryptoRngCore;

use crate::{
    PeerId, StdResult,
    callbacks::SignedValue,
    messages::{
        AnnouncementMessage, ChallengeMessage, CommitmentMessage, ResponseMessage,
        SignatureBroadcastMessage, signed_message,
    },
};

use super::{ChildReport, RoundHandler, RoundSetup};

/// Tag of [PubKeyRound]
pub const PUBKEY_ROUND: &str = "pubkey";

/// Collective signing of the announced message, without merkle tree.
///
/// Also the building block of the other variants, which delegate the Schnorr accumulation
/// to it.
pub struct PubKeyRound<S: Suite> {
    signing: CollectiveSigning<S>,
    message: Vec<u8>,
    committed: Vec<PeerId>,
}

impl<S: Suite> PubKeyRound<S> {
    /// Commit to a fresh secret for the round.
    pub fn new(setup: RoundSetup<S>, rng: &mut dyn CryptoRngCore) -> Self {
        Self {
            signing: CollectiveSigning::new(setup.suite, setup.key_pair, rng),
            message: vec![],
            committed: vec![],
        }
    }

    /// Accumulator of the round
    pub fn signing(&self) -> &CollectiveSigning<S> {
        &self.signing
    }

    /// Announced message
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Children whose commitment was folded
    pub fn committed_children(&self) -> &[PeerId] {
        &self.committed
    }

    pub(super) fn set_message(&mut self, message: &[u8]) {
        self.message = message.to_vec();
    }

    pub(super) fn fold_commitments(
        &mut self,
        reports: Vec<ChildReport<S, CommitmentMessage<S>>>,
    ) -> StdResult<()> {
        for report in reports {
            match report {
                ChildReport::Reported { child, message } => {
                    self.signing
                        .add_child_commitment(child.clone(), message.share)
                        .with_context(|| format!("Could not fold commitment of '{child}'"))?;
                    self.committed.push(child);
                }
                ChildReport::Missing { subtree, .. } => {
                    self.signing.add_missing_child_commitment(subtree);
                }
            }
        }

        Ok(())
    }

    /// Challenge of the round: derived from `signed` at the root, received otherwise.
    pub(super) fn resolve_challenge(
        &mut self,
        incoming: Option<&ChallengeMessage<S>>,
        signed: &[u8],
    ) -> S::Scalar {
        match incoming {
            Some(challenge) => {
                self.signing.set_challenge(challenge.challenge);
                challenge.challenge
            }
            None => self.signing.compute_challenge(signed),
        }
    }

    pub(super) fn fold_responses(
        &mut self,
        reports: Vec<ChildReport<S, ResponseMessage<S>>>,
    ) -> StdResult<ResponseMessage<S>> {
        for report in reports {
            match report {
                ChildReport::Reported { child, message } => {
                    self.signing
                        .add_child_response(child.clone(), message.share)
                        .with_context(|| format!("Could not fold response of '{child}'"))?;
                }
                ChildReport::Missing { child, subtree } => {
                    self.signing.add_missing_child_response(child, subtree);
                }
            }
        }

        Ok(ResponseMessage {
            share: self.signing.response_share()?,
        })
    }
}

impl<S: Suite> RoundHandler<S> for PubKeyRound<S> {
    fn round_type(&self) -> &'static str {
        PUBKEY_ROUND
    }

    fn announcement(
        &mut self,
        announcement: &AnnouncementMessage,
        _values: Vec<HashId>,
    ) -> StdResult<()> {
        self.set_message(&announcement.message);

        Ok(())
    }

    fn commitment(
        &mut self,
        reports: Vec<ChildReport<S, CommitmentMessage<S>>>,
    ) -> StdResult<CommitmentMessage<S>> {
        self.fold_commitments(reports)?;

        Ok(CommitmentMessage {
            share: self.signing.commitment_share(),
            merkle_root: vec![],
        })
    }

    fn challenge(
        &mut self,
        incoming: Option<ChallengeMessage<S>>,
    ) -> StdResult<BTreeMap<PeerId, ChallengeMessage<S>>> {
        let signed = signed_message(&self.message, &[]);
        let challenge = self.resolve_challenge(incoming.as_ref(), &signed);

        Ok(self
            .committed
            .iter()
            .map(|child| {
                let message = ChallengeMessage {
                    challenge,
                    merkle_root: vec![],
                    proof: MerkleProof::default(),
                };
                (child.clone(), message)
            })
            .collect())
    }

    fn response(
        &mut self,
        reports: Vec<ChildReport<S, ResponseMessage<S>>>,
    ) -> StdResult<ResponseMessage<S>> {
        self.fold_responses(reports)
    }

    fn signature(&self) -> StdResult<(CollectiveSignature<S>, HashId)> {
        if self.signing.challenge().is_none() {
            return Err(anyhow!("Signature requested before the challenge"));
        }

        Ok((self.signing.collective_signature()?, vec![]))
    }

    fn stamps(&self, _broadcast: &SignatureBroadcastMessage<S>) -> Vec<SignedValue<S>> {
        vec![]
    }
}
