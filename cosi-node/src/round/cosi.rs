use std::collections::BTreeMap;

use anyhow::anyhow;
use blake2::Digest;
use cosi_crypto::{
    CollectiveSignature, HashId, MerkleAggregate, MerkleAggregator, MerkleProof, Suite,
};
use rand_core::CryptoRngCore;

use crate::{
    PeerId, RoundNumber, StdResult, ViewNumber,
    callbacks::SignedValue,
    messages::{
        AnnouncementMessage, ChallengeMessage, CommitmentMessage, ResponseMessage,
        SignatureBroadcastMessage, signed_message,
    },
};

use super::{ChildReport, PubKeyRound, RoundHandler, RoundSetup};

/// Tag of [CosiRound]
pub const COSI_ROUND: &str = "cosi";

/// Collective signing of a batch of client values.
///
/// Each node builds a merkle tree over the sub-roots of its children, its own client values
/// and a hash of its round log. The global root is appended to the announced message before
/// the challenge is derived, so the signature covers every value of the tree.
pub struct CosiRound<S: Suite> {
    base: PubKeyRound<S>,
    suite: S,
    view: ViewNumber,
    round: RoundNumber,
    aggregator: MerkleAggregator<S::Hash>,
    aggregate: Option<MerkleAggregate>,
    upper_proof: MerkleProof,
    merkle_root: HashId,
}

impl<S: Suite> CosiRound<S> {
    /// Commit to a fresh secret for the round.
    pub fn new(setup: RoundSetup<S>, rng: &mut dyn CryptoRngCore) -> Self {
        let suite = setup.suite.clone();
        let view = setup.view;
        let round = setup.round;

        Self {
            base: PubKeyRound::new(setup, rng),
            suite,
            view,
            round,
            aggregator: MerkleAggregator::new(),
            aggregate: None,
            upper_proof: MerkleProof::default(),
            merkle_root: vec![],
        }
    }

    /// Global merkle root, once the challenge is known
    pub fn merkle_root(&self) -> &HashId {
        &self.merkle_root
    }

    // Binds the local tree to this round and to the commitment of this node.
    fn log_hash(&self) -> HashId {
        let commitment = self.suite.point_to_bytes(self.base.signing().commitment());

        S::Hash::new()
            .chain_update(self.view.to_be_bytes())
            .chain_update(self.round.to_be_bytes())
            .chain_update(commitment)
            .finalize()
            .to_vec()
    }

    fn aggregate(&self) -> StdResult<&MerkleAggregate> {
        self.aggregate
            .as_ref()
            .ok_or_else(|| anyhow!("Merkle tree of round {} is not built yet", self.round))
    }
}

impl<S: Suite> RoundHandler<S> for CosiRound<S> {
    fn round_type(&self) -> &'static str {
        COSI_ROUND
    }

    fn announcement(
        &mut self,
        announcement: &AnnouncementMessage,
        values: Vec<HashId>,
    ) -> StdResult<()> {
        self.base.set_message(&announcement.message);
        self.aggregator.set_local_values(values);

        Ok(())
    }

    fn commitment(
        &mut self,
        reports: Vec<ChildReport<S, CommitmentMessage<S>>>,
    ) -> StdResult<CommitmentMessage<S>> {
        for report in &reports {
            if let ChildReport::Reported { child, message } = report {
                self.aggregator
                    .add_child_root(child.clone(), message.merkle_root.clone());
            }
        }
        self.base.fold_commitments(reports)?;
        self.aggregator.set_log_hash(self.log_hash());
        let aggregate = self.aggregator.aggregate();
        let merkle_root = aggregate.root().clone();
        self.aggregate = Some(aggregate);

        Ok(CommitmentMessage {
            share: self.base.signing().commitment_share(),
            merkle_root,
        })
    }

    fn challenge(
        &mut self,
        incoming: Option<ChallengeMessage<S>>,
    ) -> StdResult<BTreeMap<PeerId, ChallengeMessage<S>>> {
        let (merkle_root, upper_proof) = match &incoming {
            Some(challenge) => (challenge.merkle_root.clone(), challenge.proof.clone()),
            None => (self.aggregate()?.root().clone(), MerkleProof::default()),
        };
        let signed = signed_message(self.base.message(), &merkle_root);
        let challenge = self.base.resolve_challenge(incoming.as_ref(), &signed);

        let aggregate = self.aggregate()?;
        let mut forwarded = BTreeMap::new();
        for child in self.base.committed_children() {
            let proof = aggregate
                .child_proof(child, &upper_proof)
                .ok_or_else(|| anyhow!("No merkle proof fragment for child '{child}'"))?;
            forwarded.insert(
                child.clone(),
                ChallengeMessage {
                    challenge,
                    merkle_root: merkle_root.clone(),
                    proof,
                },
            );
        }
        self.merkle_root = merkle_root;
        self.upper_proof = upper_proof;

        Ok(forwarded)
    }

    fn response(
        &mut self,
        reports: Vec<ChildReport<S, ResponseMessage<S>>>,
    ) -> StdResult<ResponseMessage<S>> {
        self.base.fold_responses(reports)
    }

    fn signature(&self) -> StdResult<(CollectiveSignature<S>, HashId)> {
        let (signature, _) = self.base.signature()?;

        Ok((signature, self.merkle_root.clone()))
    }

    fn stamps(&self, broadcast: &SignatureBroadcastMessage<S>) -> Vec<SignedValue<S>> {
        let Some(aggregate) = &self.aggregate else {
            return vec![];
        };
        // Without the challenge this node has no proof up to the global root.
        if self.merkle_root != broadcast.merkle_root {
            return vec![];
        }

        aggregate
            .value_proofs(&self.upper_proof)
            .into_iter()
            .map(|(value, proof)| SignedValue {
                value,
                proof,
                merkle_root: broadcast.merkle_root.clone(),
                signature: broadcast.signature.clone(),
                message: broadcast.message.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use cosi_crypto::{KeyPair, Ristretto255};
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    use super::*;

    type D = <Ristretto255 as Suite>::Hash;

    fn round_with_keys(
        rng: &mut ChaCha20Rng,
    ) -> (CosiRound<Ristretto255>, KeyPair<Ristretto255>) {
        let key_pair = KeyPair::generate(&Ristretto255, rng);
        let setup = RoundSetup {
            suite: Ristretto255,
            key_pair: key_pair.clone(),
            view: 0,
            round: 7,
        };

        (CosiRound::new(setup, rng), key_pair)
    }

    fn round(rng: &mut ChaCha20Rng) -> CosiRound<Ristretto255> {
        round_with_keys(rng).0
    }

    fn announcement() -> AnnouncementMessage {
        AnnouncementMessage {
            round_type: COSI_ROUND.to_string(),
            message: b"Hello World".to_vec(),
            timestamp: 0,
            vote: None,
        }
    }

    fn hash(value: &str) -> HashId {
        D::digest(value.as_bytes()).to_vec()
    }

    #[test]
    fn values_of_root_and_leaf_are_stamped_against_the_global_root() {
        let mut rng = ChaCha20Rng::from_seed([3u8; 32]);
        let (mut root, root_keys) = round_with_keys(&mut rng);
        let (mut leaf, leaf_keys) = round_with_keys(&mut rng);
        let roster = BTreeMap::from([
            ("root".to_string(), *root_keys.public_key()),
            ("leaf".to_string(), *leaf_keys.public_key()),
        ]);
        root.announcement(&announcement(), vec![hash("root value")])
            .unwrap();
        leaf.announcement(&announcement(), vec![hash("leaf value 1"), hash("leaf value 2")])
            .unwrap();

        let leaf_commitment = leaf.commitment(vec![]).unwrap();
        root.commitment(vec![ChildReport::Reported {
            child: "leaf".to_string(),
            message: leaf_commitment,
        }])
        .unwrap();
        let challenges = root.challenge(None).unwrap();
        leaf.challenge(challenges.get("leaf").cloned()).unwrap();
        let leaf_response = leaf.response(vec![]).unwrap();
        root.response(vec![ChildReport::Reported {
            child: "leaf".to_string(),
            message: leaf_response,
        }])
        .unwrap();

        let (signature, merkle_root) = root.signature().unwrap();
        assert_eq!(leaf.merkle_root(), &merkle_root);
        let broadcast = SignatureBroadcastMessage {
            signature,
            merkle_root,
            message: b"Hello World".to_vec(),
            vote: None,
        };

        let stamps: Vec<SignedValue<Ristretto255>> = root
            .stamps(&broadcast)
            .into_iter()
            .chain(leaf.stamps(&broadcast))
            .collect();
        assert_eq!(stamps.len(), 3);
        for stamp in stamps {
            stamp.verify(&Ristretto255, &roster).unwrap();
        }
    }

    #[test]
    fn node_left_out_of_the_challenge_has_no_stamps() {
        let mut rng = ChaCha20Rng::from_seed([5u8; 32]);
        let mut root = round(&mut rng);
        let mut leaf = round(&mut rng);
        root.announcement(&announcement(), vec![]).unwrap();
        leaf.announcement(&announcement(), vec![hash("late value")])
            .unwrap();
        leaf.commitment(vec![]).unwrap();
        root.commitment(vec![]).unwrap();
        root.challenge(None).unwrap();
        root.response(vec![]).unwrap();

        let (signature, merkle_root) = root.signature().unwrap();
        let broadcast = SignatureBroadcastMessage {
            signature,
            merkle_root,
            message: b"Hello World".to_vec(),
            vote: None,
        };

        assert!(leaf.stamps(&broadcast).is_empty());
    }

    #[test]
    fn challenge_before_commitment_fails() {
        let mut rng = ChaCha20Rng::from_seed([4u8; 32]);
        let mut root = round(&mut rng);
        root.announcement(&announcement(), vec![]).unwrap();

        assert!(root.challenge(None).is_err());
    }
}
