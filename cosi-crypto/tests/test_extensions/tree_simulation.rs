use std::collections::{BTreeMap, BTreeSet};

use blake2::Digest;
use cosi_crypto::{
    CollectiveSignature, CollectiveSigning, ExceptionEntry, HashId, KeyPair, MerkleAggregate,
    MerkleAggregator, MerkleProof, ParticipantId, Ristretto255, StdResult, Suite,
};
use rand_chacha::ChaCha20Rng;

type D = <Ristretto255 as Suite>::Hash;

/// A tree of participants laid out as a heap: the parent of `i` is `(i - 1) / branching`.
pub struct SimulatedTree {
    pub key_pairs: Vec<KeyPair<Ristretto255>>,
    pub branching: usize,
}

/// Participants that withhold their message for a phase.
#[derive(Default, Clone)]
pub struct Withheld {
    pub commitment: BTreeSet<usize>,
    pub response: BTreeSet<usize>,
}

/// Outcome of one simulated round.
pub struct SimulatedRound {
    pub signature: CollectiveSignature<Ristretto255>,
    pub merkle_root: HashId,
    pub signers: BTreeSet<usize>,
    pub value_proofs: Vec<(HashId, MerkleProof)>,
}

impl SimulatedTree {
    pub fn new(participants: usize, branching: usize, rng: &mut ChaCha20Rng) -> Self {
        let key_pairs = (0..participants)
            .map(|_| KeyPair::generate(&Ristretto255, rng))
            .collect();

        Self {
            key_pairs,
            branching,
        }
    }

    pub fn len(&self) -> usize {
        self.key_pairs.len()
    }

    pub fn children(&self, index: usize) -> Vec<usize> {
        (1..=self.branching)
            .map(|offset| index * self.branching + offset)
            .filter(|child| *child < self.len())
            .collect()
    }

    /// `index` followed by all its descendants.
    pub fn subtree(&self, index: usize) -> Vec<usize> {
        let mut members = vec![index];
        let mut next = 0;
        while next < members.len() {
            members.extend(self.children(members[next]));
            next += 1;
        }

        members
    }

    /// Exception entries of every participant of the subtree rooted at `index`.
    pub fn subtree_exceptions(&self, index: usize) -> Vec<ExceptionEntry<Ristretto255>> {
        self.subtree(index)
            .into_iter()
            .map(|member| {
                ExceptionEntry::new(Self::name(member), *self.key_pairs[member].public_key())
            })
            .collect()
    }

    /// Public keys of every participant, by name.
    pub fn roster(&self) -> BTreeMap<ParticipantId, <Ristretto255 as Suite>::Point> {
        self.key_pairs
            .iter()
            .enumerate()
            .map(|(index, key_pair)| (Self::name(index), *key_pair.public_key()))
            .collect()
    }

    pub fn name(index: usize) -> String {
        format!("node-{index}")
    }

    pub fn value(index: usize) -> HashId {
        D::digest(format!("value of {index}").as_bytes()).to_vec()
    }

    /// Run the four signing phases, every participant introducing one value.
    pub fn run(
        &self,
        message: &[u8],
        withheld: &Withheld,
        rng: &mut ChaCha20Rng,
    ) -> StdResult<SimulatedRound> {
        let n = self.len();
        let mut signing: Vec<CollectiveSigning<Ristretto255>> = self
            .key_pairs
            .iter()
            .map(|key_pair| CollectiveSigning::new(Ristretto255, key_pair.clone(), rng))
            .collect();
        let mut aggregates: Vec<Option<MerkleAggregate>> = vec![None; n];

        // Commitment, children before parents.
        for index in (0..n).rev() {
            let mut merkle = MerkleAggregator::<D>::new();
            merkle.set_local_values(vec![Self::value(index)]);
            for child in self.children(index) {
                match (&aggregates[child], withheld.commitment.contains(&child)) {
                    (Some(aggregate), false) => {
                        let share = signing[child].commitment_share();
                        signing[index].add_child_commitment(Self::name(child), share)?;
                        merkle.add_child_root(Self::name(child), aggregate.root().clone());
                    }
                    _ => signing[index]
                        .add_missing_child_commitment(self.subtree_exceptions(child)),
                }
            }
            aggregates[index] = Some(merkle.aggregate());
        }
        let root_aggregate = aggregates[0].clone().expect("root aggregate is computed");
        let merkle_root = root_aggregate.root().clone();

        // Challenge, parents before children.
        let mut signed_message = message.to_vec();
        signed_message.extend_from_slice(&merkle_root);
        let challenge = signing[0].compute_challenge(&signed_message);
        let mut upper_proofs: Vec<Option<MerkleProof>> = vec![None; n];
        upper_proofs[0] = Some(MerkleProof::default());
        for index in 0..n {
            let Some(upper) = upper_proofs[index].clone() else {
                continue;
            };
            let aggregate = aggregates[index].as_ref().expect("aggregate is computed");
            for child in self.children(index) {
                if signing[index].has_committed(&Self::name(child)) {
                    signing[child].set_challenge(challenge);
                    upper_proofs[child] = aggregate.child_proof(&Self::name(child), &upper);
                }
            }
        }

        // Response, children before parents.
        let mut responded = vec![false; n];
        for index in (0..n).rev() {
            if upper_proofs[index].is_none() {
                continue;
            }
            for child in self.children(index) {
                if responded[child] {
                    let share = signing[child].response_share()?;
                    signing[index].add_child_response(Self::name(child), share)?;
                } else {
                    signing[index].add_missing_child_response(
                        Self::name(child),
                        self.subtree_exceptions(child),
                    );
                }
            }
            responded[index] = !withheld.response.contains(&index);
        }

        let signature = signing[0].collective_signature()?;
        let signers = (0..n)
            .filter(|index| self.reaches_root(*index, &responded))
            .collect();
        let value_proofs = (0..n)
            .filter_map(|index| {
                let upper = upper_proofs[index].as_ref()?;
                aggregates[index].as_ref().map(|a| a.value_proofs(upper))
            })
            .flatten()
            .collect();

        Ok(SimulatedRound {
            signature,
            merkle_root,
            signers,
            value_proofs,
        })
    }

    fn reaches_root(&self, mut index: usize, responded: &[bool]) -> bool {
        loop {
            if index == 0 {
                return true;
            }
            if !responded[index] {
                return false;
            }
            index = (index - 1) / self.branching;
        }
    }

    /// Sum of the public keys of `participants`.
    pub fn aggregate_key_of(&self, participants: &BTreeSet<usize>) -> <Ristretto255 as Suite>::Point {
        participants
            .iter()
            .fold(Ristretto255.identity(), |sum, index| {
                Ristretto255.add(&sum, self.key_pairs[*index].public_key())
            })
    }
}
