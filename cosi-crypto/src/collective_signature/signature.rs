use std::collections::{BTreeMap, BTreeSet};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::{
    CollectiveSignatureError, ParticipantId, StdResult, Suite,
    collective_signature::{ExceptionEntry, challenge_for},
};

/// Aggregate Schnorr signature produced by the whole tree.
///
/// `aggregate_commitment` and `aggregate_key` only cover the participants that responded,
/// so that `V0_hat == g^R0_hat * X0_hat^C`. The challenge was derived before any response
/// exception was known, from `aggregate_commitment + exception_commitment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct CollectiveSignature<S: Suite> {
    /// Challenge `C`
    pub challenge: S::Scalar,

    /// Aggregate response `R0_hat`
    pub response: S::Scalar,

    /// Aggregate public key `X0_hat` of the signers
    pub aggregate_key: S::Point,

    /// Aggregate commitment `V0_hat` of the signers
    pub aggregate_commitment: S::Point,

    /// Commitments withdrawn after the challenge was computed
    pub exception_commitment: S::Point,

    /// Participants left out of the signature
    pub exceptions: Vec<ExceptionEntry<S>>,

    /// Number of signers
    pub signers: u64,
}

impl<S: Suite> CollectiveSignature<S> {
    /// Verify the signature of `message` on behalf of `roster`, the public keys of every
    /// participant of the tree.
    ///
    /// The aggregate key is rebuilt as the sum of the roster keys minus the keys of the
    /// exceptions, each of which must be a distinct roster member.
    pub fn verify_with_keys(
        &self,
        suite: &S,
        message: &[u8],
        roster: &BTreeMap<ParticipantId, S::Point>,
    ) -> StdResult<()> {
        let mut excepted = BTreeSet::new();
        let mut aggregate_key = roster
            .values()
            .fold(suite.identity(), |sum, key| suite.add(&sum, key));
        for entry in &self.exceptions {
            if roster.get(&entry.participant) != Some(&entry.public_key)
                || !excepted.insert(&entry.participant)
            {
                return Err(anyhow!(CollectiveSignatureError::InvalidException(
                    entry.participant.clone()
                )));
            }
            aggregate_key = suite.sub(&aggregate_key, &entry.public_key);
        }
        if aggregate_key != self.aggregate_key {
            return Err(anyhow!(CollectiveSignatureError::AggregateKeyMismatch));
        }

        self.verify(suite, message)
    }

    /// Verify the signature of `message` against its own aggregate key.
    ///
    /// This only proves that the signature is consistent, not who signed it: use
    /// [CollectiveSignature::verify_with_keys] to check it against a roster.
    pub fn verify(&self, suite: &S, message: &[u8]) -> StdResult<()> {
        let committed = suite.add(&self.aggregate_commitment, &self.exception_commitment);
        if challenge_for(suite, &committed, message) != self.challenge {
            return Err(anyhow!(CollectiveSignatureError::ChallengeMismatch));
        }

        let expected = suite.add(
            &suite.base_mul(&self.response),
            &suite.mul(&self.aggregate_key, &self.challenge),
        );
        if expected != self.aggregate_commitment {
            return Err(anyhow!(CollectiveSignatureError::InvalidSignature));
        }

        Ok(())
    }

    /// True if the participant with this public key was left out.
    pub fn is_excepted(&self, public_key: &S::Point) -> bool {
        self.exceptions
            .iter()
            .any(|entry| &entry.public_key == public_key)
    }
}
