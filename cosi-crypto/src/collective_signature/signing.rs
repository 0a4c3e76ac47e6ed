use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use rand_core::CryptoRngCore;

use crate::{
    CollectiveSignatureError, KeyPair, ParticipantId, StdResult, Suite,
    collective_signature::{CollectiveSignature, CommitmentShare, ExceptionEntry, ResponseShare},
};

/// Schnorr accumulator of one participant for one round.
///
/// The participant commits to a fresh secret `v`, folds the commitments of its children into
/// `V_hat` and `X_hat`, then folds their responses into `r_hat` once the challenge is known.
/// Children that do not answer are recorded as exceptions and their contribution is
/// withdrawn so that the verification equation still balances.
#[derive(Debug, Clone)]
pub struct CollectiveSigning<S: Suite> {
    suite: S,
    key_pair: KeyPair<S>,
    secret: S::Scalar,
    commitment: S::Point,
    aggregate_commitment: S::Point,
    aggregate_key: S::Point,
    child_commitments: BTreeMap<ParticipantId, CommitmentShare<S>>,
    commitment_exceptions: Vec<ExceptionEntry<S>>,
    challenge: Option<S::Scalar>,
    responded: BTreeMap<ParticipantId, bool>,
    children_response: S::Scalar,
    exception_commitment: S::Point,
    exception_key: S::Point,
    response_exceptions: Vec<ExceptionEntry<S>>,
    children_signers: u64,
}

impl<S: Suite> CollectiveSigning<S> {
    /// Commit to a fresh random secret.
    pub fn new(suite: S, key_pair: KeyPair<S>, rng: &mut dyn CryptoRngCore) -> Self {
        let secret = suite.random_scalar(rng);
        let commitment = suite.base_mul(&secret);
        let identity = suite.identity();

        Self {
            aggregate_commitment: commitment,
            aggregate_key: *key_pair.public_key(),
            children_response: suite.scalar_zero(),
            secret,
            commitment,
            key_pair,
            child_commitments: BTreeMap::new(),
            commitment_exceptions: vec![],
            challenge: None,
            responded: BTreeMap::new(),
            exception_commitment: identity,
            exception_key: identity,
            response_exceptions: vec![],
            children_signers: 0,
            suite,
        }
    }

    /// Own commitment point `V = g^v`
    pub fn commitment(&self) -> &S::Point {
        &self.commitment
    }

    /// Aggregate commitment `V_hat` of the subtree
    pub fn aggregate_commitment(&self) -> &S::Point {
        &self.aggregate_commitment
    }

    /// Aggregate public key `X_hat` of the subtree, before any response exception
    pub fn aggregate_key(&self) -> &S::Point {
        &self.aggregate_key
    }

    /// Challenge of the round, once known
    pub fn challenge(&self) -> Option<&S::Scalar> {
        self.challenge.as_ref()
    }

    /// True if `child` took part in the commitment
    pub fn has_committed(&self, child: &str) -> bool {
        self.child_commitments.contains_key(child)
    }

    /// Fold the commitment reported by a child.
    pub fn add_child_commitment(
        &mut self,
        child: ParticipantId,
        share: CommitmentShare<S>,
    ) -> StdResult<()> {
        if self.child_commitments.contains_key(&child) {
            return Err(anyhow!(CollectiveSignatureError::DuplicateChild(child)));
        }

        self.aggregate_commitment = self
            .suite
            .add(&self.aggregate_commitment, &share.aggregate_commitment);
        self.aggregate_key = self.suite.add(&self.aggregate_key, &share.aggregate_key);
        self.commitment_exceptions.extend(share.exceptions.iter().cloned());
        self.child_commitments.insert(child, share);

        Ok(())
    }

    /// Record a child which did not commit: nothing of its subtree is folded and every
    /// participant of `subtree`, the child included, becomes an exception.
    pub fn add_missing_child_commitment(&mut self, subtree: Vec<ExceptionEntry<S>>) {
        self.commitment_exceptions.extend(subtree);
    }

    /// Share reported upward at the end of the commitment.
    pub fn commitment_share(&self) -> CommitmentShare<S> {
        CommitmentShare {
            aggregate_commitment: self.aggregate_commitment,
            aggregate_key: self.aggregate_key,
            exceptions: self.commitment_exceptions.clone(),
        }
    }

    /// Derive the challenge `c = H(V_hat || message)` as the root of the tree.
    pub fn compute_challenge(&mut self, message: &[u8]) -> S::Scalar {
        let challenge = challenge_for(&self.suite, &self.aggregate_commitment, message);
        self.challenge = Some(challenge);

        challenge
    }

    /// Set the challenge received from the parent.
    pub fn set_challenge(&mut self, challenge: S::Scalar) {
        self.challenge = Some(challenge);
    }

    /// Fold the response reported by a child.
    pub fn add_child_response(
        &mut self,
        child: ParticipantId,
        share: ResponseShare<S>,
    ) -> StdResult<()> {
        if !self.has_committed(&child) {
            return Err(anyhow!(CollectiveSignatureError::UncommittedChild(child)));
        }
        if self.responded.contains_key(&child) {
            return Err(anyhow!(CollectiveSignatureError::DuplicateChild(child)));
        }

        self.children_response = self
            .suite
            .scalar_add(&self.children_response, &share.aggregate_response);
        self.exception_commitment = self
            .suite
            .add(&self.exception_commitment, &share.exception_commitment);
        self.exception_key = self.suite.add(&self.exception_key, &share.exception_key);
        self.response_exceptions.extend(share.exceptions);
        self.children_signers += share.signers;
        self.responded.insert(child, true);

        Ok(())
    }

    /// Record a committed child which did not respond: its whole subtree contribution is
    /// withdrawn. The participants of `subtree` that took part in the commitment become
    /// exceptions, the others already are. A child that never committed is ignored.
    pub fn add_missing_child_response(
        &mut self,
        child: ParticipantId,
        subtree: Vec<ExceptionEntry<S>>,
    ) {
        let Some(share) = self.child_commitments.get(&child) else {
            return;
        };
        if self.responded.contains_key(&child) {
            return;
        }

        self.exception_commitment = self
            .suite
            .add(&self.exception_commitment, &share.aggregate_commitment);
        self.exception_key = self.suite.add(&self.exception_key, &share.aggregate_key);
        self.response_exceptions.extend(subtree.into_iter().filter(|member| {
            !share
                .exceptions
                .iter()
                .any(|excepted| excepted.participant == member.participant)
        }));
        self.responded.insert(child, false);
    }

    /// Own response `r = v - c * x` added to the responses of the children, checked
    /// against the subtree aggregates.
    pub fn response_share(&self) -> StdResult<ResponseShare<S>> {
        let challenge = self
            .challenge
            .ok_or(CollectiveSignatureError::MissingChallenge)?;
        let own_response = self.suite.scalar_sub(
            &self.secret,
            &self.suite.scalar_mul(&challenge, self.key_pair.private_key()),
        );
        let aggregate_response = self
            .suite
            .scalar_add(&own_response, &self.children_response);

        let share = ResponseShare {
            aggregate_response,
            exception_commitment: self.exception_commitment,
            exception_key: self.exception_key,
            exceptions: self.response_exceptions.clone(),
            signers: self.children_signers + 1,
        };
        self.verify_response_share(&challenge, &share)
            .with_context(|| "Aggregated response of the subtree is not consistent")?;

        Ok(share)
    }

    // g^r_hat * (X_hat - exception_X)^c + exception_V == V_hat
    fn verify_response_share(
        &self,
        challenge: &S::Scalar,
        share: &ResponseShare<S>,
    ) -> StdResult<()> {
        let remaining_key = self.suite.sub(&self.aggregate_key, &share.exception_key);
        let expected = self.suite.add(
            &self.suite.add(
                &self.suite.base_mul(&share.aggregate_response),
                &self.suite.mul(&remaining_key, challenge),
            ),
            &share.exception_commitment,
        );

        if expected != self.aggregate_commitment {
            return Err(anyhow!(CollectiveSignatureError::InvalidPartialResponse));
        }

        Ok(())
    }

    /// Final signature, computed by the root once every child answered or was excepted.
    pub fn collective_signature(&self) -> StdResult<CollectiveSignature<S>> {
        let share = self.response_share()?;
        let challenge = self
            .challenge
            .ok_or(CollectiveSignatureError::MissingChallenge)?;

        let mut exceptions = self.commitment_exceptions.clone();
        exceptions.extend(share.exceptions);

        Ok(CollectiveSignature {
            challenge,
            response: share.aggregate_response,
            aggregate_key: self.suite.sub(&self.aggregate_key, &share.exception_key),
            aggregate_commitment: self
                .suite
                .sub(&self.aggregate_commitment, &share.exception_commitment),
            exception_commitment: share.exception_commitment,
            exceptions,
            signers: share.signers,
        })
    }
}

/// Challenge `H(V_hat || message)` binding the aggregate commitment to the signed message.
pub fn challenge_for<S: Suite>(suite: &S, aggregate_commitment: &S::Point, message: &[u8]) -> S::Scalar {
    suite.hash_to_scalar(&[&suite.point_to_bytes(aggregate_commitment), message])
}
