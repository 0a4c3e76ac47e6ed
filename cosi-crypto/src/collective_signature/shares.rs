use serde::{Deserialize, Serialize};

use crate::{ParticipantId, Suite};

/// Participant left out of a collective signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ExceptionEntry<S: Suite> {
    /// Identity of the absent participant
    pub participant: ParticipantId,

    /// Long term public key of the absent participant
    pub public_key: S::Point,
}

impl<S: Suite> ExceptionEntry<S> {
    /// ExceptionEntry factory
    pub fn new(participant: ParticipantId, public_key: S::Point) -> Self {
        Self {
            participant,
            public_key,
        }
    }
}

/// What a subtree reports upward at the end of the commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct CommitmentShare<S: Suite> {
    /// Aggregate commitment `V_hat` of the subtree
    pub aggregate_commitment: S::Point,

    /// Aggregate public key `X_hat` of the subtree
    pub aggregate_key: S::Point,

    /// Children of the subtree which did not commit
    pub exceptions: Vec<ExceptionEntry<S>>,
}

/// What a subtree reports upward at the end of the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ResponseShare<S: Suite> {
    /// Aggregate response `r_hat` of the subtree
    pub aggregate_response: S::Scalar,

    /// Sum of the subtree aggregate commitments withdrawn after the commitment
    pub exception_commitment: S::Point,

    /// Sum of the subtree aggregate keys withdrawn after the commitment
    pub exception_key: S::Point,

    /// Children of the subtree which committed but did not respond
    pub exceptions: Vec<ExceptionEntry<S>>,

    /// Number of participants whose response is included
    pub signers: u64,
}
