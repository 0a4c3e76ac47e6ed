use serde::{Deserialize, Serialize};

/// States of a round on one node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
pub enum RoundPhase {
    /// Announcement received, not yet forwarded
    Created,
    /// Announcement forwarded, collecting the commitments of the children
    AwaitingChildCommits,
    /// Commitment of the subtree computed and sent upward
    CommitAggregated,
    /// Challenge received, being forwarded to the committed children
    AwaitingChildChallengeAck,
    /// Challenge forwarded, collecting the responses of the children
    AwaitingChildResponses,
    /// Response of the subtree computed and sent upward
    ResponseAggregated,
    /// Signature forwarded, collecting the status of the children
    Broadcasting,
    /// Round over, about to be removed from the round table
    Done,
}

impl RoundPhase {
    /// True if the round may go from this phase to `next`.
    ///
    /// A signature broadcast may reach a node at any point of the round, for instance when
    /// its commitment was not received in time by its parent.
    pub fn can_move_to(&self, next: RoundPhase) -> bool {
        use RoundPhase::*;

        match (self, next) {
            (Created, AwaitingChildCommits)
            | (AwaitingChildCommits, CommitAggregated)
            | (CommitAggregated, AwaitingChildChallengeAck)
            | (AwaitingChildChallengeAck, AwaitingChildResponses)
            | (AwaitingChildResponses, ResponseAggregated)
            | (Broadcasting, Done) => true,
            (Done, _) | (Broadcasting, Broadcasting) => false,
            (_, Broadcasting) => true,
            _ => false,
        }
    }

    /// True while the round waits for messages of its children.
    pub fn is_awaiting_children(&self) -> bool {
        matches!(
            self,
            RoundPhase::AwaitingChildCommits
                | RoundPhase::AwaitingChildResponses
                | RoundPhase::Broadcasting
        )
    }
}
