//! Votes proposed by the root and the append-only log of the applied ones.

use anyhow::{Context, anyhow};
use blake2::{Blake2b, Digest, digest::consts::U32};
use serde::{Deserialize, Serialize};

use crate::{PeerId, StdResult, ViewNumber};

/// Proposal carried by a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum VoteKind {
    /// Move to `view`, rooted at `root`
    ViewChange {
        /// Proposed view
        view: ViewNumber,
        /// Root of the proposed view
        root: PeerId,
    },
    /// Add a host to the tree
    AddNode {
        /// Host to add
        peer: PeerId,
    },
    /// Remove a host from the tree
    RemoveNode {
        /// Host to remove
        peer: PeerId,
    },
    /// Close every node of the tree
    Shutdown,
}

/// Votes for and against a proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCount {
    /// Participants whose response is in the round signature
    pub for_votes: u64,
    /// Participants left out of the round signature
    pub against_votes: u64,
}

/// Proposal numbered in the vote log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Position in the vote log, starting at 1
    pub index: u64,
    /// Proposal
    pub kind: VoteKind,
    /// Quorum counter
    pub count: VoteCount,
    /// Set once a majority of the hosts signed the round carrying the vote
    pub confirmed: bool,
}

impl Vote {
    /// Proposal to move to `view`.
    pub fn view_change(index: u64, view: ViewNumber, root: PeerId) -> Self {
        Self {
            index,
            kind: VoteKind::ViewChange { view, root },
            count: VoteCount::default(),
            confirmed: false,
        }
    }

    /// Digest of the index and proposal, appended to the message signed by the round.
    pub fn digest(&self) -> StdResult<Vec<u8>> {
        let encoded = serde_json::to_vec(&(self.index, &self.kind))
            .with_context(|| "Could not encode vote proposal")?;

        Ok(Blake2b::<U32>::digest(encoded).to_vec())
    }

    /// Count the signers of the round as votes for the proposal, out of `participants` hosts.
    pub fn tally(&mut self, signers: u64, participants: u64) {
        self.count = VoteCount {
            for_votes: signers,
            against_votes: participants.saturating_sub(signers),
        };
        self.confirmed = signers * 2 > participants;
    }
}

/// Append-only log of applied votes.
#[derive(Debug, Clone, Default)]
pub struct VoteLog {
    entries: Vec<Vote>,
    pending_request: Option<u64>,
}

impl VoteLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the last vote in the log, 0 if empty
    pub fn last_index(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Vote at `index`
    pub fn get(&self, index: u64) -> Option<&Vote> {
        index
            .checked_sub(1)
            .and_then(|position| self.entries.get(position as usize))
    }

    /// Append `vote`, returns false if it is already in the log.
    pub fn put(&mut self, vote: Vote) -> StdResult<bool> {
        let next = self.last_index() + 1;
        if vote.index < next {
            return Ok(false);
        }
        if vote.index > next {
            return Err(anyhow!(
                "Vote {} cannot be appended, the next expected vote is {next}",
                vote.index
            ));
        }
        if self.pending_request == Some(vote.index) {
            self.pending_request = None;
        }
        self.entries.push(vote);

        Ok(true)
    }

    /// Next index to request from a peer whose log reaches `peer_last_index`, if not already
    /// requested.
    pub fn next_catch_up_request(&mut self, peer_last_index: u64) -> Option<u64> {
        let next = self.last_index() + 1;
        if peer_last_index < next || self.pending_request == Some(next) {
            return None;
        }
        self.pending_request = Some(next);

        Some(next)
    }

    /// Forget the pending request so that the next peer ahead of this log is asked again.
    pub fn abandon_catch_up_request(&mut self) {
        self.pending_request = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_change(index: u64) -> Vote {
        Vote::view_change(index, index, format!("node-{index}"))
    }

    #[test]
    fn tally_confirms_on_strict_majority() {
        let mut vote = view_change(1);

        vote.tally(2, 4);
        assert!(!vote.confirmed);
        assert_eq!(
            vote.count,
            VoteCount {
                for_votes: 2,
                against_votes: 2
            }
        );

        vote.tally(3, 4);
        assert!(vote.confirmed);
    }

    #[test]
    fn digest_does_not_depend_on_the_count() {
        let vote = view_change(1);
        let mut tallied = vote.clone();
        tallied.tally(4, 4);

        assert_eq!(vote.digest().unwrap(), tallied.digest().unwrap());
        assert_ne!(vote.digest().unwrap(), view_change(2).digest().unwrap());
    }

    #[test]
    fn log_appends_in_order_only() {
        let mut log = VoteLog::new();

        assert!(log.put(view_change(1)).unwrap());
        assert!(!log.put(view_change(1)).unwrap());
        log.put(view_change(3)).expect_err("vote 2 is missing");
        assert!(log.put(view_change(2)).unwrap());

        assert_eq!(log.last_index(), 2);
        assert_eq!(log.get(2), Some(&view_change(2)));
        assert_eq!(log.get(0), None);
    }

    #[test]
    fn catch_up_is_requested_once_per_missing_index() {
        let mut log = VoteLog::new();

        assert_eq!(log.next_catch_up_request(0), None);
        assert_eq!(log.next_catch_up_request(2), Some(1));
        assert_eq!(log.next_catch_up_request(2), None);

        log.put(view_change(1)).unwrap();
        assert_eq!(log.next_catch_up_request(2), Some(2));
    }

    #[test]
    fn abandoned_catch_up_is_requested_again() {
        let mut log = VoteLog::new();
        assert_eq!(log.next_catch_up_request(1), Some(1));

        log.abandon_catch_up_request();

        assert_eq!(log.next_catch_up_request(1), Some(1));
    }
}
