use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use cosi_crypto::Suite;
use tokio::sync::watch;

use crate::{
    NodeError, PeerId, RoundNumber, ViewNumber,
    messages::{
        AnnouncementMessage, CommitmentMessage, ResponseMessage, SignatureBroadcastMessage,
        StatusReturnMessage,
    },
};

use super::{RoundHandler, RoundPhase};

/// Cancellation scope of a round: timers and phase propagation of the round stop once it is
/// cancelled. Dropping the round entry cancels it.
#[derive(Debug, Clone)]
pub(crate) struct RoundScope {
    cancelled: Arc<watch::Sender<bool>>,
}

impl RoundScope {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: Arc::new(watch::Sender::new(false)),
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once the round is cancelled.
    pub(crate) fn cancelled(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut receiver = self.cancelled.subscribe();

        async move {
            let _ = receiver.wait_for(|cancelled| *cancelled).await;
        }
    }
}

/// State of one round on one node.
pub(crate) struct RoundEntry<S: Suite> {
    pub(crate) view: ViewNumber,
    pub(crate) phase: RoundPhase,
    pub(crate) handler: Option<Box<dyn RoundHandler<S>>>,
    pub(crate) announcement: Option<AnnouncementMessage>,
    pub(crate) commitments: BTreeMap<PeerId, CommitmentMessage<S>>,
    pub(crate) expected_responses: BTreeSet<PeerId>,
    pub(crate) responses: BTreeMap<PeerId, ResponseMessage<S>>,
    pub(crate) statuses: BTreeMap<PeerId, StatusReturnMessage>,
    pub(crate) broadcast: Option<SignatureBroadcastMessage<S>>,
    pub(crate) scope: RoundScope,
}

impl<S: Suite> RoundEntry<S> {
    /// Round created by an announcement.
    pub(crate) fn new(
        view: ViewNumber,
        handler: Box<dyn RoundHandler<S>>,
        announcement: AnnouncementMessage,
    ) -> Self {
        let mut entry = Self::relay(view);
        entry.handler = Some(handler);
        entry.announcement = Some(announcement);

        entry
    }

    /// Round only relayed by this node: it missed the announcement or was left out before the
    /// challenge, and only forwards the signature and aggregates the status.
    pub(crate) fn relay(view: ViewNumber) -> Self {
        Self {
            view,
            phase: RoundPhase::Created,
            handler: None,
            announcement: None,
            commitments: BTreeMap::new(),
            expected_responses: BTreeSet::new(),
            responses: BTreeMap::new(),
            statuses: BTreeMap::new(),
            broadcast: None,
            scope: RoundScope::new(),
        }
    }

    /// Move to `next`, checking the transition.
    pub(crate) fn move_to(&mut self, round: RoundNumber, next: RoundPhase) -> Result<(), NodeError> {
        if !self.phase.can_move_to(next) {
            return Err(NodeError::InvalidPhaseTransition {
                round,
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;

        Ok(())
    }

    pub(crate) fn handler_mut(&mut self) -> Option<&mut Box<dyn RoundHandler<S>>> {
        self.handler.as_mut()
    }
}

impl<S: Suite> Drop for RoundEntry<S> {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}

/// In-flight rounds of a node. A round leaves the table when it is done, cancelled or expired.
pub(crate) struct RoundTable<S: Suite> {
    rounds: BTreeMap<RoundNumber, RoundEntry<S>>,
}

impl<S: Suite> Default for RoundTable<S> {
    fn default() -> Self {
        Self {
            rounds: BTreeMap::new(),
        }
    }
}

impl<S: Suite> RoundTable<S> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.rounds.len()
    }

    pub(crate) fn contains(&self, round: RoundNumber) -> bool {
        self.rounds.contains_key(&round)
    }

    pub(crate) fn get(&self, round: RoundNumber) -> Option<&RoundEntry<S>> {
        self.rounds.get(&round)
    }

    pub(crate) fn get_mut(&mut self, round: RoundNumber) -> Option<&mut RoundEntry<S>> {
        self.rounds.get_mut(&round)
    }

    pub(crate) fn insert(&mut self, round: RoundNumber, entry: RoundEntry<S>) {
        self.rounds.insert(round, entry);
    }

    pub(crate) fn remove(&mut self, round: RoundNumber) -> Option<RoundEntry<S>> {
        self.rounds.remove(&round)
    }

    /// Drop the rounds of views older than `oldest_view`, returns their numbers.
    pub(crate) fn remove_views_before(&mut self, oldest_view: ViewNumber) -> Vec<RoundNumber> {
        let stale: Vec<RoundNumber> = self
            .rounds
            .iter()
            .filter(|(_, entry)| entry.view < oldest_view)
            .map(|(round, _)| *round)
            .collect();
        for round in &stale {
            self.rounds.remove(round);
        }

        stale
    }

    pub(crate) fn clear(&mut self) {
        self.rounds.clear();
    }
}

#[cfg(test)]
mod tests {
    use cosi_crypto::Ristretto255;

    use super::*;

    #[test]
    fn dropping_an_entry_cancels_its_scope() {
        let entry = RoundEntry::<Ristretto255>::relay(0);
        let scope = entry.scope.clone();
        assert!(!scope.is_cancelled());

        drop(entry);

        assert!(scope.is_cancelled());
    }

    #[test]
    fn invalid_transition_is_reported() {
        let mut entry = RoundEntry::<Ristretto255>::relay(0);

        entry.move_to(1, RoundPhase::AwaitingChildCommits).unwrap();
        let error = entry
            .move_to(1, RoundPhase::ResponseAggregated)
            .expect_err("responses come after the challenge");

        assert!(matches!(
            error,
            NodeError::InvalidPhaseTransition {
                round: 1,
                from: RoundPhase::AwaitingChildCommits,
                to: RoundPhase::ResponseAggregated
            }
        ));
    }

    #[test]
    fn rounds_of_forgotten_views_are_removed() {
        let mut table = RoundTable::<Ristretto255>::new();
        table.insert(1, RoundEntry::relay(0));
        table.insert(2, RoundEntry::relay(1));
        table.insert(3, RoundEntry::relay(2));

        let removed = table.remove_views_before(1);

        assert_eq!(removed, vec![1]);
        assert_eq!(table.len(), 2);
        assert!(!table.contains(1));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let scope = RoundScope::new();
        let cancelled = scope.cancelled();

        scope.cancel();

        cancelled.await;
    }
}
