use anyhow::anyhow;
use cosi_crypto::Suite;
use slog::{debug, info, warn};

use crate::{
    NodeError, StdResult, ViewNumber,
    topology::root_for,
    vote::{Vote, VoteKind},
};

use super::{NodeInner, ViewChangeNotification};

impl<S: Suite> NodeInner<S> {
    /// Move to `view` on this node only. At most one attempt is in flight until a message of the
    /// new view confirms it.
    pub(super) async fn try_view_change(&self, view: ViewNumber) -> Result<(), NodeError> {
        let current = self.current_view().await;
        if view <= current {
            return Err(NodeError::StaleViewChange {
                requested: view,
                current,
            });
        }
        {
            let mut changing_view = self.changing_view.lock().await;
            if changing_view.is_some() {
                return Err(NodeError::AlreadyChangingView);
            }
            *changing_view = Some(view);
        }

        if let Err(error) = self.install_view(view).await {
            *self.changing_view.lock().await = None;
            return Err(error);
        }

        Ok(())
    }

    /// Derive and install `number`, dropping the rounds of the views that are forgotten.
    pub(super) async fn install_view(&self, number: ViewNumber) -> Result<(), NodeError> {
        let (view, oldest) = {
            let mut views = self.views.write().await;
            let view = views.install(number)?;

            (view, views.oldest_number())
        };

        let pruned = self.rounds.lock().await.remove_views_before(oldest);
        for round in pruned {
            self.abort_round(round, anyhow!(NodeError::Cancelled(round)))
                .await;
        }

        let root = root_for(number, view.host_list()).cloned();
        info!(self.logger, "View installed"; "view" => number, "root" => ?root, "is_root" => view.is_root());
        if view.is_root() {
            self.heartbeat.stop();
        } else {
            self.heartbeat.arm();
        }
        let _ = self.view_changes.send(ViewChangeNotification {
            view: number,
            root,
            is_root: view.is_root(),
        });

        Ok(())
    }

    /// Clear the pending attempt once `view` or a later one is confirmed.
    pub(super) async fn confirm_view_change(&self, view: ViewNumber) {
        let mut changing_view = self.changing_view.lock().await;
        if changing_view.is_some_and(|pending| pending <= view) {
            debug!(self.logger, "View change confirmed"; "view" => view);
            *changing_view = None;
        }
    }

    pub(super) async fn handle_heartbeat_expiry(&self) -> StdResult<()> {
        let current = self.current_view().await;
        let next = match self.changing_view.lock().await.take() {
            Some(pending) => {
                warn!(self.logger, "View change not confirmed in time, trying the next one"; "view" => pending);
                pending + 1
            }
            None => current + 1,
        }
        .max(current + 1);
        warn!(self.logger, "Heartbeat expired, changing view"; "view" => current, "next" => next);

        self.try_view_change(next).await.map_err(|error| anyhow!(error))
    }

    /// Apply a vote decided by a round or received through catch up.
    pub(super) async fn apply_vote(&self, vote: Vote) -> StdResult<()> {
        if !vote.confirmed {
            info!(self.logger, "Vote not confirmed"; "index" => vote.index, "for" => vote.count.for_votes, "against" => vote.count.against_votes);
            return Ok(());
        }
        if !self.vote_log.lock().await.put(vote.clone())? {
            return Ok(());
        }
        info!(self.logger, "Vote applied"; "index" => vote.index, "kind" => %vote.kind);

        match vote.kind {
            VoteKind::ViewChange { view, .. } => {
                if view > self.current_view().await {
                    self.install_view(view).await?;
                }
                self.confirm_view_change(view).await;
                Ok(())
            }
            VoteKind::Shutdown => {
                self.close().await;
                Ok(())
            }
            kind @ (VoteKind::AddNode { .. } | VoteKind::RemoveNode { .. }) => {
                Err(anyhow!(NodeError::UnsupportedVote(kind.to_string())))
            }
        }
    }
}
