use std::{
    collections::BTreeMap,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use anyhow::anyhow;
use cosi_crypto::{ExceptionEntry, Suite};
use rand_core::OsRng;
use slog::{debug, error, info, warn};

use crate::{
    NodeError, PeerId, RoundNumber, StdResult, ViewNumber,
    callbacks::RoundCompletion,
    messages::{
        AnnouncementMessage, ChallengeMessage, CommitmentMessage, ErrorMessage, MessagePayload,
        MessageType, ResponseMessage, SignatureBroadcastMessage, SigningMessage,
        StatusReturnMessage, signed_message,
    },
    round::{ChildReport, RoundEntry, RoundPhase, RoundScope, RoundSetup},
    topology::{Relation, View},
    vote::Vote,
};

use super::{Inbound, NodeInner, RoundEvent, RoundSummary};

impl<S: Suite> NodeInner<S> {
    pub(super) async fn handle_message(
        self: &Arc<Self>,
        from: PeerId,
        message: SigningMessage<S>,
    ) -> StdResult<()> {
        let SigningMessage {
            view_nbr: view,
            round_nbr: round,
            last_seen_vote,
            payload,
        } = message;
        self.request_missing_votes(&from, view, round, last_seen_vote)
            .await;

        match payload {
            MessagePayload::CatchUpRequest { index } => {
                self.answer_catch_up(&from, view, round, index).await;
                Ok(())
            }
            MessagePayload::CatchUpResponse { vote } => {
                self.on_catch_up_response(&from, view, round, last_seen_vote, vote)
                    .await
            }
            MessagePayload::Error(ErrorMessage { message }) => {
                warn!(self.logger, "Peer reported an error"; "peer" => &from, "round" => round, "error" => message);
                Ok(())
            }
            payload => self.handle_round_message(from, view, round, payload).await,
        }
    }

    async fn handle_round_message(
        self: &Arc<Self>,
        from: PeerId,
        view: ViewNumber,
        round: RoundNumber,
        payload: MessagePayload<S>,
    ) -> StdResult<()> {
        if !self
            .check_relation(&from, view, round, payload.message_type())
            .await?
        {
            return Ok(());
        }

        let result = match payload {
            MessagePayload::Announcement(announcement) => {
                self.on_announcement(from, view, round, announcement).await
            }
            MessagePayload::Commitment(commitment) => {
                self.on_commitment(from, view, round, commitment).await
            }
            MessagePayload::Challenge(challenge) => self.on_challenge(view, round, challenge).await,
            MessagePayload::Response(response) => {
                self.on_response(from, view, round, response).await
            }
            MessagePayload::SignatureBroadcast(broadcast) => {
                self.on_signature_broadcast(view, round, broadcast).await
            }
            MessagePayload::StatusReturn(status) => {
                self.on_status_return(from, view, round, status).await
            }
            MessagePayload::CloseAll => {
                info!(self.logger, "Tree closed by the parent"; "peer" => &from);
                self.close_all().await;
                Ok(())
            }
            MessagePayload::CatchUpRequest { .. }
            | MessagePayload::CatchUpResponse { .. }
            | MessagePayload::Error(_) => Ok(()),
        };

        self.settle(round, result).await
    }

    /// Check that `from` may send a message of this type in `view`. Returns false if the message
    /// must be ignored, an error if the sender breaks the tree.
    async fn check_relation(
        &self,
        from: &PeerId,
        view: ViewNumber,
        round: RoundNumber,
        message_type: MessageType,
    ) -> StdResult<bool> {
        let expected = match message_type {
            MessageType::Announcement
            | MessageType::Challenge
            | MessageType::SignatureBroadcast
            | MessageType::CloseAll => Relation::Parent,
            _ => Relation::Child,
        };
        let current = self.current_view().await;

        if view > current {
            if expected == Relation::Child {
                warn!(self.logger, "Message of a view not installed yet, ignored"; "peer" => from, "view" => view, "round" => round, "phase" => %message_type);
                return Ok(false);
            }
            info!(self.logger, "Adopting the view of the parent"; "view" => view, "current" => current);
            self.install_view(view).await?;
        }

        {
            let views = self.views.read().await;
            if views.get(view).is_none() {
                warn!(self.logger, "Stale message ignored"; "peer" => from, "view" => view, "round" => round, "phase" => %message_type);
                return Ok(false);
            }
            if !views.has_relation(view, from, expected) {
                error!(self.logger, "Protocol violation"; "peer" => from, "view" => view, "phase" => %message_type, "expected" => %expected);
                return Err(anyhow!(NodeError::ProtocolViolation {
                    peer: from.clone(),
                    message_type,
                    expected,
                    view,
                }));
            }
        }

        if expected == Relation::Parent && view >= current {
            self.heartbeat.arm();
            self.confirm_view_change(view).await;
        }

        Ok(true)
    }

    fn spawn_timer(&self, scope: &RoundScope, after: Duration, event: Inbound<S>) {
        let inbound = self.inbound_tx.clone();
        let cancelled = scope.cancelled();

        self.track(tokio::spawn(async move {
            tokio::select! {
                _ = cancelled => {}
                _ = tokio::time::sleep(after) => {
                    let _ = inbound.send(event);
                }
            }
        }));
    }

    fn spawn_child_timeout(
        &self,
        scope: &RoundScope,
        height: u32,
        round: RoundNumber,
        phase: MessageType,
    ) {
        let after = self.configuration.child_timeout(height);
        self.spawn_timer(scope, after, Inbound::ChildTimeout { round, phase });
    }

    async fn children_and_height(&self, view: ViewNumber) -> (Vec<PeerId>, u32) {
        self.views
            .read()
            .await
            .get(view)
            .map(|view| (view.children().to_vec(), view.height()))
            .unwrap_or_default()
    }

    fn round_setup(&self, view: ViewNumber, round: RoundNumber) -> RoundSetup<S> {
        RoundSetup {
            suite: self.suite.clone(),
            key_pair: self.key_pair.clone(),
            view,
            round,
        }
    }

    fn ignore_late(&self, round: RoundNumber, phase: MessageType) -> StdResult<()> {
        warn!(self.logger, "Late or unexpected message ignored"; "round" => round, "phase" => %phase);
        Ok(())
    }

    /// Start a round as root, called from the dispatch loop.
    pub(super) async fn start_round(
        self: &Arc<Self>,
        view: ViewNumber,
        round: RoundNumber,
        announcement: AnnouncementMessage,
    ) -> StdResult<()> {
        {
            let views = self.views.read().await;
            if views.current_number() != view || !views.is_root(view) {
                return Err(anyhow!(NodeError::NotRoot {
                    node: self.id.clone(),
                    view: views.current_number(),
                }));
            }
        }
        self.confirm_view_change(view).await;

        let handler =
            self.registry
                .create(&announcement.round_type, self.round_setup(view, round), &mut OsRng)?;
        self.rounds
            .lock()
            .await
            .insert(round, RoundEntry::new(view, handler, announcement.clone()));
        info!(self.logger, "Starting round"; "view" => view, "round" => round, "round_type" => &announcement.round_type);

        self.announce(view, round, announcement).await
    }

    async fn on_announcement(
        self: &Arc<Self>,
        from: PeerId,
        view: ViewNumber,
        round: RoundNumber,
        announcement: AnnouncementMessage,
    ) -> StdResult<()> {
        self.last_seen_round.fetch_max(round, Ordering::SeqCst);
        if self.rounds.lock().await.contains(round) {
            return self.ignore_late(round, MessageType::Announcement);
        }

        let handler = match self.registry.create(
            &announcement.round_type,
            self.round_setup(view, round),
            &mut OsRng,
        ) {
            Ok(handler) => handler,
            Err(error) => {
                warn!(self.logger, "Cannot take part in the round"; "round" => round, "error" => %error);
                let payload = MessagePayload::Error(ErrorMessage {
                    message: error.to_string(),
                });
                self.reply(&from, view, round, payload).await;
                return Ok(());
            }
        };

        let entry = RoundEntry::new(view, handler, announcement.clone());
        self.spawn_timer(
            &entry.scope,
            self.configuration.max_wait(),
            Inbound::RoundExpired { round },
        );
        self.rounds.lock().await.insert(round, entry);

        self.announce(view, round, announcement).await
    }

    /// Hand the announcement to the round and forward it to the children.
    async fn announce(
        self: &Arc<Self>,
        view: ViewNumber,
        round: RoundNumber,
        announcement: AnnouncementMessage,
    ) -> StdResult<()> {
        let values = self.callbacks.announcement(view, round, &announcement);
        let (children, height) = self.children_and_height(view).await;
        let scope = {
            let mut rounds = self.rounds.lock().await;
            let entry = rounds
                .get_mut(round)
                .ok_or_else(|| anyhow!("Round {round} is unknown"))?;
            entry
                .handler_mut()
                .ok_or_else(|| anyhow!("Round {round} has no handler"))?
                .announcement(&announcement, values)?;
            entry.move_to(round, RoundPhase::AwaitingChildCommits)?;

            entry.scope.clone()
        };
        debug!(self.logger, "Announcement forwarded"; "round" => round, "children" => children.len());

        let messages = children
            .iter()
            .map(|child| {
                let payload = MessagePayload::Announcement(announcement.clone());
                (child.clone(), payload)
            })
            .collect();
        self.put_down(view, round, &scope, messages).await?;

        if children.is_empty() {
            self.complete_commitment(view, round).await
        } else {
            self.spawn_child_timeout(&scope, height, round, MessageType::Commitment);
            Ok(())
        }
    }

    async fn on_commitment(
        self: &Arc<Self>,
        from: PeerId,
        view: ViewNumber,
        round: RoundNumber,
        commitment: CommitmentMessage<S>,
    ) -> StdResult<()> {
        let expected = self.views.read().await.n_children(view);
        let complete = {
            let mut rounds = self.rounds.lock().await;
            let Some(entry) = rounds.get_mut(round) else {
                return self.ignore_late(round, MessageType::Commitment);
            };
            if entry.view != view || entry.phase != RoundPhase::AwaitingChildCommits {
                return self.ignore_late(round, MessageType::Commitment);
            }
            entry.commitments.insert(from, commitment);

            entry.commitments.len() >= expected
        };

        if complete {
            self.complete_commitment(view, round).await
        } else {
            Ok(())
        }
    }

    async fn topology(&self, view: ViewNumber) -> StdResult<Arc<View>> {
        self.views
            .read()
            .await
            .get(view)
            .ok_or_else(|| anyhow!("View {view} is not known"))
    }

    fn public_key_of(&self, peer: &str) -> Result<S::Point, NodeError> {
        if peer == self.id {
            return Ok(*self.key_pair.public_key());
        }

        self.peer_keys
            .get(peer)
            .copied()
            .ok_or_else(|| NodeError::UnknownPeerKey(peer.to_string()))
    }

    /// Public keys of the hosts of `view`, every broadcast signature is checked against them.
    async fn roster(&self, view: ViewNumber) -> StdResult<BTreeMap<PeerId, S::Point>> {
        let topology = self.topology(view).await?;
        if topology.host_list().is_empty() {
            let mut roster = self.peer_keys.clone();
            roster.insert(self.id.clone(), *self.key_pair.public_key());
            return Ok(roster);
        }

        topology
            .host_list()
            .iter()
            .map(|host| Ok((host.clone(), self.public_key_of(host)?)))
            .collect()
    }

    /// Default the silent children of a collection phase. A silent child stands for its
    /// whole subtree in `topology`.
    fn child_reports<T>(
        &self,
        round: RoundNumber,
        phase: MessageType,
        topology: &View,
        children: &[PeerId],
        mut received: BTreeMap<PeerId, T>,
    ) -> StdResult<Vec<ChildReport<S, T>>> {
        children
            .iter()
            .map(|child| match received.remove(child) {
                Some(message) => Ok(ChildReport::Reported {
                    child: child.clone(),
                    message,
                }),
                None => {
                    let mut members = topology.subtree(child);
                    if members.is_empty() {
                        members.push(child.clone());
                    }
                    let subtree = members
                        .into_iter()
                        .map(|member| {
                            let public_key = self.public_key_of(&member)?;
                            Ok(ExceptionEntry::new(member, public_key))
                        })
                        .collect::<Result<Vec<_>, NodeError>>()?;
                    warn!(self.logger, "Child defaulted, recorded as exception"; "round" => round, "peer" => child, "phase" => %phase, "subtree" => subtree.len());

                    Ok(ChildReport::Missing {
                        child: child.clone(),
                        subtree,
                    })
                }
            })
            .collect()
    }

    async fn complete_commitment(self: &Arc<Self>, view: ViewNumber, round: RoundNumber) -> StdResult<()> {
        let topology = self.topology(view).await?;
        let (commitment, scope) = {
            let mut rounds = self.rounds.lock().await;
            let Some(entry) = rounds.get_mut(round) else {
                return Ok(());
            };
            if entry.phase != RoundPhase::AwaitingChildCommits {
                return Ok(());
            }
            let received = std::mem::take(&mut entry.commitments);
            let reports = self.child_reports(
                round,
                MessageType::Commitment,
                &topology,
                topology.children(),
                received,
            )?;
            entry.move_to(round, RoundPhase::CommitAggregated)?;
            let commitment = entry
                .handler_mut()
                .ok_or_else(|| anyhow!("Round {round} has no handler"))?
                .commitment(reports)?;

            (commitment, entry.scope.clone())
        };
        debug!(self.logger, "Commitment aggregated"; "round" => round, "exceptions" => commitment.share.exceptions.len());

        if self.views.read().await.is_root(view) {
            self.notify_waiter(round, RoundEvent::Committed).await;
            self.run_challenge(view, round, None).await
        } else {
            self.put_up(view, round, &scope, MessagePayload::Commitment(commitment))
                .await
        }
    }

    async fn on_challenge(
        self: &Arc<Self>,
        view: ViewNumber,
        round: RoundNumber,
        challenge: ChallengeMessage<S>,
    ) -> StdResult<()> {
        {
            let rounds = self.rounds.lock().await;
            let Some(entry) = rounds.get(round) else {
                return self.ignore_late(round, MessageType::Challenge);
            };
            if entry.view != view || entry.phase != RoundPhase::CommitAggregated {
                return self.ignore_late(round, MessageType::Challenge);
            }
        }

        self.run_challenge(view, round, Some(challenge)).await
    }

    /// Resolve the challenge and forward it to the committed children.
    async fn run_challenge(
        self: &Arc<Self>,
        view: ViewNumber,
        round: RoundNumber,
        incoming: Option<ChallengeMessage<S>>,
    ) -> StdResult<()> {
        let (_, height) = self.children_and_height(view).await;
        let (challenges, scope) = {
            let mut rounds = self.rounds.lock().await;
            let entry = rounds
                .get_mut(round)
                .ok_or_else(|| anyhow!("Round {round} is unknown"))?;
            entry.move_to(round, RoundPhase::AwaitingChildChallengeAck)?;
            let challenges = entry
                .handler_mut()
                .ok_or_else(|| anyhow!("Round {round} has no handler"))?
                .challenge(incoming)?;
            entry.expected_responses = challenges.keys().cloned().collect();

            (challenges, entry.scope.clone())
        };
        debug!(self.logger, "Challenge forwarded"; "round" => round, "children" => challenges.len());

        let messages = challenges
            .into_iter()
            .map(|(child, challenge)| (child, MessagePayload::Challenge(challenge)))
            .collect();
        self.put_down(view, round, &scope, messages).await?;

        let leaf = {
            let mut rounds = self.rounds.lock().await;
            let entry = rounds
                .get_mut(round)
                .ok_or_else(|| anyhow!("Round {round} is unknown"))?;
            entry.move_to(round, RoundPhase::AwaitingChildResponses)?;

            entry.expected_responses.is_empty()
        };
        if leaf {
            self.complete_response(view, round).await
        } else {
            self.spawn_child_timeout(&scope, height, round, MessageType::Response);
            Ok(())
        }
    }

    async fn on_response(
        self: &Arc<Self>,
        from: PeerId,
        view: ViewNumber,
        round: RoundNumber,
        response: ResponseMessage<S>,
    ) -> StdResult<()> {
        let complete = {
            let mut rounds = self.rounds.lock().await;
            let Some(entry) = rounds.get_mut(round) else {
                return self.ignore_late(round, MessageType::Response);
            };
            if entry.view != view
                || entry.phase != RoundPhase::AwaitingChildResponses
                || !entry.expected_responses.contains(&from)
            {
                return self.ignore_late(round, MessageType::Response);
            }
            entry.responses.insert(from, response);

            entry.responses.len() >= entry.expected_responses.len()
        };

        if complete {
            self.complete_response(view, round).await
        } else {
            Ok(())
        }
    }

    async fn complete_response(self: &Arc<Self>, view: ViewNumber, round: RoundNumber) -> StdResult<()> {
        let topology = self.topology(view).await?;
        let (response, scope) = {
            let mut rounds = self.rounds.lock().await;
            let Some(entry) = rounds.get_mut(round) else {
                return Ok(());
            };
            if entry.phase != RoundPhase::AwaitingChildResponses {
                return Ok(());
            }
            let expected: Vec<PeerId> = entry.expected_responses.iter().cloned().collect();
            let received = std::mem::take(&mut entry.responses);
            let reports = self.child_reports(
                round,
                MessageType::Response,
                &topology,
                &expected,
                received,
            )?;
            let response = entry
                .handler_mut()
                .ok_or_else(|| anyhow!("Round {round} has no handler"))?
                .response(reports)?;
            entry.move_to(round, RoundPhase::ResponseAggregated)?;

            (response, entry.scope.clone())
        };
        debug!(self.logger, "Response aggregated"; "round" => round, "signers" => response.share.signers);

        if self.views.read().await.is_root(view) {
            self.broadcast_signature(view, round).await
        } else {
            self.put_up(view, round, &scope, MessagePayload::Response(response))
                .await
        }
    }

    /// Build the final signature at the root and tally the vote of the round.
    async fn broadcast_signature(self: &Arc<Self>, view: ViewNumber, round: RoundNumber) -> StdResult<()> {
        let hosts = self.views.read().await.host_list_on(view).len() as u64;
        let broadcast = {
            let rounds = self.rounds.lock().await;
            let entry = rounds
                .get(round)
                .ok_or_else(|| anyhow!("Round {round} is unknown"))?;
            let announcement = entry
                .announcement
                .clone()
                .ok_or_else(|| anyhow!("Round {round} was not announced"))?;
            let (signature, merkle_root) = entry
                .handler
                .as_ref()
                .ok_or_else(|| anyhow!("Round {round} has no handler"))?
                .signature()?;
            let mut vote = announcement.vote;
            if let Some(vote) = vote.as_mut() {
                vote.tally(signature.signers, hosts);
            }

            SignatureBroadcastMessage {
                signature,
                merkle_root,
                message: announcement.message,
                vote,
            }
        };
        info!(self.logger, "Collective signature created"; "round" => round, "signers" => broadcast.signature.signers, "exceptions" => broadcast.signature.exceptions.len());

        self.on_signature_broadcast(view, round, broadcast).await
    }

    async fn on_signature_broadcast(
        self: &Arc<Self>,
        view: ViewNumber,
        round: RoundNumber,
        broadcast: SignatureBroadcastMessage<S>,
    ) -> StdResult<()> {
        self.last_seen_round.fetch_max(round, Ordering::SeqCst);
        let signed = signed_message(&broadcast.message, &broadcast.merkle_root);
        let verified = match self.roster(view).await.and_then(|roster| {
            broadcast
                .signature
                .verify_with_keys(&self.suite, &signed, &roster)
        }) {
            Ok(()) => true,
            Err(err) => {
                error!(self.logger, "Invalid collective signature"; "round" => round, "error" => ?err);
                false
            }
        };

        let (children, height) = self.children_and_height(view).await;
        let (scope, stamps) = {
            let mut rounds = self.rounds.lock().await;
            if !rounds.contains(round) {
                debug!(self.logger, "Relaying the signature of a round not held"; "round" => round);
                let entry = RoundEntry::relay(view);
                self.spawn_timer(
                    &entry.scope,
                    self.configuration.max_wait(),
                    Inbound::RoundExpired { round },
                );
                rounds.insert(round, entry);
            }
            let entry = rounds
                .get_mut(round)
                .ok_or_else(|| anyhow!("Round {round} is unknown"))?;
            if entry.phase == RoundPhase::Broadcasting {
                return self.ignore_late(round, MessageType::SignatureBroadcast);
            }
            entry.move_to(round, RoundPhase::Broadcasting)?;
            let stamps = verified
                .then(|| entry.handler.as_ref().map(|handler| handler.stamps(&broadcast)))
                .flatten();
            entry.broadcast = Some(broadcast.clone());

            (entry.scope.clone(), stamps)
        };

        let messages = children
            .iter()
            .map(|child| {
                let payload = MessagePayload::SignatureBroadcast(broadcast.clone());
                (child.clone(), payload)
            })
            .collect();
        self.put_down(view, round, &scope, messages).await?;

        if let Some(stamps) = stamps {
            self.callbacks.round_completed(RoundCompletion {
                view,
                round,
                merkle_root: broadcast.merkle_root.clone(),
                signature: broadcast.signature.clone(),
                stamps,
            });
        }
        if let (true, Some(vote)) = (verified, broadcast.vote) {
            if let Err(error) = self.apply_vote(vote).await {
                warn!(self.logger, "Vote of the round not applied"; "round" => round, "error" => ?error);
            }
        }

        if children.is_empty() {
            self.complete_status(view, round).await
        } else {
            self.spawn_child_timeout(&scope, height, round, MessageType::StatusReturn);
            Ok(())
        }
    }

    async fn on_status_return(
        self: &Arc<Self>,
        from: PeerId,
        view: ViewNumber,
        round: RoundNumber,
        status: StatusReturnMessage,
    ) -> StdResult<()> {
        let expected = self.views.read().await.n_children(view);
        let complete = {
            let mut rounds = self.rounds.lock().await;
            let Some(entry) = rounds.get_mut(round) else {
                return self.ignore_late(round, MessageType::StatusReturn);
            };
            if entry.view != view || entry.phase != RoundPhase::Broadcasting {
                return self.ignore_late(round, MessageType::StatusReturn);
            }
            entry.statuses.insert(from, status);

            entry.statuses.len() >= expected
        };

        if complete {
            self.complete_status(view, round).await
        } else {
            Ok(())
        }
    }

    /// Aggregate the status of the subtree and drop the round.
    async fn complete_status(self: &Arc<Self>, view: ViewNumber, round: RoundNumber) -> StdResult<()> {
        let (children, _) = self.children_and_height(view).await;
        let (status, broadcast, scope) = {
            let mut rounds = self.rounds.lock().await;
            let Some(entry) = rounds.get_mut(round) else {
                return Ok(());
            };
            if entry.phase != RoundPhase::Broadcasting {
                return Ok(());
            }
            let mut status = StatusReturnMessage {
                nodes: 1,
                faulty: 0,
            };
            for child in &children {
                match entry.statuses.get(child) {
                    Some(child_status) => status = status.merge(*child_status),
                    None => {
                        warn!(self.logger, "Child did not return its status"; "round" => round, "peer" => child);
                        status.faulty += 1;
                    }
                }
            }
            entry.move_to(round, RoundPhase::Done)?;

            (status, entry.broadcast.take(), entry.scope.clone())
        };

        if self.views.read().await.is_root(view) {
            self.rounds.lock().await.remove(round);
            let broadcast =
                broadcast.ok_or_else(|| anyhow!("Round {round} completed without signature"))?;
            info!(self.logger, "Round completed"; "round" => round, "view" => view, "nodes" => status.nodes, "faulty" => status.faulty);

            let summary = RoundSummary {
                view,
                round,
                message: broadcast.message,
                merkle_root: broadcast.merkle_root,
                signers: broadcast.signature.signers,
                exceptions: broadcast.signature.exceptions.clone(),
                signature: broadcast.signature,
                status,
                vote: broadcast.vote,
            };
            self.notify_waiter(round, RoundEvent::Completed(Box::new(summary)))
                .await;

            Ok(())
        } else {
            // Dropping the entry cancels its scope, keep it until the status is sent.
            let done = self.rounds.lock().await.remove(round);
            let result = self
                .put_up(view, round, &scope, MessagePayload::StatusReturn(status))
                .await;
            drop(done);
            debug!(self.logger, "Round done"; "round" => round);

            result
        }
    }

    pub(super) async fn handle_child_timeout(
        self: &Arc<Self>,
        round: RoundNumber,
        phase: MessageType,
    ) -> StdResult<()> {
        let Some((view, current)) = self
            .rounds
            .lock()
            .await
            .get(round)
            .map(|entry| (entry.view, entry.phase))
        else {
            return Ok(());
        };
        debug!(self.logger, "Child collection timed out"; "round" => round, "phase" => %phase);

        match (phase, current) {
            (MessageType::Commitment, RoundPhase::AwaitingChildCommits) => {
                self.complete_commitment(view, round).await
            }
            (MessageType::Response, RoundPhase::AwaitingChildResponses) => {
                self.complete_response(view, round).await
            }
            (MessageType::StatusReturn, RoundPhase::Broadcasting) => {
                self.complete_status(view, round).await
            }
            _ => Ok(()),
        }
    }

    /// Ask `from` for the next vote this node misses, if its log is ahead.
    async fn request_missing_votes(
        self: &Arc<Self>,
        from: &PeerId,
        view: ViewNumber,
        round: RoundNumber,
        peer_last_index: u64,
    ) {
        let index = self
            .vote_log
            .lock()
            .await
            .next_catch_up_request(peer_last_index);
        if let Some(index) = index {
            debug!(self.logger, "Requesting a missing vote"; "peer" => from, "index" => index);
            let payload = MessagePayload::CatchUpRequest { index };
            if let Err(error) = self.send(from, view, round, payload).await {
                warn!(self.logger, "Could not request a missing vote"; "peer" => from, "index" => index, "error" => ?error);
                self.vote_log.lock().await.abandon_catch_up_request();
            }
        }
    }

    async fn answer_catch_up(
        self: &Arc<Self>,
        from: &PeerId,
        view: ViewNumber,
        round: RoundNumber,
        index: u64,
    ) {
        let vote = self.vote_log.lock().await.get(index).cloned();
        if vote.is_none() {
            debug!(self.logger, "Requested vote is unknown"; "peer" => from, "index" => index);
        }

        self.reply(from, view, round, MessagePayload::CatchUpResponse { vote })
            .await;
    }

    async fn on_catch_up_response(
        self: &Arc<Self>,
        from: &PeerId,
        view: ViewNumber,
        round: RoundNumber,
        peer_last_index: u64,
        vote: Option<Vote>,
    ) -> StdResult<()> {
        let Some(vote) = vote else {
            debug!(self.logger, "Peer could not provide the requested vote"; "peer" => from);
            self.vote_log.lock().await.abandon_catch_up_request();
            return Ok(());
        };
        self.apply_vote(vote).await?;
        self.request_missing_votes(from, view, round, peer_last_index)
            .await;

        Ok(())
    }
}
