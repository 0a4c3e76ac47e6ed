use std::sync::Arc;

use anyhow::{Context, anyhow};
use cosi_crypto::Suite;
use slog::{debug, info, warn};

use crate::{
    NodeError, PeerId, RoundNumber, StdResult, ViewNumber,
    failure::Role,
    messages::{MessagePayload, MessageType, SigningMessage},
    round::RoundScope,
    transport::{Connection, TransportError},
};

use super::{Inbound, NodeInner};

impl<S: Suite> NodeInner<S> {
    pub(super) fn spawn_acceptor(self: &Arc<Self>) {
        let inner = self.clone();

        self.track(tokio::spawn(async move {
            loop {
                match inner.transport.accept().await {
                    Ok(connection) => {
                        inner.register_connection(connection).await;
                    }
                    Err(error) => {
                        debug!(inner.logger, "Transport stopped accepting connections"; "error" => %error);
                        return;
                    }
                }
            }
        }));
    }

    /// Connection with `peer`, established on first use.
    async fn connection(
        self: &Arc<Self>,
        peer: &PeerId,
    ) -> Result<Arc<dyn Connection<S>>, TransportError> {
        if let Some(connection) = self.connections.lock().await.get(peer) {
            return Ok(connection.clone());
        }
        let connection = self.transport.connect(peer).await?;

        Ok(self.register_connection(connection).await)
    }

    /// Read `connection` and keep it for sending unless a connection with the same peer is
    /// already known. Returns the connection to use for sending.
    async fn register_connection(
        self: &Arc<Self>,
        connection: Arc<dyn Connection<S>>,
    ) -> Arc<dyn Connection<S>> {
        let peer = connection.remote().clone();
        self.spawn_reader(connection.clone());

        let mut connections = self.connections.lock().await;
        if self.is_closed() {
            connection.close().await;
            return connection;
        }
        debug!(self.logger, "Connection registered"; "peer" => &peer);

        connections.entry(peer).or_insert(connection).clone()
    }

    fn spawn_reader(&self, connection: Arc<dyn Connection<S>>) {
        let inbound = self.inbound_tx.clone();

        self.track(tokio::spawn(async move {
            let peer = connection.remote().clone();
            loop {
                match connection.get().await {
                    Ok(message) => {
                        let from = peer.clone();
                        if inbound.send(Inbound::Message { from, message }).is_err() {
                            return;
                        }
                    }
                    Err(_) => {
                        let _ = inbound.send(Inbound::ConnectionClosed { peer, connection });
                        return;
                    }
                }
            }
        }));
    }

    pub(super) async fn send(
        self: &Arc<Self>,
        peer: &PeerId,
        view: ViewNumber,
        round: RoundNumber,
        payload: MessagePayload<S>,
    ) -> StdResult<()> {
        let message = SigningMessage {
            view_nbr: view,
            round_nbr: round,
            last_seen_vote: self.vote_log.lock().await.last_index(),
            payload,
        };
        let message_type = message.message_type();
        let connection = self
            .connection(peer)
            .await
            .with_context(|| format!("Could not reach '{peer}'"))?;

        if let Err(error) = connection.put(message).await {
            let mut connections = self.connections.lock().await;
            if connections
                .get(peer)
                .is_some_and(|known| Arc::ptr_eq(known, &connection))
            {
                connections.remove(peer);
            }
            return Err(
                anyhow!(error).context(format!("Could not send {message_type} to '{peer}'"))
            );
        }

        Ok(())
    }

    /// Send one message per child, skipping the ones the failure policy withholds. A child that
    /// cannot be reached is only logged, it is defaulted by the next collection timeout.
    pub(super) async fn put_down(
        self: &Arc<Self>,
        view: ViewNumber,
        round: RoundNumber,
        scope: &RoundScope,
        messages: Vec<(PeerId, MessagePayload<S>)>,
    ) -> StdResult<()> {
        let Some(message_type) = messages.first().map(|(_, payload)| payload.message_type())
        else {
            return Ok(());
        };
        if self.withholds(view, round, message_type).await {
            return Ok(());
        }

        for (child, payload) in messages {
            if scope.is_cancelled() {
                return Err(anyhow!(NodeError::Cancelled(round)));
            }
            if let Err(error) = self.send(&child, view, round, payload).await {
                warn!(self.logger, "Could not reach child"; "round" => round, "peer" => &child, "error" => ?error);
            }
        }

        Ok(())
    }

    /// Send `payload` to the parent of this node in `view`.
    pub(super) async fn put_up(
        self: &Arc<Self>,
        view: ViewNumber,
        round: RoundNumber,
        scope: &RoundScope,
        payload: MessagePayload<S>,
    ) -> StdResult<()> {
        if scope.is_cancelled() {
            return Err(anyhow!(NodeError::Cancelled(round)));
        }
        let parent = self
            .views
            .read()
            .await
            .parent(view)
            .ok_or_else(|| anyhow!("Node has no parent in view {view}"))?;
        if self.withholds(view, round, payload.message_type()).await {
            return Ok(());
        }

        self.send(&parent, view, round, payload).await
    }

    /// Send a message that belongs to no round phase.
    pub(super) async fn reply(
        self: &Arc<Self>,
        peer: &PeerId,
        view: ViewNumber,
        round: RoundNumber,
        payload: MessagePayload<S>,
    ) {
        if let Err(error) = self.send(peer, view, round, payload).await {
            warn!(self.logger, "Could not reply"; "peer" => peer, "error" => ?error);
        }
    }

    async fn withholds(&self, view: ViewNumber, round: RoundNumber, phase: MessageType) -> bool {
        let role = if self.views.read().await.is_root(view) {
            Role::Root
        } else {
            Role::Follower
        };
        let withheld = self.failure.should_fail(role, round, phase);
        if withheld {
            warn!(self.logger, "Injected failure, withholding message"; "round" => round, "phase" => %phase, "role" => %role);
        }

        withheld
    }

    pub(super) async fn handle_connection_closed(
        &self,
        peer: PeerId,
        connection: Arc<dyn Connection<S>>,
    ) {
        {
            let mut connections = self.connections.lock().await;
            if !connections
                .get(&peer)
                .is_some_and(|known| Arc::ptr_eq(known, &connection))
            {
                return;
            }
            connections.remove(&peer);
        }

        let is_parent = {
            let views = self.views.read().await;
            views.is_parent(views.current_number(), &peer)
        };
        if is_parent && self.changing_view.lock().await.is_none() {
            info!(self.logger, "Connection with the parent closed"; "peer" => &peer);
            self.close().await;
        } else {
            debug!(self.logger, "Connection closed"; "peer" => &peer);
        }
    }

    /// Forward `CloseAll` to the children of the current view, then close.
    pub(super) async fn close_all(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let (view, children) = {
            let views = self.views.read().await;
            let view = views.current_number();
            (view, views.children(view))
        };
        let round = self.last_seen_round();
        for child in children {
            self.reply(&child, view, round, MessagePayload::CloseAll)
                .await;
        }

        self.close().await;
    }
}
