use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use cosi_crypto::Suite;
use tokio::sync::{
    Mutex as AsyncMutex,
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    watch,
};

use crate::{PeerId, messages::SigningMessage};

use super::{Connection, Transport, TransportError};

type AcceptQueue<S> = UnboundedSender<Arc<dyn Connection<S>>>;

/// In-process network: a registry of endpoints linked by unbounded channels.
pub struct ChannelNetwork<S: Suite> {
    endpoints: Arc<Mutex<HashMap<PeerId, AcceptQueue<S>>>>,
}

impl<S: Suite> Clone for ChannelNetwork<S> {
    fn clone(&self) -> Self {
        Self {
            endpoints: self.endpoints.clone(),
        }
    }
}

impl<S: Suite> Default for ChannelNetwork<S> {
    fn default() -> Self {
        Self {
            endpoints: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<S: Suite> ChannelNetwork<S> {
    /// Empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint for `peer`, replacing any previous one.
    pub fn endpoint(&self, peer: &str) -> ChannelTransport<S> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer.to_string(), sender);

        ChannelTransport {
            local: peer.to_string(),
            network: self.clone(),
            incoming: AsyncMutex::new(receiver),
            closed: watch::Sender::new(false),
        }
    }

    fn accept_queue(&self, peer: &str) -> Option<AcceptQueue<S>> {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
    }

    fn unregister(&self, peer: &str) {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer);
    }
}

/// Endpoint of a [ChannelNetwork].
pub struct ChannelTransport<S: Suite> {
    local: PeerId,
    network: ChannelNetwork<S>,
    incoming: AsyncMutex<UnboundedReceiver<Arc<dyn Connection<S>>>>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl<S: Suite> Transport<S> for ChannelTransport<S> {
    fn local(&self) -> &PeerId {
        &self.local
    }

    async fn connect(&self, peer: &PeerId) -> Result<Arc<dyn Connection<S>>, TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::Closed(self.local.clone()));
        }
        let accept_queue = self
            .network
            .accept_queue(peer)
            .ok_or_else(|| TransportError::Unreachable(peer.clone()))?;
        let (local_end, remote_end) = ChannelConnection::pair(&self.local, peer);

        accept_queue
            .send(Arc::new(remote_end))
            .map_err(|_| TransportError::Unreachable(peer.clone()))?;

        Ok(Arc::new(local_end))
    }

    async fn accept(&self) -> Result<Arc<dyn Connection<S>>, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut incoming = self.incoming.lock().await;

        tokio::select! {
            biased;
            connection = incoming.recv() => {
                connection.ok_or_else(|| TransportError::Closed(self.local.clone()))
            }
            _ = closed.wait_for(|closed| *closed) => Err(TransportError::Closed(self.local.clone())),
        }
    }

    async fn close(&self) {
        self.network.unregister(&self.local);
        self.closed.send_replace(true);
    }
}

/// One end of an in-process link. Both ends share the closed flag of the link.
struct ChannelConnection<S: Suite> {
    remote: PeerId,
    outgoing: Mutex<Option<UnboundedSender<SigningMessage<S>>>>,
    incoming: AsyncMutex<UnboundedReceiver<SigningMessage<S>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl<S: Suite> ChannelConnection<S> {
    fn pair(local: &str, remote: &str) -> (Self, Self) {
        let (to_remote, from_local) = mpsc::unbounded_channel();
        let (to_local, from_remote) = mpsc::unbounded_channel();
        let closed = Arc::new(watch::Sender::new(false));

        (
            Self {
                remote: remote.to_string(),
                outgoing: Mutex::new(Some(to_remote)),
                incoming: AsyncMutex::new(from_remote),
                closed: closed.clone(),
            },
            Self {
                remote: local.to_string(),
                outgoing: Mutex::new(Some(to_local)),
                incoming: AsyncMutex::new(from_local),
                closed,
            },
        )
    }
}

#[async_trait]
impl<S: Suite> Connection<S> for ChannelConnection<S> {
    fn remote(&self) -> &PeerId {
        &self.remote
    }

    async fn put(&self, message: SigningMessage<S>) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::Closed(self.remote.clone()));
        }
        let outgoing = self.outgoing.lock().unwrap_or_else(PoisonError::into_inner);

        outgoing
            .as_ref()
            .ok_or_else(|| TransportError::Closed(self.remote.clone()))?
            .send(message)
            .map_err(|_| TransportError::Closed(self.remote.clone()))
    }

    async fn get(&self) -> Result<SigningMessage<S>, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut incoming = self.incoming.lock().await;

        // Messages queued before the link was closed are still delivered.
        tokio::select! {
            biased;
            message = incoming.recv() => {
                message.ok_or_else(|| TransportError::Closed(self.remote.clone()))
            }
            _ = closed.wait_for(|closed| *closed) => Err(TransportError::Closed(self.remote.clone())),
        }
    }

    async fn close(&self) {
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.closed.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use cosi_crypto::Ristretto255;

    use crate::messages::MessagePayload;

    use super::*;

    fn message(round_nbr: u64) -> SigningMessage<Ristretto255> {
        SigningMessage {
            view_nbr: 0,
            round_nbr,
            last_seen_vote: 0,
            payload: MessagePayload::CloseAll,
        }
    }

    #[tokio::test]
    async fn messages_are_delivered_in_order_in_both_directions() {
        let network = ChannelNetwork::<Ristretto255>::new();
        let alice = network.endpoint("alice");
        let bob = network.endpoint("bob");

        let to_bob = alice.connect(&"bob".to_string()).await.unwrap();
        let from_alice = bob.accept().await.unwrap();
        assert_eq!(from_alice.remote(), "alice");

        to_bob.put(message(1)).await.unwrap();
        to_bob.put(message(2)).await.unwrap();
        from_alice.put(message(3)).await.unwrap();

        assert_eq!(from_alice.get().await.unwrap().round_nbr, 1);
        assert_eq!(from_alice.get().await.unwrap().round_nbr, 2);
        assert_eq!(to_bob.get().await.unwrap().round_nbr, 3);
    }

    #[tokio::test]
    async fn unknown_peer_is_unreachable() {
        let network = ChannelNetwork::<Ristretto255>::new();
        let alice = network.endpoint("alice");

        let result = alice.connect(&"nobody".to_string()).await;

        assert_eq!(
            result.err(),
            Some(TransportError::Unreachable("nobody".to_string()))
        );
    }

    #[tokio::test]
    async fn closing_one_end_closes_the_link_after_pending_messages() {
        let network = ChannelNetwork::<Ristretto255>::new();
        let alice = network.endpoint("alice");
        let bob = network.endpoint("bob");
        let to_bob = alice.connect(&"bob".to_string()).await.unwrap();
        let from_alice = bob.accept().await.unwrap();

        to_bob.put(message(1)).await.unwrap();
        to_bob.close().await;

        assert_eq!(from_alice.get().await.unwrap().round_nbr, 1);
        assert_eq!(
            from_alice.get().await.err(),
            Some(TransportError::Closed("alice".to_string()))
        );
        assert!(from_alice.put(message(2)).await.is_err());
    }

    #[tokio::test]
    async fn closed_transport_stops_accepting() {
        let network = ChannelNetwork::<Ristretto255>::new();
        let alice = network.endpoint("alice");
        let bob = network.endpoint("bob");

        bob.close().await;

        assert!(bob.accept().await.is_err());
        assert_eq!(
            alice.connect(&"bob".to_string()).await.err(),
            Some(TransportError::Unreachable("bob".to_string()))
        );
    }
}
