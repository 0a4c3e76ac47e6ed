//! Point to point transport used by the nodes.
//!
//! The protocol engine only relies on reliable, ordered, connection oriented links. The byte
//! encoding and the sockets are left to the implementations.

mod channel;

pub use channel::{ChannelNetwork, ChannelTransport};

use std::sync::Arc;

use async_trait::async_trait;
use cosi_crypto::Suite;
use thiserror::Error;

use crate::{PeerId, messages::SigningMessage};

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection or the transport was closed
    #[error("Connection with '{0}' is closed")]
    Closed(PeerId),

    /// No endpoint listens under this identity
    #[error("Peer '{0}' is unreachable")]
    Unreachable(PeerId),
}

/// Reliable ordered link with one peer.
#[async_trait]
pub trait Connection<S: Suite>: Send + Sync {
    /// Identity of the peer
    fn remote(&self) -> &PeerId;

    /// Send a message to the peer.
    async fn put(&self, message: SigningMessage<S>) -> Result<(), TransportError>;

    /// Wait for the next message of the peer.
    async fn get(&self) -> Result<SigningMessage<S>, TransportError>;

    /// Close both directions of the link.
    async fn close(&self);
}

/// Endpoint of a node.
#[async_trait]
pub trait Transport<S: Suite>: Send + Sync {
    /// Identity of this endpoint
    fn local(&self) -> &PeerId;

    /// Open a connection with `peer`.
    async fn connect(&self, peer: &PeerId) -> Result<Arc<dyn Connection<S>>, TransportError>;

    /// Wait for the next connection opened by a peer.
    async fn accept(&self) -> Result<Arc<dyn Connection<S>>, TransportError>;

    /// Stop accepting connections.
    async fn close(&self);
}
