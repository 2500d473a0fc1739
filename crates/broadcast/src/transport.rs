//! Transport abstraction
//!
//! The broadcast engine only needs to know who it is, who else is in the
//! cluster, and how to reach a peer. Anything that can do that (the stdio
//! transport in production, an in-memory network in tests) implements
//! [`Transport`].

use async_trait::async_trait;
use murmur_protocol::{Payload, ProtocolError};

/// Node-to-node messaging used by the propagation engine.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identifier of this node, fixed for the process lifetime.
    fn node_id(&self) -> &str;

    /// Every node in the cluster, including this one.
    fn node_ids(&self) -> &[String];

    /// Send `payload` to `dest` without expecting a reply.
    ///
    /// Only fails if the message could not be handed to the network.
    async fn send(&self, dest: &str, payload: Payload) -> Result<(), ProtocolError>;

    /// Send `payload` to `dest` and wait for the correlated reply.
    ///
    /// An `error` reply from the peer is returned as
    /// [`ProtocolError::Remote`].
    async fn rpc(&self, dest: &str, payload: Payload) -> Result<Payload, ProtocolError>;
}
