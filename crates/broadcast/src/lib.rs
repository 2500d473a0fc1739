//! Flood-gossip broadcast node
//!
//! This crate implements a node that disseminates integer values to every
//! other node of a simulated cluster over an unreliable request/response
//! transport, together with the stdio runtime that hosts it.

pub mod ids;
pub mod node;
pub mod propagation;
pub mod runtime;
pub mod stdio;
pub mod store;
pub mod topology;
pub mod transport;

#[cfg(test)]
mod sim;

// Re-export key types
pub use ids::UniqueIds;
pub use node::{BroadcastNode, NodeConfig};
pub use propagation::{
    Backoff, DeliveryMode, FanoutPolicy, PropagationConfig, PropagationEngine, StatsSnapshot,
};
pub use runtime::{run, run_with_io, RuntimeConfig, Service};
pub use stdio::StdioTransport;
pub use store::SeenSet;
pub use topology::TopologyRegistry;
pub use transport::Transport;
