//! Topology registry
//!
//! Holds the neighbor map most recently sent by the harness.

use murmur_protocol::Topology;
use tokio::sync::RwLock;

/// Latest adjacency map. Every `replace` discards the previous map entirely.
#[derive(Debug, Default)]
pub struct TopologyRegistry {
    current: RwLock<Current>,
}

#[derive(Debug, Default)]
struct Current {
    topology: Topology,
    /// Bumped on every `replace`; 0 until the first topology arrives.
    generation: u64,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new adjacency map.
    pub async fn replace(&self, topology: Topology) {
        let mut current = self.current.write().await;
        current.topology = topology;
        current.generation += 1;
    }

    /// Neighbors recorded for `node_id`, or `None` if the current map has no
    /// entry for it.
    pub async fn neighbors_of(&self, node_id: &str) -> Option<Vec<String>> {
        self.lookup(node_id).await.0
    }

    /// Like [`neighbors_of`](Self::neighbors_of), together with the generation
    /// of the map the answer came from.
    pub async fn lookup(&self, node_id: &str) -> (Option<Vec<String>>, u64) {
        let current = self.current.read().await;
        (current.topology.get(node_id).cloned(), current.generation)
    }

    pub async fn generation(&self) -> u64 {
        self.current.read().await.generation
    }

    /// Number of nodes with an entry in the current map.
    pub async fn node_count(&self) -> usize {
        self.current.read().await.topology.len()
    }
}
