//! Broadcast Node Module
//!
//! This module implements the request handlers of a broadcast node: accept
//! values from clients and peers, fan new ones out, answer reads, and track
//! the topology sent by the harness.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use murmur_protocol::{Payload, ProtocolError, Topology};

use crate::propagation::{PropagationConfig, PropagationEngine, StatsSnapshot};
use crate::runtime::{RuntimeConfig, Service};
use crate::store::SeenSet;
use crate::topology::TopologyRegistry;
use crate::transport::Transport;

/// Configuration for a broadcast node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Transport and dispatch settings
    pub runtime: RuntimeConfig,
    /// Fan-out and retry settings
    pub propagation: PropagationConfig,
}

impl NodeConfig {
    /// Load a configuration file. Fields missing from the file keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// A node taking part in the broadcast.
pub struct BroadcastNode<T> {
    transport: Arc<T>,
    seen: SeenSet,
    topology: Arc<TopologyRegistry>,
    engine: PropagationEngine<T>,
}

impl<T: Transport> BroadcastNode<T> {
    pub fn new(transport: Arc<T>, config: PropagationConfig, shutdown: CancellationToken) -> Self {
        let topology = Arc::new(TopologyRegistry::new());
        let engine = PropagationEngine::new(transport.clone(), topology.clone(), config, shutdown);

        Self {
            transport,
            seen: SeenSet::new(),
            topology,
            engine,
        }
    }

    /// Accept `value` from `source`, fanning it out if it is new.
    ///
    /// Returns whether the value was new. Delivery to peers continues in the
    /// background after this returns.
    pub async fn broadcast(&self, value: i64, source: &str) -> bool {
        if !self.seen.observe(value).await {
            debug!(value, src = %source, "Already seen");
            return false;
        }

        let targets = self.engine.propagate(value, Some(source)).await;
        debug!(value, src = %source, fanout = targets.len(), "New value");
        true
    }

    /// Every value this node has seen.
    pub async fn read(&self) -> Vec<i64> {
        self.seen.snapshot().await
    }

    pub async fn set_topology(&self, topology: Topology) {
        let neighbors = topology.get(self.transport.node_id()).cloned();
        self.topology.replace(topology).await;
        info!(node = %self.transport.node_id(), neighbors = ?neighbors, "Topology updated");
    }

    pub async fn neighbors(&self) -> Option<Vec<String>> {
        self.topology.neighbors_of(self.transport.node_id()).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats()
    }
}

#[async_trait]
impl<T: Transport> Service for BroadcastNode<T> {
    async fn handle(&self, src: &str, payload: Payload) -> Result<Payload, ProtocolError> {
        match payload {
            Payload::Broadcast { message } => {
                self.broadcast(message, src).await;
                Ok(Payload::BroadcastOk)
            }
            Payload::Read => Ok(Payload::ReadOk {
                messages: self.read().await,
            }),
            Payload::Topology { topology } => {
                self.set_topology(topology).await;
                Ok(Payload::TopologyOk)
            }
            other => Err(ProtocolError::NotSupported {
                kind: other.kind().to_string(),
            }),
        }
    }
}
