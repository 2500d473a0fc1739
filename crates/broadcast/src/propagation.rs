//! Propagation Engine Module
//!
//! This module fans newly observed values out to peer nodes. Every
//! destination gets its own delivery task, which keeps retrying with capped
//! exponential backoff until the peer acknowledges the value or the node
//! shuts down.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use murmur_protocol::{Payload, ProtocolError};

use crate::topology::TopologyRegistry;
use crate::transport::Transport;

/// Which peers a new value is forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutPolicy {
    /// Forward to this node's neighbors in the latest topology
    #[default]
    Topology,
    /// Forward to every known node
    Flood,
}

/// How a single delivery is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// RPC the peer and retry until it answers `broadcast_ok`
    #[default]
    Acknowledged,
    /// Send once; retry only if the local send fails
    FireAndForget,
}

impl FromStr for FanoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topology" => Ok(FanoutPolicy::Topology),
            "flood" => Ok(FanoutPolicy::Flood),
            other => Err(format!(
                "unknown fan-out policy '{}', expected 'topology' or 'flood'",
                other
            )),
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acknowledged" | "ack" => Ok(DeliveryMode::Acknowledged),
            "fire-and-forget" | "fire_and_forget" => Ok(DeliveryMode::FireAndForget),
            other => Err(format!(
                "unknown delivery mode '{}', expected 'acknowledged' or 'fire-and-forget'",
                other
            )),
        }
    }
}

impl fmt::Display for FanoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanoutPolicy::Topology => write!(f, "topology"),
            FanoutPolicy::Flood => write!(f, "flood"),
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Acknowledged => write!(f, "acknowledged"),
            DeliveryMode::FireAndForget => write!(f, "fire-and-forget"),
        }
    }
}

/// Configuration for the propagation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Fan-out target selection
    pub fanout: FanoutPolicy,
    /// Delivery confirmation mode
    pub delivery: DeliveryMode,
    /// Delay after the first failed attempt (milliseconds)
    pub retry_initial_ms: u64,
    /// Upper bound on the delay between attempts (milliseconds)
    pub retry_max_ms: u64,
    /// Factor applied to the delay after every failed attempt
    pub retry_multiplier: u32,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            fanout: FanoutPolicy::Topology,
            delivery: DeliveryMode::Acknowledged,
            retry_initial_ms: 50,
            retry_max_ms: 2000,
            retry_multiplier: 2,
        }
    }
}

/// Smallest delay between attempts after the first retry.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Capped exponential backoff. There is no attempt limit.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: u32,
}

impl Backoff {
    pub fn new(config: &PropagationConfig) -> Self {
        let max = Duration::from_millis(config.retry_max_ms).max(MIN_RETRY_DELAY);
        Self {
            next: Duration::from_millis(config.retry_initial_ms).min(max),
            max,
            multiplier: config.retry_multiplier.max(1),
        }
    }

    /// Delay to wait before the next attempt.
    ///
    /// A zero initial delay is used once; growth then starts from
    /// [`MIN_RETRY_DELAY`] so retries never spin.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = if delay.is_zero() {
            MIN_RETRY_DELAY
        } else {
            delay.saturating_mul(self.multiplier).min(self.max)
        };
        delay
    }
}

/// Counters for monitoring propagation.
#[derive(Debug, Default)]
pub struct PropagationStats {
    launched: AtomicU64,
    in_flight: AtomicU64,
    delivered: AtomicU64,
    failed_attempts: AtomicU64,
}

/// Point-in-time copy of [`PropagationStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Delivery tasks started
    pub launched: u64,
    /// Delivery tasks still retrying
    pub in_flight: u64,
    /// Deliveries confirmed
    pub delivered: u64,
    /// Attempts that failed and were retried
    pub failed_attempts: u64,
}

impl PropagationStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            launched: self.launched.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
        }
    }
}

/// How a delivery task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Fans values out to peers over a [`Transport`].
pub struct PropagationEngine<T> {
    transport: Arc<T>,
    topology: Arc<TopologyRegistry>,
    config: PropagationConfig,
    stats: Arc<PropagationStats>,
    shutdown: CancellationToken,
    /// Topology generation in which the missing-entry fallback was last reported.
    fallback_reported: AtomicU64,
}

impl<T: Transport> PropagationEngine<T> {
    pub fn new(
        transport: Arc<T>,
        topology: Arc<TopologyRegistry>,
        config: PropagationConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            topology,
            config,
            stats: Arc::new(PropagationStats::default()),
            shutdown,
            fallback_reported: AtomicU64::new(u64::MAX),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Destinations for a value that arrived from `exclude`.
    ///
    /// Never contains this node or `exclude`, and lists each peer once.
    pub async fn fanout_targets(&self, exclude: Option<&str>) -> Vec<String> {
        let self_id = self.transport.node_id();

        let candidates = match self.config.fanout {
            FanoutPolicy::Flood => self.transport.node_ids().to_vec(),
            FanoutPolicy::Topology => match self.topology.lookup(self_id).await {
                (Some(neighbors), _) => neighbors,
                (None, generation) => {
                    if self.first_fallback_in(generation) {
                        warn!(node = %self_id, generation, "No topology entry for this node, flooding to all peers");
                    } else {
                        debug!(node = %self_id, generation, "No topology entry, flooding");
                    }
                    self.transport.node_ids().to_vec()
                }
            },
        };

        let mut targets: Vec<String> = Vec::with_capacity(candidates.len());
        for peer in candidates {
            if peer == self_id || Some(peer.as_str()) == exclude || targets.contains(&peer) {
                continue;
            }
            targets.push(peer);
        }
        targets
    }

    /// True the first time the fallback is taken for a given topology generation.
    fn first_fallback_in(&self, generation: u64) -> bool {
        self.fallback_reported.swap(generation, Ordering::Relaxed) != generation
    }

    /// Start one delivery task per fan-out target and return the targets.
    ///
    /// Returns as soon as the tasks are spawned; delivery continues in the
    /// background.
    pub async fn propagate(&self, value: i64, exclude: Option<&str>) -> Vec<String> {
        let targets = self.fanout_targets(exclude).await;
        debug!(value, targets = ?targets, "Propagating value");

        for dest in &targets {
            self.spawn_delivery(dest.clone(), value);
        }
        targets
    }

    fn spawn_delivery(&self, dest: String, value: i64) {
        self.stats.launched.fetch_add(1, Ordering::Relaxed);
        self.stats.in_flight.fetch_add(1, Ordering::Relaxed);

        let task = DeliveryTask {
            transport: self.transport.clone(),
            dest,
            value,
            mode: self.config.delivery,
            backoff: Backoff::new(&self.config),
            stats: self.stats.clone(),
            shutdown: self.shutdown.clone(),
        };
        tokio::spawn(task.run());
    }
}

/// Gets one value to one peer.
struct DeliveryTask<T> {
    transport: Arc<T>,
    dest: String,
    value: i64,
    mode: DeliveryMode,
    backoff: Backoff,
    stats: Arc<PropagationStats>,
    shutdown: CancellationToken,
}

impl<T: Transport> DeliveryTask<T> {
    async fn run(mut self) -> DeliveryOutcome {
        let outcome = self.retry_until_delivered().await;
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
        outcome
    }

    async fn retry_until_delivered(&mut self) -> DeliveryOutcome {
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return DeliveryOutcome::Cancelled { attempts },
                result = self.attempt() => result,
            };

            let err = match result {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(peer = %self.dest, value = self.value, attempts, "Delivered");
                    return DeliveryOutcome::Delivered { attempts };
                }
                Err(err) => err,
            };

            self.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
            let delay = self.backoff.next_delay();
            if attempts == 1 || attempts % 20 == 0 {
                warn!(peer = %self.dest, value = self.value, attempts, delay_ms = delay.as_millis() as u64, error = %err, "Delivery failed, retrying");
            } else {
                debug!(peer = %self.dest, value = self.value, attempts, delay_ms = delay.as_millis() as u64, error = %err, "Delivery failed, retrying");
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return DeliveryOutcome::Cancelled { attempts },
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self) -> Result<(), ProtocolError> {
        let payload = Payload::Broadcast {
            message: self.value,
        };

        match self.mode {
            DeliveryMode::FireAndForget => self.transport.send(&self.dest, payload).await,
            DeliveryMode::Acknowledged => match self.transport.rpc(&self.dest, payload).await? {
                Payload::BroadcastOk => Ok(()),
                other => Err(ProtocolError::UnexpectedReply {
                    dest: self.dest.clone(),
                    expected: "broadcast_ok",
                    actual: other.kind().to_string(),
                }),
            },
        }
    }
}
