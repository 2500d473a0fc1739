//! In-memory network for tests.
//!
//! Every node gets a [`SimTransport`]; RPCs are answered by calling the
//! destination's [`Service`] directly. Messages can be dropped by budget or by
//! directional partition, and local sends can be made to fail.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use murmur_protocol::{Payload, ProtocolError};

use crate::runtime::Service;
use crate::transport::Transport;

/// Shared state of the simulated cluster.
pub struct SimNetwork {
    node_ids: Vec<String>,
    services: Mutex<HashMap<String, Arc<dyn Service>>>,
    partitions: Mutex<HashSet<(String, String)>>,
    drop_budget: AtomicUsize,
    send_failures: AtomicUsize,
    delivered: Mutex<Vec<(String, String, Payload)>>,
}

impl SimNetwork {
    pub fn new(node_ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            node_ids: node_ids.iter().map(|id| id.to_string()).collect(),
            services: Mutex::new(HashMap::new()),
            partitions: Mutex::new(HashSet::new()),
            drop_budget: AtomicUsize::new(0),
            send_failures: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn node_ids(&self) -> &[String] {
        &self.node_ids
    }

    pub fn transport(self: &Arc<Self>, node_id: &str) -> Arc<SimTransport> {
        Arc::new(SimTransport {
            node_id: node_id.to_string(),
            network: self.clone(),
        })
    }

    pub fn register(&self, node_id: &str, service: Arc<dyn Service>) {
        self.services
            .lock()
            .unwrap()
            .insert(node_id.to_string(), service);
    }

    /// Drop the next `count` messages, whatever their route.
    pub fn drop_first(&self, count: usize) {
        self.drop_budget.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` local `send` calls with `TransportClosed`.
    pub fn fail_sends(&self, count: usize) {
        self.send_failures.store(count, Ordering::SeqCst);
    }

    fn take_send_failure(&self) -> bool {
        self.send_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Drop everything sent from `from` to `to`.
    pub fn partition(&self, from: &str, to: &str) {
        self.partitions
            .lock()
            .unwrap()
            .insert((from.to_string(), to.to_string()));
    }

    /// Payloads delivered to `dest`, in arrival order.
    pub fn sent_to(&self, dest: &str) -> Vec<(String, Payload)> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, to, _)| to == dest)
            .map(|(from, _, payload)| (from.clone(), payload.clone()))
            .collect()
    }

    /// Payloads delivered from `src`, in arrival order.
    pub fn sent_from(&self, src: &str) -> Vec<(String, Payload)> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(from, _, _)| from == src)
            .map(|(_, to, payload)| (to.clone(), payload.clone()))
            .collect()
    }

    fn should_drop(&self, src: &str, dest: &str) -> bool {
        if self
            .partitions
            .lock()
            .unwrap()
            .contains(&(src.to_string(), dest.to_string()))
        {
            return true;
        }
        self.drop_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn deliver(&self, src: &str, dest: &str, payload: Payload) -> Result<Payload, ProtocolError> {
        if self.should_drop(src, dest) {
            return Err(ProtocolError::Timeout {
                dest: dest.to_string(),
            });
        }

        let service = self.services.lock().unwrap().get(dest).cloned();
        let Some(service) = service else {
            return Err(ProtocolError::Timeout {
                dest: dest.to_string(),
            });
        };

        self.delivered
            .lock()
            .unwrap()
            .push((src.to_string(), dest.to_string(), payload.clone()));

        match service.handle(src, payload).await {
            Ok(Payload::Error { code, text }) => Err(ProtocolError::Remote {
                dest: dest.to_string(),
                code,
                text,
            }),
            Ok(reply) => Ok(reply),
            Err(e) => Err(ProtocolError::Remote {
                dest: dest.to_string(),
                code: e.code().as_u32(),
                text: e.to_string(),
            }),
        }
    }
}

/// One node's view of a [`SimNetwork`].
pub struct SimTransport {
    node_id: String,
    network: Arc<SimNetwork>,
}

#[async_trait]
impl Transport for SimTransport {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_ids(&self) -> &[String] {
        self.network.node_ids()
    }

    async fn send(&self, dest: &str, payload: Payload) -> Result<(), ProtocolError> {
        if self.network.take_send_failure() {
            return Err(ProtocolError::TransportClosed);
        }
        let network = self.network.clone();
        let src = self.node_id.clone();
        let dest = dest.to_string();
        tokio::spawn(async move {
            let _ = network.deliver(&src, &dest, payload).await;
        });
        Ok(())
    }

    async fn rpc(&self, dest: &str, payload: Payload) -> Result<Payload, ProtocolError> {
        self.network.deliver(&self.node_id, dest, payload).await
    }
}

/// Peer stand-in that records broadcast values and acknowledges them.
#[derive(Default)]
pub struct AckService {
    received: Mutex<Vec<i64>>,
    wrong_replies: AtomicUsize,
}

impl AckService {
    pub fn register(network: &SimNetwork, node_id: &str) -> Arc<Self> {
        let service = Arc::new(Self::default());
        network.register(node_id, service.clone());
        service
    }

    /// Answer the next `count` broadcasts with the wrong reply type.
    pub fn reply_wrong_type(&self, count: usize) {
        self.wrong_replies.store(count, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<i64> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Service for AckService {
    async fn handle(&self, _src: &str, payload: Payload) -> Result<Payload, ProtocolError> {
        match payload {
            Payload::Broadcast { message } => {
                self.received.lock().unwrap().push(message);
                let wrong = self
                    .wrong_replies
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if wrong {
                    Ok(Payload::TopologyOk)
                } else {
                    Ok(Payload::BroadcastOk)
                }
            }
            other => Err(ProtocolError::NotSupported {
                kind: other.kind().to_string(),
            }),
        }
    }
}

/// Wait until `done` holds, failing the test after five seconds.
pub async fn settle(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

/// Async variant of [`settle`].
pub async fn settle_async<F, Fut>(mut done: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done().await {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}
