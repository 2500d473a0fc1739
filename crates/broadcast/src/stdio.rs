//! Stdio transport
//!
//! Speaks the line-delimited JSON protocol on the process's standard streams.
//! Outbound envelopes go through a single writer task; RPC replies are matched
//! to their callers by `msg_id`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use murmur_protocol::{Body, Envelope, Payload, ProtocolError, RawEnvelope};

use crate::transport::Transport;

/// Handle for queueing envelopes onto the output stream.
pub type Outbox = mpsc::UnboundedSender<Envelope>;

type ReplySender = oneshot::Sender<Result<Payload, ProtocolError>>;

/// Spawn the task that serializes envelopes onto `writer`, one per line.
///
/// The task ends once every [`Outbox`] clone has been dropped.
pub fn spawn_writer<W>(mut writer: W) -> (Outbox, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, mut queue) = mpsc::unbounded_channel::<Envelope>();

    let handle = tokio::spawn(async move {
        while let Some(envelope) = queue.recv().await {
            let mut line = serde_json::to_vec(&envelope).context("Failed to encode envelope")?;
            line.push(b'\n');
            writer
                .write_all(&line)
                .await
                .context("Failed to write to output")?;
            writer.flush().await.context("Failed to flush output")?;
        }
        Ok(())
    });

    (outbox, handle)
}

/// [`Transport`] backed by the process's stdout, fed replies by the runtime.
pub struct StdioTransport {
    node_id: String,
    node_ids: Vec<String>,
    outbox: Outbox,
    next_msg_id: AtomicU64,
    pending: Mutex<HashMap<u64, ReplySender>>,
    rpc_timeout: Duration,
}

impl StdioTransport {
    pub fn new(
        node_id: String,
        node_ids: Vec<String>,
        outbox: Outbox,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            node_ids,
            outbox,
            next_msg_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            rpc_timeout,
        }
    }

    fn emit(&self, envelope: Envelope) -> Result<(), ProtocolError> {
        self.outbox
            .send(envelope)
            .map_err(|_| ProtocolError::TransportClosed)
    }

    fn envelope(&self, dest: &str, msg_id: Option<u64>, payload: Payload) -> Envelope {
        Envelope {
            src: self.node_id.clone(),
            dest: dest.to_string(),
            body: Body {
                msg_id,
                in_reply_to: None,
                payload,
            },
        }
    }

    /// Queue a reply to `request`.
    pub fn reply(&self, request: &Envelope, payload: Payload) -> Result<(), ProtocolError> {
        let mut reply = request.reply(payload);
        reply.body.msg_id = Some(self.next_msg_id.fetch_add(1, Ordering::Relaxed));
        self.emit(reply)
    }

    /// Hand an inbound reply to the RPC waiting on `in_reply_to`.
    ///
    /// Replies nobody is waiting for (late, or already timed out) are dropped.
    pub async fn resolve(&self, in_reply_to: u64, raw: RawEnvelope) {
        let Some(waiter) = self.pending.lock().await.remove(&in_reply_to) else {
            debug!(in_reply_to, src = %raw.src, "Dropping reply with no pending request");
            return;
        };

        let src = raw.src.clone();
        let result = raw.decode().and_then(|envelope| match envelope.body.payload {
            Payload::Error { code, text } => Err(ProtocolError::Remote {
                dest: src,
                code,
                text,
            }),
            payload => Ok(payload),
        });
        let _ = waiter.send(result);
    }

    /// Number of RPCs still waiting for a reply.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_ids(&self) -> &[String] {
        &self.node_ids
    }

    async fn send(&self, dest: &str, payload: Payload) -> Result<(), ProtocolError> {
        self.emit(self.envelope(dest, None, payload))
    }

    async fn rpc(&self, dest: &str, payload: Payload) -> Result<Payload, ProtocolError> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let (waiter, reply) = oneshot::channel();
        self.pending.lock().await.insert(msg_id, waiter);

        if let Err(e) = self.emit(self.envelope(dest, Some(msg_id), payload)) {
            self.pending.lock().await.remove(&msg_id);
            return Err(e);
        }

        match tokio::time::timeout(self.rpc_timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::TransportClosed),
            Err(_) => {
                self.pending.lock().await.remove(&msg_id);
                Err(ProtocolError::Timeout {
                    dest: dest.to_string(),
                })
            }
        }
    }
}
