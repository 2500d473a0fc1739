//! Node runtime
//!
//! Reads envelopes from the input stream, performs the `init` handshake, routes
//! replies back to pending RPCs, and runs every request on its own task against
//! a [`Service`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use murmur_protocol::{Envelope, Payload, ProtocolError, RawEnvelope};

use crate::stdio::{spawn_writer, Outbox, StdioTransport};

/// Request handling for one kind of node.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Answer a request from `src`. An error is sent back as an `error` body.
    async fn handle(&self, src: &str, payload: Payload) -> Result<Payload, ProtocolError>;
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long an outbound RPC waits for its reply (milliseconds)
    pub rpc_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 1000,
        }
    }
}

impl RuntimeConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Run a node on stdin/stdout until input closes or `shutdown` fires.
pub async fn run<S, F>(
    config: RuntimeConfig,
    make_service: F,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: Service,
    F: FnOnce(Arc<StdioTransport>, CancellationToken) -> S,
{
    let input = BufReader::new(tokio::io::stdin());
    run_with_io(input, tokio::io::stdout(), config, make_service, shutdown).await
}

/// Run a node over arbitrary streams.
///
/// `make_service` is called once, when `init` arrives.
pub async fn run_with_io<R, W, S, F>(
    input: R,
    output: W,
    config: RuntimeConfig,
    make_service: F,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    S: Service,
    F: FnOnce(Arc<StdioTransport>, CancellationToken) -> S,
{
    let (outbox, mut writer) = spawn_writer(output);
    let mut lines = input.lines();
    let mut make_service = Some(make_service);
    let mut node: Option<(Arc<StdioTransport>, Arc<S>)> = None;

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested");
                break;
            }
            line = lines.next_line() => line.context("Failed to read input")?,
            // The loop holds an outbox, so the writer only stops early on failure.
            result = &mut writer => {
                shutdown.cancel();
                error!("Output stream closed, stopping node");
                result.context("Writer task panicked")?.context("Writer task failed")?;
                anyhow::bail!("Writer task stopped unexpectedly");
            }
        };

        let Some(line) = line else {
            info!("Input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let raw: RawEnvelope = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable line");
                continue;
            }
        };

        if let Some(in_reply_to) = raw.in_reply_to() {
            match &node {
                Some((transport, _)) => transport.resolve(in_reply_to, raw).await,
                None => debug!(in_reply_to, "Dropping reply received before init"),
            }
            continue;
        }

        let request = match raw.clone().decode() {
            Ok(request) => request,
            Err(e) => {
                warn!(src = %raw.src, error = %e, "Rejecting malformed request");
                if raw.msg_id().is_some() {
                    send_or_log(&outbox, raw.reply_error(&e));
                }
                continue;
            }
        };

        match (&node, &request.body.payload) {
            (None, Payload::Init { node_id, node_ids }) => {
                let transport = Arc::new(StdioTransport::new(
                    node_id.clone(),
                    node_ids.clone(),
                    outbox.clone(),
                    config.rpc_timeout(),
                ));
                let Some(make_service) = make_service.take() else {
                    break;
                };
                let service = Arc::new(make_service(transport.clone(), shutdown.clone()));
                info!(node = %node_id, peers = node_ids.len(), "Node initialized");

                if let Err(e) = transport.reply(&request, Payload::InitOk) {
                    error!(error = %e, "Failed to acknowledge init");
                }
                node = Some((transport, service));
            }
            (Some((transport, _)), Payload::Init { .. }) => {
                warn!("Ignoring repeated init");
                if let Err(e) = transport.reply(&request, Payload::InitOk) {
                    error!(error = %e, "Failed to acknowledge init");
                }
            }
            (None, _) => {
                if request.body.msg_id.is_some() {
                    let reply = request.reply(Payload::error(&ProtocolError::NotInitialized));
                    send_or_log(&outbox, reply);
                }
            }
            (Some((transport, service)), _) => {
                tokio::spawn(dispatch(transport.clone(), service.clone(), request));
            }
        }
    }

    shutdown.cancel();
    drop(node);
    drop(outbox);

    writer.await.context("Writer task panicked")?
}

async fn dispatch<S: Service>(transport: Arc<StdioTransport>, service: Arc<S>, request: Envelope) {
    let kind = request.body.payload.kind();
    debug!(src = %request.src, kind, msg_id = ?request.body.msg_id, "Handling request");

    // Only bodies with a msg_id expect an answer; replying to anything else
    // would bounce acknowledgments between nodes.
    let wants_reply = request.body.msg_id.is_some();

    let payload = match service
        .handle(&request.src, request.body.payload.clone())
        .await
    {
        Ok(payload) => payload,
        Err(e) => {
            warn!(src = %request.src, kind, error = %e, "Request failed");
            Payload::error(&e)
        }
    };

    if wants_reply {
        if let Err(e) = transport.reply(&request, payload) {
            error!(error = %e, "Failed to send reply");
        }
    }
}

fn send_or_log(outbox: &Outbox, envelope: Envelope) {
    if outbox.send(envelope).is_err() {
        error!("Output closed, dropping message");
    }
}
