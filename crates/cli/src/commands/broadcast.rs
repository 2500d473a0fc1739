//! Broadcast command implementation
//!
//! This module implements the `murmur broadcast` command, which runs a
//! broadcast node on stdin/stdout.

use anyhow::{Context, Result};
use murmur_broadcast::{run, BroadcastNode, DeliveryMode, FanoutPolicy, NodeConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::cancel_on_signal;

/// Arguments for the broadcast command
#[derive(Debug, Default)]
pub struct BroadcastArgs {
    /// JSON configuration file
    pub config: Option<PathBuf>,
    /// Fan-out policy override
    pub fanout: Option<FanoutPolicy>,
    /// Delivery mode override
    pub delivery: Option<DeliveryMode>,
    /// Initial retry delay override (milliseconds)
    pub retry_initial_ms: Option<u64>,
    /// Maximum retry delay override (milliseconds)
    pub retry_max_ms: Option<u64>,
    /// RPC timeout override (milliseconds)
    pub rpc_timeout_ms: Option<u64>,
}

/// Build the node configuration: defaults, then the config file, then flags.
pub fn resolve_config(args: &BroadcastArgs) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };

    if let Some(fanout) = args.fanout {
        config.propagation.fanout = fanout;
    }
    if let Some(delivery) = args.delivery {
        config.propagation.delivery = delivery;
    }
    if let Some(ms) = args.retry_initial_ms {
        config.propagation.retry_initial_ms = ms;
    }
    if let Some(ms) = args.retry_max_ms {
        config.propagation.retry_max_ms = ms;
    }
    if let Some(ms) = args.rpc_timeout_ms {
        config.runtime.rpc_timeout_ms = ms;
    }

    if config.propagation.retry_initial_ms > config.propagation.retry_max_ms {
        anyhow::bail!(
            "retry_initial_ms ({}) must not exceed retry_max_ms ({})",
            config.propagation.retry_initial_ms,
            config.propagation.retry_max_ms
        );
    }

    Ok(config)
}

/// Execute the broadcast command
pub async fn execute_broadcast_command(args: BroadcastArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    info!(
        fanout = %config.propagation.fanout,
        delivery = %config.propagation.delivery,
        retry_initial_ms = config.propagation.retry_initial_ms,
        retry_max_ms = config.propagation.retry_max_ms,
        rpc_timeout_ms = config.runtime.rpc_timeout_ms,
        "Starting broadcast node"
    );

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let propagation = config.propagation.clone();
    run(
        config.runtime,
        move |transport, shutdown| BroadcastNode::new(transport, propagation, shutdown),
        shutdown,
    )
    .await
    .context("Broadcast node failed")?;

    info!("Broadcast node stopped");
    Ok(())
}
