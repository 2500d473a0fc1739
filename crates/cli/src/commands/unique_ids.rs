//! Unique ID command implementation
//!
//! This module implements the `murmur unique-ids` command, a node that only
//! answers `generate` requests.

use anyhow::{Context, Result};
use murmur_broadcast::{run, RuntimeConfig, UniqueIds};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::cancel_on_signal;

/// Arguments for the unique-ids command
#[derive(Debug, Default)]
pub struct UniqueIdsArgs {}

/// Execute the unique-ids command
///
/// The node never issues RPCs, so the runtime defaults are used as is.
pub async fn execute_unique_ids_command(_args: UniqueIdsArgs) -> Result<()> {
    let config = RuntimeConfig::default();

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    info!("Starting unique-id node");
    run(config, |_, _| UniqueIds::new(), shutdown)
        .await
        .context("Unique-id node failed")?;
    info!("Unique-id node stopped");
    Ok(())
}
