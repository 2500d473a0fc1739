use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;
use commands::{execute_broadcast_command, execute_unique_ids_command, BroadcastArgs, UniqueIdsArgs};
use murmur_broadcast::{DeliveryMode, FanoutPolicy};

#[derive(Parser)]
#[command(name = "murmur")]
#[command(about = "Murmur - gossip broadcast nodes for simulated clusters")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a broadcast node on stdin/stdout
    Broadcast(BroadcastCommandArgs),
    /// Run a unique-id node on stdin/stdout
    UniqueIds(UniqueIdsCommandArgs),
}

#[derive(Args)]
pub struct BroadcastCommandArgs {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Fan-out policy: topology or flood
    #[arg(long)]
    pub fanout: Option<FanoutPolicy>,
    /// Delivery mode: acknowledged or fire-and-forget
    #[arg(long)]
    pub delivery: Option<DeliveryMode>,
    /// Delay after the first failed delivery attempt (ms)
    #[arg(long)]
    pub retry_initial_ms: Option<u64>,
    /// Maximum delay between delivery attempts (ms)
    #[arg(long)]
    pub retry_max_ms: Option<u64>,
    /// How long to wait for a peer's reply (ms)
    #[arg(long)]
    pub rpc_timeout_ms: Option<u64>,
}

#[derive(Args)]
pub struct UniqueIdsCommandArgs {}

/// Log to stderr; stdout carries the protocol.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("murmur=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result: Result<()> = match cli.command {
        Commands::Broadcast(args) => {
            let broadcast_args = BroadcastArgs {
                config: args.config,
                fanout: args.fanout,
                delivery: args.delivery,
                retry_initial_ms: args.retry_initial_ms,
                retry_max_ms: args.retry_max_ms,
                rpc_timeout_ms: args.rpc_timeout_ms,
            };
            execute_broadcast_command(broadcast_args).await
        }
        Commands::UniqueIds(_) => execute_unique_ids_command(UniqueIdsArgs::default()).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
