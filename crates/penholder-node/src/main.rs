//! Penholder peer binary.
//!
//! # Usage
//!
//! ```bash
//! # Host a session
//! penholder host --user alice --bind 0.0.0.0:7420
//!
//! # Join it from another machine
//! penholder join --user bob --address 10.0.0.5:7420
//!
//! # Coordinate through a shared directory instead
//! penholder lock --user carol --root /mnt/shared/project
//! ```

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use penholder_node::{LockConfig, NodeConfig, NodeRole};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Single-writer collaboration peer
#[derive(Parser, Debug)]
#[command(name = "penholder")]
#[command(about = "Single-writer token coordination for shared editing sessions")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Host a session and wait for guests
    Host {
        /// Display name
        #[arg(short, long)]
        user: String,

        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:7420")]
        bind: String,

        /// Seconds between repeated violation warnings per document
        #[arg(long, default_value = "2")]
        warn_interval: u64,
    },

    /// Join a hosted session
    Join {
        /// Display name
        #[arg(short, long)]
        user: String,

        /// Host address
        #[arg(short, long)]
        address: String,

        /// Seconds to wait for the host to admit us
        #[arg(long, default_value = "10")]
        join_timeout: u64,

        /// Seconds between repeated violation warnings per document
        #[arg(long, default_value = "2")]
        warn_interval: u64,
    },

    /// Coordinate through a lock file in a shared directory
    Lock {
        /// Display name
        #[arg(short, long)]
        user: String,

        /// Shared directory
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Milliseconds between lock file polls
        #[arg(long, default_value = "500")]
        poll_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    match args.mode {
        Mode::Host { user, bind, warn_interval } => {
            tracing::info!(%user, %bind, "hosting");
            let mut config =
                NodeConfig { username: user, role: NodeRole::Host { bind }, ..Default::default() };
            config.enforcement.warning_interval = Duration::from_secs(warn_interval);
            penholder_node::run_node(config).await?;
        },
        Mode::Join { user, address, join_timeout, warn_interval } => {
            tracing::info!(%user, %address, "joining");
            let mut config =
                NodeConfig { username: user, role: NodeRole::Join { address }, ..Default::default() };
            config.coordinator.join_timeout = Duration::from_secs(join_timeout);
            config.enforcement.warning_interval = Duration::from_secs(warn_interval);
            penholder_node::run_node(config).await?;
        },
        Mode::Lock { user, root, poll_ms } => {
            tracing::info!(%user, root = %root.display(), "lock mode");
            let mut config = LockConfig { username: user, root, ..Default::default() };
            config.watcher.poll_interval = Duration::from_millis(poll_ms);
            penholder_node::run_lock(config).await?;
        },
    }

    Ok(())
}
