//! TCP line-broadcast relay.
//!
//! Every line a connected peer sends is forwarded to all other connected
//! peers. Each connection carries independent upload and download byte
//! ceilings; crossing either one, or falling behind as a receiver, gets the
//! connection disconnected rather than ever stalling the relay.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                 LINE RELAY                   │
//!                    │                                              │
//!   Peer connects    │  ┌──────────┐      ┌────────────────────┐    │
//!   ─────────────────┼─▶│  accept  │─────▶│      registry      │    │
//!                    │  │   loop   │      │  (locked member    │    │
//!                    │  └──────────┘      │       map)         │    │
//!                    │                    └─────────┬──────────┘    │
//!                    │   per connection:            │ fan-out       │
//!                    │  ┌──────────┐                ▼               │
//!   Peer sends line  │  │ ingress  │──▶ upload cap ──▶ peers'       │
//!   ─────────────────┼─▶│   loop   │                  outbound      │
//!                    │  └──────────┘                  queues        │
//!                    │  ┌──────────┐                    │           │
//!   Peer receives    │  │  egress  │◀───────────────────┘           │
//!   ◀────────────────┼──│   loop   │──▶ download cap                │
//!                    │  └──────────┘                                │
//!                    │                                              │
//!                    │  cross-cutting: config, lifecycle, tracing   │
//!                    └──────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use line_relay::config::loader::load_config;
use line_relay::lifecycle::{signals, Shutdown};
use line_relay::{RelayConfig, RelayError, RelayServer};

#[derive(Parser)]
#[command(name = "line-relay")]
#[command(about = "TCP line-broadcast relay with per-connection byte limits", long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configured one (e.g. 127.0.0.1:9000).
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "line_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("line-relay v0.1.0 starting");

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listener.bind_address = listen;
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        byte_limit = config.limits.byte_limit,
        queue_capacity = config.limits.outbound_queue_capacity,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    signals::install(shutdown.clone());

    let server = RelayServer::bind(&config, shutdown).await?;

    match server.serve().await {
        Err(RelayError::ShuttingDown) => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
        Err(e) => Err(e.into()),
        Ok(()) => Ok(()),
    }
}
