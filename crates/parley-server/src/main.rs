//! Parley server binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port
//! parley-server
//!
//! # Custom address and limits
//! parley-server --bind 127.0.0.1:7000 --max-connections 100 --write-timeout-ms 2000
//! ```

use std::time::Duration;

use clap::Parser;
use parley_proto::DEFAULT_MAX_FRAME_SIZE;
use parley_server::{Server, ServerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley chat relay server
#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(about = "End-to-end encrypted chat relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:9001")]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Maximum frame size in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Per-write timeout in milliseconds
    #[arg(long, default_value = "10000")]
    write_timeout_ms: u64,

    /// Maximum username length in characters
    #[arg(long, default_value = "32")]
    max_username_len: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Parley server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerConfig {
        bind_address: args.bind,
        max_connections: args.max_connections,
        max_frame_size: args.max_frame_size,
        write_timeout: Duration::from_millis(args.write_timeout_ms),
        max_username_len: args.max_username_len,
    };

    let server = Server::bind(config).await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Ctrl-C received");
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
