//! relaychat Relay Server
//!
//! Central relay for the flag-tagged chat protocol: accepts client
//! connections, arbitrates handle registration, and routes unicast,
//! multicast, and broadcast messages between registered clients. The
//! server validates and forwards; it never synthesizes message content.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use relaychat_server::engine::Server;

/// relaychat relay server
#[derive(Parser)]
#[command(name = "chat-server")]
#[command(author, version, about)]
struct Args {
    /// Port to listen on (0 lets the OS assign one)
    #[arg(default_value_t = 0)]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let server = Server::bind(args.port).await?;
    tracing::info!(address = %server.local_addr()?, "chat server listening");

    server.run().await
}
