//! relaychat Command-Line Client
//!
//! Connects to a relay server, registers a handle, then multiplexes the
//! terminal prompt with inbound traffic. Exits 0 when the server closes
//! the connection or stdin reaches EOF; exits 1 when registration fails.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

use relaychat_core::protocol::{recv_pdu, send_pdu};
use relaychat_core::{Handle, Message, MAX_HANDLE_LEN, MAX_PAYLOAD_LEN};

mod commands;
mod session;

use session::Session;

/// relaychat terminal client
#[derive(Parser)]
#[command(name = "chat-client")]
#[command(author, version, about)]
struct Args {
    /// Handle to register with the server
    handle: String,

    /// Server host name or address
    host: String,

    /// Server port
    port: u16,

    /// Decorative client id, shown only in the greeting
    client_id: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging. Diagnostics go to stderr so the prompt and
    // message output stay clean.
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if args.handle.len() > MAX_HANDLE_LEN {
        eprintln!(
            "Invalid handle, handle longer than {MAX_HANDLE_LEN} characters: {}",
            args.handle
        );
        std::process::exit(1);
    }
    let handle = match Handle::new(args.handle) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let mut stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;

    print!(
        "Connected to Server {} on Port {} as Client {}",
        args.host, args.port, handle
    );
    match args.client_id {
        Some(id) => println!(" (ID {id})"),
        None => println!(),
    }

    register(&mut stream, &handle).await;

    Session::new(handle, stream).run().await
}

/// Registration handshake: send flag 1, block for the verdict. Every
/// failure path exits 1 before the prompt ever appears.
async fn register(stream: &mut TcpStream, handle: &Handle) {
    let request = Message::Register {
        handle: handle.clone(),
    }
    .encode();
    let response = match send_pdu(stream, &request).await {
        Ok(()) => recv_pdu(stream, MAX_PAYLOAD_LEN).await,
        Err(err) => Err(err),
    };

    let payload = match response {
        Ok(Some(payload)) => payload,
        Ok(None) | Err(_) => {
            eprintln!("No response from server during registration.");
            std::process::exit(1);
        }
    };

    match Message::decode(&payload) {
        Ok(Message::RegisterAck) => {}
        Ok(Message::RegisterNak) => {
            eprintln!("Handle already in use: {handle}");
            std::process::exit(1);
        }
        _ => {
            eprintln!("Unknown registration response flag: {}", payload[0]);
            std::process::exit(1);
        }
    }
}
