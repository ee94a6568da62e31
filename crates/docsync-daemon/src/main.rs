//! docsync-daemon: Headless document authority for note sync.
//!
//! Holds the canonical version of every (note, panel) document, enforces
//! compare-and-swap version progression on saves, and persists documents
//! to disk. Clients connect over WebSocket with `RemoteClient`.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use docsync_core::ClientId;
use docsync_daemon::authority::DocumentAuthority;
use docsync_daemon::message::StoreRequest;
use docsync_daemon::server::{ServerEvent, WebSocketServer};

#[derive(Parser, Debug)]
#[command(name = "docsync-daemon")]
#[command(about = "Document authority for note sync")]
struct Args {
    /// Path to the data directory
    #[arg(short, long)]
    data: PathBuf,

    /// Address to listen on for incoming connections
    #[arg(short, long, default_value = "127.0.0.1:9470")]
    listen: String,

    /// Server ID (generated if not provided)
    #[arg(long)]
    server_id: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,docsync_daemon=debug"
    } else {
        "info,docsync_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting docsync-daemon");
    info!("Data directory: {:?}", args.data);
    info!("Listen address: {}", args.listen);

    let server_id = args.server_id.unwrap_or_else(|| {
        let id = ClientId::generate().to_string();
        info!("Generated server ID: {}", id);
        id
    });

    let mut authority = DocumentAuthority::open(&args.data)?;
    info!("Authority loaded, {} document(s)", authority.document_count());

    let mut server = WebSocketServer::new(server_id);
    let listener = WebSocketServer::bind(&args.listen).await?;

    info!("Daemon running. Press Ctrl+C to stop.");

    // Main event loop
    loop {
        tokio::select! {
            // Accept new WebSocket connections
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        server.accept_connection(stream, addr).await;
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }

            // Handle server events (requests, hellos, closes)
            Some(event) = server.poll_event() => {
                match event {
                    ServerEvent::Request(request) => {
                        let client_id = request.conn_id;
                        let decoded = match StoreRequest::from_binary(&request.data) {
                            Ok(decoded) => decoded,
                            Err(e) => {
                                warn!("Undecodable request from {}: {}", client_id, e);
                                continue;
                            }
                        };
                        debug!("Request from {}: {:?}", client_id, decoded);

                        let response = authority.handle_request(decoded);
                        if let Err(e) = server.send(&client_id, &response.to_binary()).await {
                            error!("Failed to respond to {}: {}", client_id, e);
                        }
                    }
                    ServerEvent::ClientConnected { client_id } => {
                        info!("Client connected: {}", client_id);
                    }
                    ServerEvent::ClientDisconnected { client_id } => {
                        info!("Client disconnected: {}", client_id);
                    }
                }
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    Ok(())
}
