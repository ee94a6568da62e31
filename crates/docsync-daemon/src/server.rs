//! WebSocket server for accepting client connections.
//!
//! Manages connection lifecycle, client ID mapping, and response routing.
//! The hello lifecycle is encapsulated: callers only see `ServerEvent`s
//! with resolved client IDs via `poll_event()`.

use crate::connection::{ClientConnection, ConnectionEvent, IncomingRequest};
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info};

/// Event emitted by the server after the hello lifecycle is resolved.
/// Callers only see client IDs; connection IDs are an internal detail.
#[derive(Debug)]
pub enum ServerEvent {
    /// A client completed hello and is now connected.
    ClientConnected { client_id: String },
    /// A request from an identified client.
    Request(IncomingRequest),
    /// A previously-connected client disconnected.
    ClientDisconnected { client_id: String },
}

/// WebSocket server managing client connections.
pub struct WebSocketServer {
    /// Our session ID, sent in the server hello
    server_id: String,
    /// Pre-hello connections indexed by conn_id
    pending: HashMap<String, ClientConnection>,
    /// Post-hello clients indexed by client ID
    clients: HashMap<String, ClientConnection>,
    /// Map from conn_id to client ID (for resolving requests/closes)
    conn_id_to_client: HashMap<String, String>,
    /// Counter for generating connection IDs
    next_conn_id: u64,
    /// Channel sender for connection events (requests, hellos, closes)
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    /// Channel receiver for connection events
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl WebSocketServer {
    pub fn new(server_id: String) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            server_id,
            pending: HashMap::new(),
            clients: HashMap::new(),
            conn_id_to_client: HashMap::new(),
            next_conn_id: 1,
            event_tx,
            event_rx,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("WebSocket server listening on {}", listen_addr);
        Ok(listener)
    }

    /// Handle a new incoming TCP connection.
    ///
    /// Upgrades to WebSocket and sends our hello. The connection stays in
    /// the pending map until the client answers with its own hello.
    pub async fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                // Health checks (like `nc -z`) connect and immediately close
                // without completing the WebSocket handshake. Log these as
                // debug, not error.
                let err_str = e.to_string();
                if err_str.contains("Handshake not finished")
                    || err_str.contains("Connection reset")
                    || err_str.contains("unexpected EOF")
                {
                    debug!("Connection closed before upgrade from {}", addr);
                } else {
                    error!("WebSocket upgrade failed for {}: {}", addr, e);
                }
                return;
            }
        };

        let conn_id = format!("conn-{}", self.next_conn_id);
        self.next_conn_id += 1;

        info!("New connection from {} (conn_id: {})", addr, conn_id);

        let conn = ClientConnection::new(conn_id.clone(), ws_stream, self.event_tx.clone());

        if let Err(e) = conn.send_hello(&self.server_id).await {
            error!("Failed to send hello to {}: {}", conn_id, e);
            return;
        }

        self.pending.insert(conn_id, conn);
    }

    /// Wait for the next server event, encapsulating the hello lifecycle.
    ///
    /// Pre-hello connections are an internal detail. Callers only see:
    /// - `ClientConnected` when a hello completes
    /// - `Request` with the resolved client ID
    /// - `ClientDisconnected` when a post-hello client disconnects
    ///
    /// Connections that close before hello are silently cleaned up.
    pub async fn poll_event(&mut self) -> Option<ServerEvent> {
        loop {
            let event = self.event_rx.recv().await?;

            match event {
                ConnectionEvent::Hello { conn_id, client_id } => {
                    debug!("Hello complete: {} is now known as {}", conn_id, client_id);

                    if let Some(mut conn) = self.pending.remove(&conn_id) {
                        conn.set_client_id(client_id.clone());
                        self.clients.insert(client_id.clone(), conn);
                    }
                    self.conn_id_to_client.insert(conn_id, client_id.clone());

                    return Some(ServerEvent::ClientConnected { client_id });
                }
                ConnectionEvent::Request(mut request) => {
                    // Resolve conn_id -> client ID
                    if let Some(client_id) = self.conn_id_to_client.get(&request.conn_id) {
                        request.conn_id = client_id.clone();
                    }
                    return Some(ServerEvent::Request(request));
                }
                ConnectionEvent::Closed { conn_id } => {
                    if let Some(client_id) = self.conn_id_to_client.remove(&conn_id) {
                        self.clients.remove(&client_id);
                        return Some(ServerEvent::ClientDisconnected { client_id });
                    } else {
                        // Pre-hello: silent cleanup, continue loop
                        self.pending.remove(&conn_id);
                        debug!("Connection closed before hello: {}", conn_id);
                        continue;
                    }
                }
            }
        }
    }

    /// Send data to a specific client by its session ID.
    pub async fn send(&self, client_id: &str, data: &[u8]) -> Result<()> {
        let conn = self
            .clients
            .get(client_id)
            .ok_or_else(|| anyhow!("Unknown client: {}", client_id))?;

        conn.send(data).await
    }

    /// Number of connected clients (with completed hello).
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// IDs of all connected clients.
    pub fn connected_clients(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }
}
