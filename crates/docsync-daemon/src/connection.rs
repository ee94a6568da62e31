//! Individual client connection management.
//!
//! Each connection wraps a WebSocket stream, split into read and write
//! halves. A spawned read task forwards decoded frames to the server's
//! event channel; the write half is shared behind a mutex so responses can
//! be sent from the routing loop.

use crate::message::{HelloMessage, MAX_MESSAGE_SIZE};
use anyhow::{Result, anyhow};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, warn};

/// A request frame received from a client connection.
#[derive(Debug)]
pub struct IncomingRequest {
    /// Connection ID (pre-hello) or resolved client ID
    pub conn_id: String,
    /// Raw bincode request bytes
    pub data: Vec<u8>,
}

/// Event emitted by a connection's read task.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Received a request frame from the client
    Request(IncomingRequest),
    /// Client completed the hello exchange, revealing its session ID
    Hello { conn_id: String, client_id: String },
    /// Connection was closed
    Closed { conn_id: String },
}

/// A single WebSocket connection to a client.
pub struct ClientConnection {
    /// Internal ID assigned on accept (e.g., "conn-1")
    pub conn_id: String,
    /// Client session ID (known after hello)
    pub client_id: Option<String>,
    /// Write half of the WebSocket (wrapped for sharing across tasks)
    write: Arc<Mutex<futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>>>,
    /// Handle to the read task
    read_task: Option<JoinHandle<()>>,
}

impl ClientConnection {
    /// Create a new connection from an accepted WebSocket stream.
    ///
    /// Spawns a read task that forwards frames to the event channel.
    pub fn new(
        conn_id: String,
        ws_stream: WebSocketStream<TcpStream>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (write, read) = ws_stream.split();
        let write = Arc::new(Mutex::new(write));

        let read_conn_id = conn_id.clone();
        let read_task = tokio::spawn(async move {
            Self::read_loop(read_conn_id, read, event_tx).await;
        });

        Self {
            conn_id,
            client_id: None,
            write,
            read_task: Some(read_task),
        }
    }

    /// Read loop that forwards frames to the event channel.
    async fn read_loop(
        conn_id: String,
        mut read: futures::stream::SplitStream<WebSocketStream<TcpStream>>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Binary(data) => data,
                        Message::Text(text) => text.into_bytes().into(),
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", conn_id);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    if data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Message from {} exceeds max size ({} > {}), dropping",
                            conn_id,
                            data.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }

                    if let Some(hello) = HelloMessage::from_binary(&data) {
                        debug!(
                            "Received hello from {} (client_id: {}, role: {})",
                            conn_id, hello.client_id, hello.role
                        );
                        let _ = event_tx.send(ConnectionEvent::Hello {
                            conn_id: conn_id.clone(),
                            client_id: hello.client_id,
                        });
                    } else {
                        let _ = event_tx.send(ConnectionEvent::Request(IncomingRequest {
                            conn_id: conn_id.clone(),
                            data: data.to_vec(),
                        }));
                    }
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", conn_id);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", conn_id, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", conn_id);
                    break;
                }
            }
        }

        let _ = event_tx.send(ConnectionEvent::Closed {
            conn_id: conn_id.clone(),
        });
    }

    /// Send binary data to the client.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Binary(data.to_vec().into()))
            .await
            .map_err(|e| anyhow!("Failed to send message: {}", e))
    }

    /// Send our hello to the client.
    pub async fn send_hello(&self, server_id: &str) -> Result<()> {
        self.send(&HelloMessage::new(server_id, "server").to_binary())
            .await
    }

    /// Set the client session ID after hello.
    pub fn set_client_id(&mut self, client_id: String) {
        self.client_id = Some(client_id);
    }

    /// Close the connection gracefully.
    pub async fn close(&mut self) {
        if let Ok(mut write) = self.write.try_lock() {
            let _ = write.send(Message::Close(None)).await;
        }

        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
