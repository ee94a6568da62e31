//! RemoteClient: WebSocket implementation of the core `RemoteStore` trait.
//!
//! Speaks the authority wire protocol: hello exchange on connect, then
//! bincode request/response envelopes correlated by request ID. A spawned
//! read task routes each response to the oneshot channel of the request
//! that is waiting for it.
//!
//! Transport failures surface as `StoreError::Unavailable`; the authority's
//! stale rejection surfaces as `StoreError::StaleSave` so the provider's
//! conflict resolution runs unchanged against a real network.

use crate::message::{HelloMessage, MAX_MESSAGE_SIZE, StoreRequest, StoreResponse, WireError};
use anyhow::{Result, bail};
use async_trait::async_trait;
use docsync_core::{
    ClientId, DocumentKey, PanelContent, RemoteDocument, RemoteStore, StoreError, Version,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tracing::{debug, warn};

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<StoreResponse>>>>;

/// WebSocket client for the document authority.
pub struct RemoteClient {
    client_id: ClientId,
    server_id: String,
    write: Mutex<WsSink>,
    pending: PendingMap,
    next_request_id: AtomicU64,
    /// Set by the read task when the connection dies, so later requests
    /// fail fast instead of waiting on a response that can never arrive.
    closed: Arc<AtomicBool>,
    read_task: Option<JoinHandle<()>>,
}

impl RemoteClient {
    /// Connect to an authority and complete the hello exchange.
    pub async fn connect(url: &str, client_id: ClientId) -> Result<Self> {
        let (ws, _) = connect_async(url).await?;
        let (mut write, mut read) = ws.split();

        // The server sends its hello first
        let server_hello = Self::expect_hello(&mut read).await?;
        debug!(
            "Connected to authority {} (role {})",
            server_hello.client_id, server_hello.role
        );

        let hello = HelloMessage::new(&client_id.to_string(), "client");
        write
            .send(Message::Binary(hello.to_binary().into()))
            .await?;

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let read_task = tokio::spawn(Self::read_loop(
            read,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Ok(Self {
            client_id,
            server_id: server_hello.client_id,
            write: Mutex::new(write),
            pending,
            next_request_id: AtomicU64::new(1),
            closed,
            read_task: Some(read_task),
        })
    }

    async fn expect_hello(read: &mut WsSource) -> Result<HelloMessage> {
        loop {
            match read.next().await {
                Some(Ok(Message::Binary(data))) => match HelloMessage::from_binary(&data) {
                    Some(hello) => return Ok(hello),
                    None => bail!("Expected hello frame from authority"),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(other)) => bail!("Unexpected frame during hello: {other:?}"),
                Some(Err(e)) => return Err(e.into()),
                None => bail!("Connection closed during hello"),
            }
        }
    }

    /// Read loop routing responses to their waiting requests.
    async fn read_loop(mut read: WsSource, pending: PendingMap, closed: Arc<AtomicBool>) {
        while let Some(result) = read.next().await {
            match result {
                Ok(Message::Binary(data)) => {
                    if data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Response exceeds max size ({} > {}), dropping",
                            data.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }
                    match StoreResponse::from_binary(&data) {
                        Ok(response) => {
                            let sender = pending
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .remove(&response.request_id());
                            match sender {
                                Some(tx) => {
                                    let _ = tx.send(response);
                                }
                                None => {
                                    debug!(
                                        "Response for unknown request {}",
                                        response.request_id()
                                    );
                                }
                            }
                        }
                        Err(e) => warn!("Undecodable response from authority: {}", e),
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("Authority closed the connection");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!("Authority connection error: {}", e);
                    break;
                }
            }
        }

        // Connection gone. Mark closed first so no new request enqueues,
        // then drop the senders to wake every in-flight request with a
        // channel error, which maps to Unavailable.
        closed.store(true, Ordering::SeqCst);
        pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Our session ID.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// The authority's session ID from its hello.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send one request and wait for its correlated response.
    async fn request(&self, request: StoreRequest) -> Result<StoreResponse, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection closed".to_string()));
        }

        let request_id = request.request_id();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id, tx);

        let send_result = {
            let mut write = self.write.lock().await;
            write
                .send(Message::Binary(request.to_binary().into()))
                .await
        };
        if let Err(e) = send_result {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request_id);
            return Err(StoreError::Unavailable(format!("send failed: {e}")));
        }

        rx.await
            .map_err(|_| StoreError::Unavailable("connection closed before response".to_string()))
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

fn wire_error_to_store(key: &DocumentKey, error: WireError) -> StoreError {
    match error {
        WireError::NotFound => StoreError::NotFound(key.clone()),
        WireError::Stale { remote_version } => StoreError::StaleSave { remote_version },
        WireError::BadRequest { message } | WireError::Internal { message } => {
            StoreError::Unavailable(message)
        }
    }
}

#[async_trait]
impl RemoteStore for RemoteClient {
    async fn fetch(&self, key: &DocumentKey) -> docsync_core::store::Result<RemoteDocument> {
        let response = self
            .request(StoreRequest::Fetch {
                request_id: self.next_request_id(),
                key: key.to_string(),
            })
            .await?;

        match response {
            StoreResponse::Document {
                content, version, ..
            } => {
                let content = PanelContent::from_bytes(&content).map_err(|e| {
                    StoreError::Unavailable(format!("malformed content from authority: {e}"))
                })?;
                Ok(RemoteDocument { content, version })
            }
            StoreResponse::Failure { error, .. } => Err(wire_error_to_store(key, error)),
            other => Err(StoreError::Unavailable(format!(
                "unexpected response to fetch: {other:?}"
            ))),
        }
    }

    async fn put(
        &self,
        key: &DocumentKey,
        content: &PanelContent,
        base_version: Version,
    ) -> docsync_core::store::Result<Version> {
        let response = self
            .request(StoreRequest::Put {
                request_id: self.next_request_id(),
                key: key.to_string(),
                content: content.to_bytes(),
                base_version,
            })
            .await?;

        match response {
            StoreResponse::Saved { version, .. } => Ok(version),
            StoreResponse::Failure { error, .. } => Err(wire_error_to_store(key, error)),
            other => Err(StoreError::Unavailable(format!(
                "unexpected response to put: {other:?}"
            ))),
        }
    }
}
