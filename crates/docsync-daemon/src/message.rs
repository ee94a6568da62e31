//! Wire protocol for the document authority.
//!
//! Connections open with a JSON `hello` frame (UTF-8 bytes in a binary
//! WebSocket frame), then exchange bincode-encoded request/response
//! envelopes. Content travels as opaque JSON bytes inside the envelope, so
//! the binary framing never needs to understand the rich-text tree.

use docsync_core::Version;
use serde::{Deserialize, Serialize};

/// Maximum message size (50MB) to prevent memory exhaustion from malicious clients.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Hello message exchanged when a connection opens.
///
/// Sent as binary WebSocket frame containing UTF-8 JSON. The server sends
/// its hello first; the client answers with its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    /// Always "hello"
    #[serde(rename = "type")]
    pub msg_type: String,

    /// The sender's session identifier
    #[serde(rename = "clientId")]
    pub client_id: String,

    /// Role in the connection: "server" or "client"
    pub role: String,
}

impl HelloMessage {
    pub fn new(client_id: &str, role: &str) -> Self {
        Self {
            msg_type: "hello".to_string(),
            client_id: client_id.to_string(),
            role: role.to_string(),
        }
    }

    /// Serialize to UTF-8 JSON bytes for sending as binary WebSocket frame.
    pub fn to_binary(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("HelloMessage serialization should not fail")
    }

    /// Try to parse a hello from binary data.
    ///
    /// Returns None if the data is not valid UTF-8 JSON or not a hello.
    pub fn from_binary(data: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(data).ok()?;
        let msg: Self = serde_json::from_str(text).ok()?;
        if msg.msg_type == "hello" { Some(msg) } else { None }
    }
}

/// Quick check if data looks like a JSON hello (starts with '{').
///
/// Binary store messages (bincode) won't start with '{'.
pub fn is_likely_hello(data: &[u8]) -> bool {
    data.first() == Some(&b'{')
}

/// Request from a client to the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreRequest {
    /// Fetch current content and version for a document key.
    Fetch {
        request_id: u64,
        /// Canonical key string, `"<note>/<panel>"`
        key: String,
    },

    /// Persist content, asserting the authority is at `base_version`.
    Put {
        request_id: u64,
        key: String,
        /// Content as JSON bytes
        content: Vec<u8>,
        base_version: Version,
    },
}

impl StoreRequest {
    pub fn request_id(&self) -> u64 {
        match self {
            StoreRequest::Fetch { request_id, .. } => *request_id,
            StoreRequest::Put { request_id, .. } => *request_id,
        }
    }

    pub fn to_binary(&self) -> Vec<u8> {
        bincode::serialize(self).expect("StoreRequest serialization should not fail")
    }

    pub fn from_binary(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Response from the authority, correlated by `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreResponse {
    /// Fetch result.
    Document {
        request_id: u64,
        /// Content as JSON bytes
        content: Vec<u8>,
        version: Version,
    },

    /// Put accepted; the newly assigned version.
    Saved { request_id: u64, version: Version },

    /// The request failed.
    Failure { request_id: u64, error: WireError },
}

impl StoreResponse {
    pub fn request_id(&self) -> u64 {
        match self {
            StoreResponse::Document { request_id, .. } => *request_id,
            StoreResponse::Saved { request_id, .. } => *request_id,
            StoreResponse::Failure { request_id, .. } => *request_id,
        }
    }

    pub fn to_binary(&self) -> Vec<u8> {
        bincode::serialize(self).expect("StoreResponse serialization should not fail")
    }

    pub fn from_binary(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Failure modes carried over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireError {
    /// The document has never been created.
    NotFound,
    /// The put's base version is behind; carries the authoritative version.
    Stale { remote_version: Version },
    /// The request could not be understood (bad key, bad content bytes).
    BadRequest { message: String },
    /// The authority failed internally (e.g. persistence error).
    Internal { message: String },
}
