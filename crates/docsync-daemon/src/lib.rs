//! docsync-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod authority;
pub mod client;
pub mod connection;
pub mod message;
pub mod server;

// Re-export key types for convenience
pub use authority::{DocumentAuthority, PutOutcome, StoredDocument};
pub use client::RemoteClient;
pub use connection::{ClientConnection, ConnectionEvent, IncomingRequest};
pub use message::{HelloMessage, MAX_MESSAGE_SIZE, StoreRequest, StoreResponse, WireError};
pub use server::{ServerEvent, WebSocketServer};
