//! RemoteStore trait abstraction for the authoritative document store.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing
//! - `RemoteClient` (in docsync-daemon) - WebSocket client against the
//!   document authority
//!
//! The remote store enforces serializable version progression per key: it
//! accepts at most one `put` per version number, rejecting all later saves
//! built on the same base with `StaleSave` carrying the authoritative
//! version. That rejection is the protocol's conflict signal, not an error
//! to surface to users.

use crate::content::PanelContent;
use crate::key::DocumentKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Monotonically increasing document version assigned by the authority.
///
/// `0` means "never synchronized" and is never assigned to a stored
/// document; the first successful save produces version `1`.
pub type Version = u64;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The document has never been created remotely. Non-retryable.
    #[error("Document not found: {0}")]
    NotFound(DocumentKey),

    /// Transport or service failure. Retryable; callers may fall back to a
    /// snapshot only when no cached record exists for the key.
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// The save's base version is behind the authority. Carries the
    /// authoritative version so the client can resynchronize.
    #[error("Stale save: remote is at version {remote_version}")]
    StaleSave { remote_version: Version },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Authoritative state of one document, as returned by a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub content: PanelContent,
    pub version: Version,
}

/// The authoritative document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the current content and version for `key`.
    async fn fetch(&self, key: &DocumentKey) -> Result<RemoteDocument>;

    /// Persist `content`, asserting the authority's current version equals
    /// `base_version` (0 for a document that does not exist yet). Returns
    /// the newly assigned version on success.
    async fn put(
        &self,
        key: &DocumentKey,
        content: &PanelContent,
        base_version: Version,
    ) -> Result<Version>;
}

/// In-memory remote store for testing.
///
/// Enforces the same compare-and-swap discipline as the real authority, and
/// can be switched "offline" to exercise `Unavailable` paths.
pub struct InMemoryRemote {
    documents: RwLock<HashMap<DocumentKey, RemoteDocument>>,
    offline: AtomicBool,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate the remote being unreachable: all operations fail with
    /// `Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated offline".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn fetch(&self, key: &DocumentKey) -> Result<RemoteDocument> {
        self.check_online()?;
        let documents = self.documents.read().unwrap();
        documents
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn put(
        &self,
        key: &DocumentKey,
        content: &PanelContent,
        base_version: Version,
    ) -> Result<Version> {
        self.check_online()?;
        // Single write lock across compare and swap: at most one save per
        // version number can ever succeed.
        let mut documents = self.documents.write().unwrap();
        let current = documents.get(key).map(|d| d.version).unwrap_or(0);
        if base_version != current {
            return Err(StoreError::StaleSave {
                remote_version: current,
            });
        }
        let new_version = current + 1;
        documents.insert(
            key.clone(),
            RemoteDocument {
                content: content.clone(),
                version: new_version,
            },
        );
        Ok(new_version)
    }
}

// Implement RemoteStore for Arc<T> where T: RemoteStore
// This allows sharing one remote between multiple providers in tests
#[async_trait]
impl<T: RemoteStore> RemoteStore for std::sync::Arc<T> {
    async fn fetch(&self, key: &DocumentKey) -> Result<RemoteDocument> {
        (**self).fetch(key).await
    }

    async fn put(
        &self,
        key: &DocumentKey,
        content: &PanelContent,
        base_version: Version,
    ) -> Result<Version> {
        (**self).put(key, content, base_version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::NoteId;
    use std::sync::Arc;

    fn key(panel: &str) -> DocumentKey {
        DocumentKey::new(
            NoteId::new("note-1").unwrap(),
            crate::key::PanelId::new(panel).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_fetch_unknown_key_is_not_found() {
        let remote = InMemoryRemote::new();
        let err = remote.fetch(&key("main")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_first_put_assigns_version_one() {
        let remote = InMemoryRemote::new();
        let k = key("main");

        let version = remote
            .put(&k, &PanelContent::from_text("v1"), 0)
            .await
            .unwrap();
        assert_eq!(version, 1);

        let doc = remote.fetch(&k).await.unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.content.plain_text(), "v1");
    }

    #[tokio::test]
    async fn test_stale_put_rejected_with_remote_version() {
        let remote = InMemoryRemote::new();
        let k = key("main");

        remote.put(&k, &PanelContent::from_text("a"), 0).await.unwrap();
        remote.put(&k, &PanelContent::from_text("b"), 1).await.unwrap();

        // Retry from the old base
        let err = remote
            .put(&k, &PanelContent::from_text("c"), 1)
            .await
            .unwrap_err();
        match err {
            StoreError::StaleSave { remote_version } => assert_eq!(remote_version, 2),
            other => panic!("Expected StaleSave, got {other:?}"),
        }

        // Rejected write must not have applied
        let doc = remote.fetch(&k).await.unwrap();
        assert_eq!(doc.content.plain_text(), "b");
    }

    #[tokio::test]
    async fn test_concurrent_same_base_saves_one_winner() {
        let remote = Arc::new(InMemoryRemote::new());
        let k = key("main");
        remote
            .put(&k, &PanelContent::from_text("base"), 0)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let remote = Arc::clone(&remote);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                remote
                    .put(&k, &PanelContent::from_text(&format!("writer-{i}")), 1)
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(version) => {
                    assert_eq!(version, 2);
                    successes += 1;
                }
                Err(StoreError::StaleSave { remote_version }) => {
                    assert!(remote_version >= 1);
                }
                Err(other) => panic!("Unexpected error: {other:?}"),
            }
        }
        assert_eq!(successes, 1, "Exactly one same-base save may win");
    }

    #[tokio::test]
    async fn test_offline_fails_with_unavailable() {
        let remote = InMemoryRemote::new();
        let k = key("main");
        remote.put(&k, &PanelContent::from_text("x"), 0).await.unwrap();

        remote.set_offline(true);
        assert!(matches!(
            remote.fetch(&k).await.unwrap_err(),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            remote
                .put(&k, &PanelContent::from_text("y"), 1)
                .await
                .unwrap_err(),
            StoreError::Unavailable(_)
        ));

        remote.set_offline(false);
        assert!(remote.fetch(&k).await.is_ok());
    }
}
