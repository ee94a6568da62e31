//! DocumentProvider: the authoritative client-side cache of document
//! content and versions, and the owner of conflict detection.
//!
//! One provider is constructed per client session and injected into every
//! editor component that needs it; the provider is a cheap clone handle over
//! shared state, never an ambient singleton.
//!
//! The per-key cache is the only mutable shared state in the protocol. It is
//! mutated in exactly three places: `load` success, `save` success, and
//! conflict resolution. Every cache write passes a stale-response guard so
//! the locally observable version never decreases within a session.

use crate::content::PanelContent;
use crate::events::{DocumentEvent, EventBus};
use crate::key::DocumentKey;
use crate::store::{RemoteStore, StoreError, Version};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The save was rejected as stale. By the time this error is returned,
    /// the provider has already re-fetched the authoritative state, updated
    /// its cache, and emitted the conflict event; callers treat this as
    /// handled, not as a user-visible failure.
    #[error("Save conflict on {key}: remote is at version {remote_version}")]
    Conflict {
        key: DocumentKey,
        remote_version: Version,
    },

    /// A save for this key is already in flight from this client. Callers
    /// must serialize or debounce their own saves per key.
    #[error("A save is already in flight for {0}")]
    SaveInFlight(DocumentKey),

    #[error("Remote store: {0}")]
    Remote(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Per-key edit lifecycle, kept explicit rather than implied by callback
/// ordering: `Clean -> Pending -> {Committed | Reverted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditState {
    /// No save activity since the last load.
    #[default]
    Clean,
    /// A save is in flight.
    Pending,
    /// The last save was accepted by the authority.
    Committed,
    /// The last save was rejected and the remote state was adopted.
    Reverted,
}

/// Canonical cached state of one document. Owned exclusively by the
/// provider; editors hold only transient rendering copies.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub content: PanelContent,
    pub version: Version,
    pub last_synced_at: SystemTime,
}

struct Shared {
    cache: RwLock<HashMap<DocumentKey, DocumentRecord>>,
    states: RwLock<HashMap<DocumentKey, EditState>>,
    saving: Mutex<HashSet<DocumentKey>>,
    events: Arc<EventBus>,
}

/// Document store provider. Clone handles share the same cache and bus.
pub struct DocumentProvider<R: RemoteStore> {
    remote: Arc<R>,
    shared: Arc<Shared>,
}

impl<R: RemoteStore> Clone for DocumentProvider<R> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Releases the per-key in-flight save marker on every exit path.
struct SaveGuard<'a> {
    shared: &'a Shared,
    key: DocumentKey,
}

impl Drop for SaveGuard<'_> {
    fn drop(&mut self) {
        self.shared
            .saving
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

impl<R: RemoteStore> DocumentProvider<R> {
    pub fn new(remote: Arc<R>) -> Self {
        Self {
            remote,
            shared: Arc::new(Shared {
                cache: RwLock::new(HashMap::new()),
                states: RwLock::new(HashMap::new()),
                saving: Mutex::new(HashSet::new()),
                events: Arc::new(EventBus::new()),
            }),
        }
    }

    /// The bus carrying `DocumentEvent`s for this provider.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    /// Fetch current content and version for `key` and cache them.
    ///
    /// A successful load unconditionally supersedes snapshot-derived state;
    /// the cached record itself is only replaced if the response is at
    /// least as new as what is already cached (stale-response guard).
    pub async fn load(&self, key: &DocumentKey) -> Result<DocumentRecord> {
        let fetched = self.remote.fetch(key).await?;
        debug!("Loaded {} at version {}", key, fetched.version);
        let record = self.apply_authoritative(key, fetched.content, fetched.version);
        self.set_state(key, EditState::Clean);
        Ok(record)
    }

    /// Persist `content`, asserting the authority is still at
    /// `base_version`.
    ///
    /// On a stale rejection the provider discards the optimistic write,
    /// re-fetches the authoritative state, overwrites its cache, emits
    /// exactly one conflict event, and returns `ProviderError::Conflict`.
    /// Saves never merge; this is whole-document last-write-wins.
    pub async fn save(
        &self,
        key: &DocumentKey,
        content: PanelContent,
        base_version: Version,
    ) -> Result<Version> {
        {
            let mut saving = self
                .shared
                .saving
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if !saving.insert(key.clone()) {
                return Err(ProviderError::SaveInFlight(key.clone()));
            }
        }
        let _guard = SaveGuard {
            shared: &self.shared,
            key: key.clone(),
        };

        self.set_state(key, EditState::Pending);

        match self.remote.put(key, &content, base_version).await {
            Ok(new_version) => {
                debug!("Saved {} at version {}", key, new_version);
                self.apply_authoritative(key, content, new_version);
                self.set_state(key, EditState::Committed);
                Ok(new_version)
            }
            Err(StoreError::StaleSave { remote_version }) => {
                debug!(
                    "Stale save on {} (base {}, remote {}), re-syncing",
                    key, base_version, remote_version
                );
                self.resolve_conflict(key, base_version).await
            }
            Err(err) => {
                warn!("Save failed for {}: {}", key, err);
                self.set_state(key, EditState::Clean);
                Err(err.into())
            }
        }
    }

    /// Re-fetch authoritative state after a stale save, overwrite the
    /// cache, and emit the conflict event.
    async fn resolve_conflict(
        &self,
        key: &DocumentKey,
        base_version: Version,
    ) -> Result<Version> {
        let fetched = match self.remote.fetch(key).await {
            Ok(doc) => doc,
            Err(err) => {
                // Resolution needs the fresh content; without it the cache
                // stays as-is and no conflict event fires. The next
                // successful load or save completes the resync.
                warn!("Conflict re-fetch failed for {}: {}", key, err);
                self.set_state(key, EditState::Clean);
                return Err(err.into());
            }
        };

        let remote_version = fetched.version;
        self.apply_authoritative(key, fetched.content.clone(), remote_version);
        self.set_state(key, EditState::Reverted);

        self.shared.events.emit(DocumentEvent::Conflict {
            key: key.clone(),
            message: format!(
                "Save with base version {base_version} rejected; adopted remote version {remote_version}"
            ),
            remote_version,
            remote_content: fetched.content,
        });

        Err(ProviderError::Conflict {
            key: key.clone(),
            remote_version,
        })
    }

    /// Write authoritative `(content, version)` into the cache, unless a
    /// newer record is already present (late responses are dropped, never
    /// blindly applied). Returns the record now in the cache.
    fn apply_authoritative(
        &self,
        key: &DocumentKey,
        content: PanelContent,
        version: Version,
    ) -> DocumentRecord {
        let mut cache = self
            .shared
            .cache
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = cache.get(key) {
            if existing.version > version {
                debug!(
                    "Dropping late response for {} (version {} < cached {})",
                    key, version, existing.version
                );
                return existing.clone();
            }
        }
        let record = DocumentRecord {
            content,
            version,
            last_synced_at: SystemTime::now(),
        };
        cache.insert(key.clone(), record.clone());
        record
    }

    /// Cached content for `key`, or `None` if never synchronized.
    /// Pure cache read; never triggers network I/O.
    pub fn get_document(&self, key: &DocumentKey) -> Option<PanelContent> {
        self.record(key).map(|r| r.content)
    }

    /// Cached version for `key`; `0` means "not yet synchronized", never a
    /// valid server version.
    pub fn get_document_version(&self, key: &DocumentKey) -> Version {
        self.record(key).map(|r| r.version).unwrap_or(0)
    }

    /// The full cached record for `key`, if any.
    pub fn record(&self, key: &DocumentKey) -> Option<DocumentRecord> {
        self.shared
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Current edit state for `key`.
    pub fn edit_state(&self, key: &DocumentKey) -> EditState {
        self.shared
            .states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    fn set_state(&self, key: &DocumentKey, state: EditState) {
        self.shared
            .states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), state);
    }

    #[cfg(test)]
    pub(crate) fn apply_for_test(
        &self,
        key: &DocumentKey,
        content: PanelContent,
        version: Version,
    ) -> DocumentRecord {
        self.apply_authoritative(key, content, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::NoteId;
    use crate::store::{InMemoryRemote, RemoteDocument};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn key(note: &str) -> DocumentKey {
        DocumentKey::main(NoteId::new(note).unwrap())
    }

    fn provider_with_remote() -> (DocumentProvider<InMemoryRemote>, Arc<InMemoryRemote>) {
        let remote = Arc::new(InMemoryRemote::new());
        (DocumentProvider::new(Arc::clone(&remote)), remote)
    }

    /// Seed the remote up to `version` with throwaway intermediate saves.
    async fn seed(remote: &InMemoryRemote, k: &DocumentKey, version: Version, text: &str) {
        for v in 0..version {
            let content = if v + 1 == version {
                PanelContent::from_text(text)
            } else {
                PanelContent::from_text(&format!("seed-{v}"))
            };
            remote.put(k, &content, v).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_load_populates_cache() {
        let (provider, remote) = provider_with_remote();
        let k = key("note-1");
        seed(&remote, &k, 1, "hello").await;

        assert_eq!(provider.get_document_version(&k), 0);
        assert!(provider.get_document(&k).is_none());

        let record = provider.load(&k).await.unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(provider.get_document_version(&k), 1);
        assert_eq!(provider.get_document(&k).unwrap().plain_text(), "hello");
    }

    #[tokio::test]
    async fn test_load_not_found() {
        let (provider, _remote) = provider_with_remote();
        let err = provider.load(&key("missing")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Remote(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let (provider, remote) = provider_with_remote();
        let k = key("note-1");
        seed(&remote, &k, 2, "stable").await;

        let first = provider.load(&k).await.unwrap();
        let second = provider.load(&k).await.unwrap();
        assert_eq!(first.version, second.version);
        assert_eq!(first.content, second.content);
    }

    #[tokio::test]
    async fn test_save_strictly_increases_version() {
        let (provider, remote) = provider_with_remote();
        let k = key("note-1");
        seed(&remote, &k, 1, "v1").await;
        provider.load(&k).await.unwrap();

        let before = provider.get_document_version(&k);
        let after = provider
            .save(&k, PanelContent::from_text("v2"), before)
            .await
            .unwrap();
        assert!(after > before);
        assert_eq!(provider.get_document_version(&k), after);
        assert_eq!(provider.edit_state(&k), EditState::Committed);
    }

    #[tokio::test]
    async fn test_first_save_of_new_document() {
        let (provider, _remote) = provider_with_remote();
        let k = key("brand-new");

        // Version 0 means "never synchronized"; a first save uses it as base
        let version = provider
            .save(&k, PanelContent::from_text("first"), 0)
            .await
            .unwrap();
        assert_eq!(version, 1);
        assert_eq!(provider.get_document(&k).unwrap().plain_text(), "first");
    }

    #[tokio::test]
    async fn test_stale_save_resyncs_and_emits_one_conflict() {
        let (provider, remote) = provider_with_remote();
        let k = key("note-1");
        seed(&remote, &k, 4, "base").await;
        provider.load(&k).await.unwrap();

        // Another client advances the document to version 5
        remote
            .put(&k, &PanelContent::from_text("B1"), 4)
            .await
            .unwrap();

        let events: Arc<Mutex<Vec<DocumentEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let _sub = provider.events().subscribe(move |event| {
            events_clone.lock().unwrap().push(event);
        });

        let err = provider
            .save(&k, PanelContent::from_text("A1"), 4)
            .await
            .unwrap_err();
        match err {
            ProviderError::Conflict {
                key: conflict_key,
                remote_version,
            } => {
                assert_eq!(conflict_key, k);
                assert_eq!(remote_version, 5);
            }
            other => panic!("Expected Conflict, got {other:?}"),
        }

        // Exactly one event, carrying the freshly fetched state
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            DocumentEvent::Conflict {
                key: event_key,
                remote_version,
                remote_content,
                ..
            } => {
                assert_eq!(event_key, &k);
                assert_eq!(*remote_version, 5);
                assert_eq!(remote_content.plain_text(), "B1");
            }
            other => panic!("Expected Conflict event, got {other:?}"),
        }

        // Cache now matches the event's version and the remote content
        assert_eq!(provider.get_document_version(&k), 5);
        assert_eq!(provider.get_document(&k).unwrap().plain_text(), "B1");
        assert_eq!(provider.edit_state(&k), EditState::Reverted);
    }

    #[tokio::test]
    async fn test_two_client_conflict_scenario() {
        let remote = Arc::new(InMemoryRemote::new());
        let k = key("note1");
        seed(&remote, &k, 4, "shared-base").await;

        let client_a = DocumentProvider::new(Arc::clone(&remote));
        let client_b = DocumentProvider::new(Arc::clone(&remote));

        // Both clients load at version 4
        assert_eq!(client_a.load(&k).await.unwrap().version, 4);
        assert_eq!(client_b.load(&k).await.unwrap().version, 4);

        // B saves first and wins version 5
        let b_version = client_b
            .save(&k, PanelContent::from_text("B1"), 4)
            .await
            .unwrap();
        assert_eq!(b_version, 5);

        // A's save from the same base is stale
        let err = client_a
            .save(&k, PanelContent::from_text("A1"), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Conflict { remote_version: 5, .. }));

        // A ends up displaying B's content, not its own
        assert_eq!(client_a.get_document(&k).unwrap().plain_text(), "B1");
        assert_eq!(client_a.get_document_version(&k), 5);
    }

    #[tokio::test]
    async fn test_late_response_is_dropped() {
        let (provider, remote) = provider_with_remote();
        let k = key("note-1");
        seed(&remote, &k, 3, "newest").await;
        provider.load(&k).await.unwrap();

        // A response from an older in-flight request arrives after the cache
        // has moved on; it must not roll the record back.
        let record = provider.apply_for_test(&k, PanelContent::from_text("old"), 1);
        assert_eq!(record.version, 3);
        assert_eq!(provider.get_document_version(&k), 3);
        assert_eq!(provider.get_document(&k).unwrap().plain_text(), "newest");
    }

    /// Remote whose put parks until released, for overlap testing.
    struct SlowRemote {
        inner: InMemoryRemote,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RemoteStore for SlowRemote {
        async fn fetch(&self, key: &DocumentKey) -> crate::store::Result<RemoteDocument> {
            self.inner.fetch(key).await
        }

        async fn put(
            &self,
            key: &DocumentKey,
            content: &PanelContent,
            base_version: Version,
        ) -> crate::store::Result<Version> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.put(key, content, base_version).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_save_rejected() {
        let remote = Arc::new(SlowRemote {
            inner: InMemoryRemote::new(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let provider = DocumentProvider::new(Arc::clone(&remote));
        let k = key("note-1");

        let background = {
            let provider = provider.clone();
            let k = k.clone();
            tokio::spawn(async move { provider.save(&k, PanelContent::from_text("slow"), 0).await })
        };

        // Wait until the first save is inside the remote call
        remote.entered.notified().await;

        let err = provider
            .save(&k, PanelContent::from_text("overlap"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::SaveInFlight(_)));

        remote.release.notify_one();
        let version = background.await.unwrap().unwrap();
        assert_eq!(version, 1);

        // The marker is released; a follow-up save goes through
        remote.release.notify_one();
        provider
            .save(&k, PanelContent::from_text("after"), version)
            .await
            .unwrap();
    }

    /// Remote that rejects the save as stale and then refuses the re-fetch.
    struct StaleThenOffline;

    #[async_trait]
    impl RemoteStore for StaleThenOffline {
        async fn fetch(&self, _key: &DocumentKey) -> crate::store::Result<RemoteDocument> {
            Err(StoreError::Unavailable("refetch refused".to_string()))
        }

        async fn put(
            &self,
            _key: &DocumentKey,
            _content: &PanelContent,
            _base_version: Version,
        ) -> crate::store::Result<Version> {
            Err(StoreError::StaleSave { remote_version: 2 })
        }
    }

    #[tokio::test]
    async fn test_failed_refetch_emits_no_event_and_keeps_cache() {
        let provider = DocumentProvider::new(Arc::new(StaleThenOffline));
        let k = key("note-1");
        provider.apply_for_test(&k, PanelContent::from_text("cached"), 1);

        let emitted = Arc::new(AtomicUsize::new(0));
        let emitted_clone = Arc::clone(&emitted);
        let _sub = provider.events().subscribe(move |_| {
            emitted_clone.fetch_add(1, Ordering::Relaxed);
        });

        let err = provider
            .save(&k, PanelContent::from_text("mine"), 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Remote(StoreError::Unavailable(_))
        ));

        // No event without fresh content, and the cache is untouched
        assert_eq!(emitted.load(Ordering::Relaxed), 0);
        assert_eq!(provider.get_document(&k).unwrap().plain_text(), "cached");
        assert_eq!(provider.get_document_version(&k), 1);
    }

    #[tokio::test]
    async fn test_conflicts_on_different_keys_are_independent() {
        let remote = Arc::new(InMemoryRemote::new());
        let provider = DocumentProvider::new(Arc::clone(&remote));
        let key_a = key("note-a");
        let key_b = key("note-b");
        seed(&remote, &key_a, 1, "a").await;
        seed(&remote, &key_b, 1, "b").await;
        provider.load(&key_a).await.unwrap();
        provider.load(&key_b).await.unwrap();

        // Conflict on A only
        remote
            .put(&key_a, &PanelContent::from_text("a2"), 1)
            .await
            .unwrap();
        let _ = provider
            .save(&key_a, PanelContent::from_text("mine"), 1)
            .await
            .unwrap_err();

        assert_eq!(provider.edit_state(&key_a), EditState::Reverted);
        assert_eq!(provider.edit_state(&key_b), EditState::Clean);
        assert_eq!(provider.get_document_version(&key_b), 1);
    }
}
