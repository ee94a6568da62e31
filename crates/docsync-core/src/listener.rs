//! ConflictListener: per-editor-surface conflict resolution.
//!
//! One listener is attached per live editor surface (one per document key
//! currently rendered). It subscribes on attach and unsubscribes when
//! dropped, so subscription lifetime is strictly bound to the editor
//! instance's lifetime.
//!
//! Resolution reads the provider's cache rather than the event payload: the
//! cache is the single source of truth and the payload may lag a later
//! resolution for the same key.

use crate::content::PanelContent;
use crate::events::{DocumentEvent, Subscription};
use crate::key::DocumentKey;
use crate::provider::DocumentProvider;
use crate::store::{RemoteStore, Version};
use std::sync::Arc;
use tracing::{debug, warn};

/// The editor's rendering surface, as seen by the sync layer.
///
/// Implemented by the rich-text editor component (an external
/// collaborator). `replace_content` is a full overwrite: locally pending,
/// unsaved keystrokes are discarded. That is the documented last-write-wins
/// trade-off, not an accident.
pub trait EditorSurface: Send + Sync {
    fn replace_content(&self, content: PanelContent, version: Version);
}

/// Subscriber that reacts to conflict events for one document key by
/// replacing the editor's visible state with the provider's cached
/// authoritative content.
pub struct ConflictListener {
    key: DocumentKey,
    _subscription: Subscription,
}

impl ConflictListener {
    /// Attach a listener for `key` to `provider`'s event bus.
    pub fn attach<R: RemoteStore + 'static>(
        provider: &DocumentProvider<R>,
        key: DocumentKey,
        surface: Arc<dyn EditorSurface>,
    ) -> Self {
        Self::attach_with_notify(provider, key, surface, |_, _| {})
    }

    /// Like [`attach`](Self::attach), with an external callback invoked
    /// after each successful resolution with the adopted `(key, version)`.
    pub fn attach_with_notify<R, F>(
        provider: &DocumentProvider<R>,
        key: DocumentKey,
        surface: Arc<dyn EditorSurface>,
        notify: F,
    ) -> Self
    where
        R: RemoteStore + 'static,
        F: Fn(&DocumentKey, Version) + Send + Sync + 'static,
    {
        let provider = provider.clone();
        let listener_key = key.clone();

        let subscription = provider.clone().events().subscribe(move |event| {
            let DocumentEvent::Conflict { key: event_key, .. } = &event else {
                // RemoteUpdate is reserved; nothing emits it today.
                return;
            };
            if event_key != &listener_key {
                return;
            }

            // Resolve from the cache, not the event payload. Fail closed: a
            // missing record aborts the update rather than clearing the
            // editor or crashing its render loop.
            let Some(record) = provider.record(&listener_key) else {
                warn!(
                    "Conflict for {} but no cached record; leaving editor untouched",
                    listener_key
                );
                return;
            };

            debug!(
                "Resolving conflict for {}: adopting version {}",
                listener_key, record.version
            );
            surface.replace_content(record.content, record.version);
            notify(&listener_key, record.version);
        });

        Self {
            key,
            _subscription: subscription,
        }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::NoteId;
    use crate::store::InMemoryRemote;
    use std::sync::Mutex;

    fn key(note: &str) -> DocumentKey {
        DocumentKey::main(NoteId::new(note).unwrap())
    }

    /// Records every replacement applied to the surface.
    #[derive(Default)]
    struct RecordingSurface {
        replacements: Mutex<Vec<(String, Version)>>,
    }

    impl EditorSurface for RecordingSurface {
        fn replace_content(&self, content: PanelContent, version: Version) {
            self.replacements
                .lock()
                .unwrap()
                .push((content.plain_text(), version));
        }
    }

    fn conflict_for(k: &DocumentKey, version: Version, text: &str) -> DocumentEvent {
        DocumentEvent::Conflict {
            key: k.clone(),
            message: "test".to_string(),
            remote_version: version,
            remote_content: PanelContent::from_text(text),
        }
    }

    #[tokio::test]
    async fn test_resolution_replaces_editor_state_from_cache() {
        let remote = Arc::new(InMemoryRemote::new());
        let provider = DocumentProvider::new(Arc::clone(&remote));
        let k = key("note-1");

        remote
            .put(&k, &PanelContent::from_text("base"), 0)
            .await
            .unwrap();
        provider.load(&k).await.unwrap();

        let surface = Arc::new(RecordingSurface::default());
        let _listener = ConflictListener::attach(&provider, k.clone(), surface.clone());

        // Another client wins version 2; our save conflicts
        remote
            .put(&k, &PanelContent::from_text("theirs"), 1)
            .await
            .unwrap();
        let _ = provider
            .save(&k, PanelContent::from_text("mine"), 1)
            .await
            .unwrap_err();

        let replacements = surface.replacements.lock().unwrap();
        assert_eq!(replacements.len(), 1);
        assert_eq!(replacements[0], ("theirs".to_string(), 2));
    }

    #[test]
    fn test_events_for_other_keys_are_ignored() {
        let provider = DocumentProvider::new(Arc::new(InMemoryRemote::new()));
        let mine = key("note-1");
        let other = key("note-2");

        provider.apply_for_test(&other, PanelContent::from_text("other"), 3);

        let surface = Arc::new(RecordingSurface::default());
        let _listener = ConflictListener::attach(&provider, mine, surface.clone());

        provider.events().emit(conflict_for(&other, 3, "other"));

        assert!(surface.replacements.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cache_miss_fails_closed() {
        let provider = DocumentProvider::new(Arc::new(InMemoryRemote::new()));
        let k = key("note-1");

        let surface = Arc::new(RecordingSurface::default());
        let _listener = ConflictListener::attach(&provider, k.clone(), surface.clone());

        // Conflict event without a cached record: abort, no partial update
        provider.events().emit(conflict_for(&k, 7, "ghost"));

        assert!(surface.replacements.lock().unwrap().is_empty());
    }

    #[test]
    fn test_detached_listener_stops_reacting() {
        let provider = DocumentProvider::new(Arc::new(InMemoryRemote::new()));
        let k = key("note-1");
        provider.apply_for_test(&k, PanelContent::from_text("cached"), 2);

        let surface = Arc::new(RecordingSurface::default());
        let listener = ConflictListener::attach(&provider, k.clone(), surface.clone());

        provider.events().emit(conflict_for(&k, 2, "cached"));
        assert_eq!(surface.replacements.lock().unwrap().len(), 1);

        drop(listener);
        provider.events().emit(conflict_for(&k, 2, "cached"));
        assert_eq!(surface.replacements.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_notify_callback_receives_adopted_version() {
        let provider = DocumentProvider::new(Arc::new(InMemoryRemote::new()));
        let k = key("note-1");
        provider.apply_for_test(&k, PanelContent::from_text("fresh"), 9);

        let notified: Arc<Mutex<Vec<(String, Version)>>> = Arc::new(Mutex::new(Vec::new()));
        let notified_clone = Arc::clone(&notified);

        let surface = Arc::new(RecordingSurface::default());
        let _listener = ConflictListener::attach_with_notify(
            &provider,
            k.clone(),
            surface,
            move |key, version| {
                notified_clone
                    .lock()
                    .unwrap()
                    .push((key.to_string(), version));
            },
        );

        provider.events().emit(conflict_for(&k, 9, "fresh"));

        let notified = notified.lock().unwrap();
        assert_eq!(notified.as_slice(), &[("note-1/main".to_string(), 9)]);
    }
}
