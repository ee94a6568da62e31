//! Event infrastructure for document sync.
//!
//! Provides `DocumentEvent` payloads and an `EventBus` for subscriptions.
//! Subscriptions follow the disposer pattern: the returned handle keeps the
//! callback registered, dropping it unsubscribes. This binds subscription
//! lifetime to the consuming component (an editor surface) instead of
//! leaving ambient callbacks behind after unmount.

use crate::content::PanelContent;
use crate::key::DocumentKey;
use crate::store::Version;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted by the document store provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DocumentEvent {
    /// A save was rejected as stale and the provider has re-synchronized
    /// its cache to the authoritative state. Emitted exactly once per
    /// detected conflict.
    Conflict {
        key: DocumentKey,
        /// Human-readable description for logs and debug surfaces.
        message: String,
        /// The authoritative version adopted during resolution.
        #[serde(rename = "remoteVersion")]
        remote_version: Version,
        /// The authoritative content adopted during resolution. Listeners
        /// should prefer reading the provider cache over this payload.
        #[serde(rename = "remoteContent")]
        remote_content: PanelContent,
    },

    /// Reserved: an out-of-band remote change not caused by this client's
    /// own save. Nothing emits this today; the variant exists so
    /// subscribers have a stable name once authority push notifications
    /// are defined.
    RemoteUpdate {
        key: DocumentKey,
        version: Version,
        content: PanelContent,
    },
}

impl DocumentEvent {
    /// The document key this event concerns.
    pub fn key(&self) -> &DocumentKey {
        match self {
            DocumentEvent::Conflict { key, .. } => key,
            DocumentEvent::RemoteUpdate { key, .. } => key,
        }
    }
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing document events to subscribers.
///
/// Thread-safe for use in a multi-threaded Tokio runtime.
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(DocumentEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(DocumentEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // Use try_write to avoid deadlock if Drop runs during panic unwinding
        // while a read lock is held (e.g., during emit).
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: DocumentEvent) {
        // Clone the callback list to prevent deadlock if a callback calls subscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
