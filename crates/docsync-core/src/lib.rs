//! docsync-core: Document synchronization with optimistic concurrency.
//!
//! This crate provides the core functionality for:
//! - Per-(note, panel) document records with authority-assigned versions
//! - The DocumentProvider cache with stale-save conflict resolution
//! - Typed conflict events and per-editor conflict listeners
//! - Snapshot fallback rules for offline/initial-load bootstrapping
//! - RemoteStore and EditorSurface trait abstractions

pub mod autosave;
pub mod bootstrap;
pub mod client_id;
pub mod content;
pub mod events;
pub mod key;
pub mod listener;
pub mod provider;
pub mod snapshot;
pub mod store;

pub use autosave::{Autosave, AutosaveConfig};
pub use bootstrap::{BootstrapState, LoadFallback, PanelBootstrap, PanelMetadata};
pub use client_id::{ClientId, ClientIdError};
pub use content::PanelContent;
pub use events::{DocumentEvent, EventBus, Subscription};
pub use key::{DocumentKey, KeyError, NoteId, PanelId, MAIN_PANEL};
pub use listener::{ConflictListener, EditorSurface};
pub use provider::{DocumentProvider, DocumentRecord, EditState, ProviderError};
pub use snapshot::{NoteSnapshot, PanelSnapshot, SnapshotStore};
pub use store::{InMemoryRemote, RemoteDocument, RemoteStore, StoreError, Version};
