//! Per-key bootstrap state machine for editor mount.
//!
//! Governs what an editor may paint before, during, and after the first
//! provider load: `Unloaded -> SnapshotApplied -> ProviderLoaded`, one
//! directional and non-reentrant per key.
//!
//! The rules exist to prevent one specific bug class: a stale local snapshot
//! being painted (or re-applied) over authoritative content that another
//! device already advanced. Snapshot content is therefore only ever shown
//! when the provider has never answered for the key and the remote is
//! unreachable.

use crate::content::PanelContent;
use crate::key::DocumentKey;
use crate::provider::DocumentRecord;
use crate::snapshot::PanelSnapshot;
use crate::store::{StoreError, Version};
use tracing::debug;

/// Bootstrap progress for one document key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapState {
    /// Nothing painted yet.
    #[default]
    Unloaded,
    /// Snapshot metadata painted for instant first render.
    SnapshotApplied,
    /// Provider content painted; snapshots are dead for this key.
    ProviderLoaded,
}

/// Metadata fields that are always safe to paint before the provider
/// answers. Deliberately excludes content.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelMetadata {
    pub title: Option<String>,
    pub preview: Option<String>,
}

/// What the editor should show after a failed load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadFallback {
    /// Offline and never loaded: the possibly-stale snapshot content is the
    /// best available state.
    SnapshotContent(PanelContent),
    /// Show a loading/error state. Stale snapshot data must not be
    /// resurrected once the provider has answered for this key.
    ErrorState,
}

/// Bootstrap coordinator for one editor surface.
pub struct PanelBootstrap {
    key: DocumentKey,
    state: BootstrapState,
}

impl PanelBootstrap {
    pub fn new(key: DocumentKey) -> Self {
        Self {
            key,
            state: BootstrapState::Unloaded,
        }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Offer a snapshot for the instant-paint path.
    ///
    /// Returns the metadata to paint only when nothing has been painted yet
    /// AND the provider holds no record for the key (`provider_version` 0).
    /// Content fields are never part of the early paint.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &PanelSnapshot,
        provider_version: Version,
    ) -> Option<PanelMetadata> {
        if self.state != BootstrapState::Unloaded || provider_version != 0 {
            debug!(
                "Skipping snapshot paint for {} (state {:?}, provider version {})",
                self.key, self.state, provider_version
            );
            return None;
        }
        self.state = BootstrapState::SnapshotApplied;
        Some(PanelMetadata {
            title: snapshot.title.clone(),
            preview: snapshot.preview.clone(),
        })
    }

    /// A provider load succeeded. The returned content unconditionally
    /// supersedes anything painted from a snapshot, even mid-keystroke:
    /// freshness wins over avoiding a visual jump.
    pub fn provider_loaded(&mut self, record: &DocumentRecord) -> PanelContent {
        self.state = BootstrapState::ProviderLoaded;
        record.content.clone()
    }

    /// A provider load failed. Decide what the editor may show.
    pub fn load_failed(
        &mut self,
        error: &StoreError,
        snapshot: Option<&PanelSnapshot>,
        provider_version: Version,
    ) -> LoadFallback {
        if self.state == BootstrapState::ProviderLoaded {
            return LoadFallback::ErrorState;
        }

        // Snapshot content is only a valid fallback while the key has never
        // been synchronized and the failure is transport-level.
        if provider_version == 0 {
            if let StoreError::Unavailable(_) = error {
                if let Some(content) = snapshot.and_then(|s| s.content.clone()) {
                    debug!("Falling back to snapshot content for {}", self.key);
                    self.state = BootstrapState::SnapshotApplied;
                    return LoadFallback::SnapshotContent(content);
                }
            }
        }

        LoadFallback::ErrorState
    }
}
