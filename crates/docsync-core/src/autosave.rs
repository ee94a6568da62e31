//! Debounced autosave for one editor surface.
//!
//! The editor layer (not the provider) owns save timing: rapid local edits
//! are coalesced and only the newest body is written once the debounce
//! window passes without further edits. An explicit `flush` covers editor
//! unmount.
//!
//! Save outcomes are absorbed here: a conflict is already fully handled by
//! the provider/listener pair by the time it surfaces, and transport errors
//! must not take down the editor, so both are logged and swallowed.

use crate::content::PanelContent;
use crate::key::DocumentKey;
use crate::provider::{DocumentProvider, ProviderError};
use crate::store::{RemoteStore, Version};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Tunables for autosave behavior.
#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    /// How long to wait after the last edit before saving.
    pub debounce: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
        }
    }
}

#[derive(Default)]
struct PendingEdit {
    content: Option<PanelContent>,
    /// Bumped on every edit; a sleeping flush task only fires if its
    /// generation is still current when it wakes.
    generation: u64,
}

/// Debounced autosave handle for one document key.
///
/// Must be used within a Tokio runtime; `record_edit` spawns the deferred
/// flush task.
pub struct Autosave<R: RemoteStore + 'static> {
    provider: DocumentProvider<R>,
    key: DocumentKey,
    config: AutosaveConfig,
    pending: Arc<Mutex<PendingEdit>>,
}

impl<R: RemoteStore + 'static> Autosave<R> {
    pub fn new(provider: DocumentProvider<R>, key: DocumentKey, config: AutosaveConfig) -> Self {
        Self {
            provider,
            key,
            config,
            pending: Arc::new(Mutex::new(PendingEdit::default())),
        }
    }

    /// Record a local edit, (re)starting the debounce window.
    pub fn record_edit(&self, content: PanelContent) {
        let generation = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.generation += 1;
            pending.content = Some(content);
            pending.generation
        };

        let provider = self.provider.clone();
        let key = self.key.clone();
        let pending = Arc::clone(&self.pending);
        let debounce = self.config.debounce;

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let content = {
                let mut guard = pending.lock().unwrap_or_else(|e| e.into_inner());
                if guard.generation != generation {
                    // A newer edit restarted the window
                    return;
                }
                guard.content.take()
            };
            if let Some(content) = content {
                save_quietly(&provider, &key, content).await;
            }
        });
    }

    /// Save any pending edit immediately, bypassing the debounce window.
    ///
    /// Returns the new version if a save was performed and accepted.
    pub async fn flush(&self) -> Option<Version> {
        let content = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            // Invalidate any sleeping flush task
            pending.generation += 1;
            pending.content.take()
        }?;
        save_quietly(&self.provider, &self.key, content).await
    }

    /// True if an edit is waiting for its debounce window.
    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .content
            .is_some()
    }
}

/// Save with the provider's current cached version as base, absorbing
/// every failure mode into logs.
async fn save_quietly<R: RemoteStore>(
    provider: &DocumentProvider<R>,
    key: &DocumentKey,
    content: PanelContent,
) -> Option<Version> {
    let base_version = provider.get_document_version(key);
    match provider.save(key, content, base_version).await {
        Ok(version) => {
            debug!("Autosaved {} at version {}", key, version);
            Some(version)
        }
        Err(ProviderError::Conflict { remote_version, .. }) => {
            // The provider has already re-synced and the listener owns the
            // user-visible outcome.
            debug!(
                "Autosave for {} lost to remote version {}",
                key, remote_version
            );
            None
        }
        Err(err) => {
            warn!("Autosave failed for {}: {}", key, err);
            None
        }
    }
}
