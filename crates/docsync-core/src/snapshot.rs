//! Snapshot persistence for offline/initial-load bootstrapping.
//!
//! Snapshots are written on local mutation and read once at editor mount,
//! before the provider has answered. They are keyed by note id, one JSON
//! file per note under `<data-dir>/.docsync/snapshots/`, mapping panel id to
//! best-effort cached metadata (and, for branch panels historically, stale
//! content). A snapshot is never authoritative once the provider holds a
//! loaded record for the same key; see `bootstrap` for the rules.

use crate::content::PanelContent;
use crate::key::{NoteId, PanelId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Snapshot files live here, relative to the client data dir.
const SNAPSHOT_DIR: &str = ".docsync/snapshots";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Best-effort cached state for one panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PanelSnapshot {
    /// Panel title, safe to show before the provider answers.
    pub title: Option<String>,
    /// Short plain-text preview, safe to show before the provider answers.
    pub preview: Option<String>,
    /// Full content. Present for branch panels for historical reasons; only
    /// ever applied as the offline fallback, never as an early paint.
    pub content: Option<PanelContent>,
    /// When this snapshot was written (unix timestamp ms).
    pub updated_at: u64,
}

/// All snapshotted panels of one note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteSnapshot {
    pub note: NoteId,
    pub panels: HashMap<PanelId, PanelSnapshot>,
}

impl NoteSnapshot {
    pub fn new(note: NoteId) -> Self {
        Self {
            note,
            panels: HashMap::new(),
        }
    }

    /// Add or replace the snapshot for one panel.
    pub fn upsert_panel(&mut self, panel: PanelId, snapshot: PanelSnapshot) {
        self.panels.insert(panel, snapshot);
    }

    pub fn panel(&self, panel: &PanelId) -> Option<&PanelSnapshot> {
        self.panels.get(panel)
    }
}

/// Disk-backed store for note snapshots.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Create a store rooted at the client data directory.
    ///
    /// Snapshot files live under `<data-dir>/.docsync/snapshots/`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join(SNAPSHOT_DIR),
        }
    }

    fn path_for(&self, note: &NoteId) -> PathBuf {
        self.dir.join(format!("{note}.json"))
    }

    /// Load the snapshot for a note, if one was ever written.
    pub fn load(&self, note: &NoteId) -> Result<Option<NoteSnapshot>> {
        let path = self.path_for(note);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Write a note's snapshot to disk.
    pub fn save(&self, snapshot: &NoteSnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let contents = serde_json::to_string_pretty(snapshot)?;
        fs::write(self.path_for(&snapshot.note), contents)?;
        Ok(())
    }

    /// Upsert one panel's snapshot, creating the note file if needed.
    pub fn record_panel(
        &self,
        note: &NoteId,
        panel: PanelId,
        snapshot: PanelSnapshot,
    ) -> Result<()> {
        let mut note_snapshot = self
            .load(note)?
            .unwrap_or_else(|| NoteSnapshot::new(note.clone()));
        note_snapshot.upsert_panel(panel, snapshot);
        self.save(&note_snapshot)
    }

    /// Delete a note's snapshot file, if present.
    pub fn remove(&self, note: &NoteId) -> Result<()> {
        let path = self.path_for(note);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
