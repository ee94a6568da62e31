//! The authoritative document store.
//!
//! Holds the canonical `(content, version)` per document key and enforces
//! serializable version progression: a put must name the current version as
//! its base, and at most one put per version number ever succeeds. There is
//! no lock held across client save attempts; this is compare-and-swap on the
//! version, decided entirely inside `put`.
//!
//! Documents are persisted to `<data-dir>/.docsync/documents.json` after
//! every accepted put and reloaded on open, so the authority survives
//! restarts.

use crate::message::{StoreRequest, StoreResponse, WireError};
use anyhow::Result;
use docsync_core::{DocumentKey, PanelContent, Version};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const DOCUMENTS_FILE: &str = ".docsync/documents.json";

/// One document as stored by the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub content: PanelContent,
    pub version: Version,
    /// When the current version was written (unix timestamp ms).
    pub updated_at: u64,
}

/// Outcome of a put attempt.
#[derive(Debug, PartialEq)]
pub enum PutOutcome {
    /// Accepted; the newly assigned version.
    Saved(Version),
    /// Rejected; the base version is behind the authoritative version.
    Stale { remote_version: Version },
}

/// The authoritative store behind the wire protocol.
pub struct DocumentAuthority {
    path: PathBuf,
    documents: HashMap<DocumentKey, StoredDocument>,
}

impl DocumentAuthority {
    /// Open the authority for a data directory, loading persisted
    /// documents if any exist.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(DOCUMENTS_FILE);
        let documents = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            HashMap::new()
        };

        Ok(Self { path, documents })
    }

    /// Number of stored documents.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Current state of a document, if it was ever created.
    pub fn get(&self, key: &DocumentKey) -> Option<&StoredDocument> {
        self.documents.get(key)
    }

    /// Attempt to store `content` at `base_version + 1`.
    ///
    /// The compare and the swap happen under `&mut self`, so concurrent
    /// clients racing on the same base are serialized here: the first one
    /// wins the version number, everyone else gets `Stale`.
    pub fn put(
        &mut self,
        key: &DocumentKey,
        content: PanelContent,
        base_version: Version,
    ) -> Result<PutOutcome> {
        let current = self.documents.get(key).map(|d| d.version).unwrap_or(0);
        if base_version != current {
            debug!(
                "Rejecting stale put for {} (base {}, current {})",
                key, base_version, current
            );
            return Ok(PutOutcome::Stale {
                remote_version: current,
            });
        }

        let new_version = current + 1;
        self.documents.insert(
            key.clone(),
            StoredDocument {
                content,
                version: new_version,
                updated_at: now_ms(),
            },
        );
        self.persist()?;
        debug!("Stored {} at version {}", key, new_version);
        Ok(PutOutcome::Saved(new_version))
    }

    /// Route one decoded wire request to the store.
    pub fn handle_request(&mut self, request: StoreRequest) -> StoreResponse {
        let request_id = request.request_id();
        match request {
            StoreRequest::Fetch { key, .. } => {
                let key = match key.parse::<DocumentKey>() {
                    Ok(key) => key,
                    Err(e) => return bad_request(request_id, e.to_string()),
                };
                match self.get(&key) {
                    Some(doc) => StoreResponse::Document {
                        request_id,
                        content: doc.content.to_bytes(),
                        version: doc.version,
                    },
                    None => StoreResponse::Failure {
                        request_id,
                        error: WireError::NotFound,
                    },
                }
            }

            StoreRequest::Put {
                key,
                content,
                base_version,
                ..
            } => {
                let key = match key.parse::<DocumentKey>() {
                    Ok(key) => key,
                    Err(e) => return bad_request(request_id, e.to_string()),
                };
                let content = match PanelContent::from_bytes(&content) {
                    Ok(content) => content,
                    Err(e) => return bad_request(request_id, e.to_string()),
                };
                match self.put(&key, content, base_version) {
                    Ok(PutOutcome::Saved(version)) => StoreResponse::Saved {
                        request_id,
                        version,
                    },
                    Ok(PutOutcome::Stale { remote_version }) => StoreResponse::Failure {
                        request_id,
                        error: WireError::Stale { remote_version },
                    },
                    Err(e) => {
                        warn!("Put failed for {}: {}", key, e);
                        StoreResponse::Failure {
                            request_id,
                            error: WireError::Internal {
                                message: e.to_string(),
                            },
                        }
                    }
                }
            }
        }
    }

    /// Save all documents to disk.
    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.documents)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

fn bad_request(request_id: u64, message: String) -> StoreResponse {
    StoreResponse::Failure {
        request_id,
        error: WireError::BadRequest { message },
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
