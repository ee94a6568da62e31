//! Panel content: the structured rich-text body of one document.
//!
//! The sync protocol treats content as an opaque whole-document value (saves
//! replace the entire body, conflicts adopt the remote body wholesale), so
//! this wrapper exposes only what the surrounding layers need: construction,
//! plain-text extraction for previews, and wire bytes.
//!
//! The representation is a JSON node tree in the shape editors produce:
//! `{"type": "doc", "content": [{"type": "paragraph", "content": [...]}]}`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Malformed content bytes: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The structured rich-text body of one panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PanelContent(Value);

impl PanelContent {
    /// An empty document (a `doc` node with no children).
    pub fn empty() -> Self {
        Self(json!({ "type": "doc", "content": [] }))
    }

    /// Wrap an already-structured node tree.
    pub fn from_json(value: Value) -> Self {
        Self(value)
    }

    /// Build a single-paragraph document from plain text.
    pub fn from_text(text: &str) -> Self {
        Self(json!({
            "type": "doc",
            "content": [{
                "type": "paragraph",
                "content": [{ "type": "text", "text": text }],
            }],
        }))
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }

    /// True if the tree contains no text at all.
    pub fn is_empty(&self) -> bool {
        self.plain_text().is_empty()
    }

    /// Collect the text of every `text` node, in document order.
    ///
    /// Block boundaries are not preserved; this is for previews and
    /// snapshot metadata, not for rendering.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        collect_text(&self.0, &mut out);
        out
    }

    /// First `max_chars` characters of the plain text.
    pub fn preview(&self, max_chars: usize) -> String {
        self.plain_text().chars().take(max_chars).collect()
    }

    /// Serialize for the wire (JSON bytes inside a binary envelope).
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).expect("JSON value serialization should not fail")
    }

    /// Parse wire bytes back into content.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ContentError> {
        Ok(Self(serde_json::from_slice(bytes)?))
    }
}

fn collect_text(node: &Value, out: &mut String) {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                out.push_str(text);
            }
            if let Some(Value::Array(children)) = map.get("content") {
                for child in children {
                    collect_text(child, out);
                }
            }
        }
        Value::Array(nodes) => {
            for n in nodes {
                collect_text(n, out);
            }
        }
        _ => {}
    }
}
