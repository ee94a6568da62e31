//! Document keys: composite identifiers for editable panels.
//!
//! A [`DocumentKey`] addresses one editable document instance: the pair of a
//! note and one of its panels (the main body, or a branch/annotation panel).
//! Keys have a canonical string form `"<note>/<panel>"` used in logs, wire
//! messages, and persisted snapshot files.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Well-known panel id for a note's main body.
pub const MAIN_PANEL: &str = "main";

#[derive(Debug, Error, PartialEq)]
pub enum KeyError {
    #[error("empty {0} id")]
    Empty(&'static str),

    #[error("{0} id may not contain '/': {1}")]
    InvalidChar(&'static str, String),

    #[error("invalid document key: expected '<note>/<panel>', got {0:?}")]
    InvalidFormat(String),
}

/// Identifier for a note. Opaque string, no '/' allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NoteId(String);

impl NoteId {
    pub fn new(id: impl Into<String>) -> Result<Self, KeyError> {
        let id = id.into();
        validate_component("note", &id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NoteId {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for NoteId {
    type Error = KeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<NoteId> for String {
    fn from(id: NoteId) -> String {
        id.0
    }
}

/// Identifier for a panel within a note.
///
/// The main body uses the well-known id `"main"`; branch panels get a
/// generated UUID when the editor opens them for the first time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PanelId(String);

impl PanelId {
    pub fn new(id: impl Into<String>) -> Result<Self, KeyError> {
        let id = id.into();
        validate_component("panel", &id)?;
        Ok(Self(id))
    }

    /// The main-body panel id.
    pub fn main() -> Self {
        Self(MAIN_PANEL.to_string())
    }

    /// Generate a fresh branch-panel id.
    pub fn branch() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn is_main(&self) -> bool {
        self.0 == MAIN_PANEL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PanelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PanelId {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PanelId {
    type Error = KeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<PanelId> for String {
    fn from(id: PanelId) -> String {
        id.0
    }
}

fn validate_component(kind: &'static str, id: &str) -> Result<(), KeyError> {
    if id.is_empty() {
        return Err(KeyError::Empty(kind));
    }
    if id.contains('/') {
        return Err(KeyError::InvalidChar(kind, id.to_string()));
    }
    Ok(())
}

/// Composite identifier for one editable document: `(note, panel)`.
///
/// Immutable once assigned. Canonical string form is `"<note>/<panel>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    note: NoteId,
    panel: PanelId,
}

impl DocumentKey {
    pub fn new(note: NoteId, panel: PanelId) -> Self {
        Self { note, panel }
    }

    /// Key for a note's main panel.
    pub fn main(note: NoteId) -> Self {
        Self::new(note, PanelId::main())
    }

    /// Key for a freshly created branch panel on `note`.
    pub fn new_branch(note: NoteId) -> Self {
        Self::new(note, PanelId::branch())
    }

    pub fn note(&self) -> &NoteId {
        &self.note
    }

    pub fn panel(&self) -> &PanelId {
        &self.panel
    }
}

impl Display for DocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.note, self.panel)
    }
}

impl FromStr for DocumentKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (note, panel) = s
            .split_once('/')
            .ok_or_else(|| KeyError::InvalidFormat(s.to_string()))?;
        // A second '/' means the panel component is malformed
        if panel.contains('/') {
            return Err(KeyError::InvalidFormat(s.to_string()));
        }
        Ok(Self::new(NoteId::new(note)?, PanelId::new(panel)?))
    }
}

// Serialize as the canonical string for consistency in logs, wire, JSON
impl serde::Serialize for DocumentKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for DocumentKey {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
