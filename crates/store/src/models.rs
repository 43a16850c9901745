use serde::{Deserialize, Serialize};
use std::fmt;

/// One catalog entry describing a playable track.
///
/// Identity is the `path`; everything else is replaced wholesale whenever the
/// remote catalog re-sends the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub path: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub title: String,
    /// Display string, as sent by the remote catalog (e.g. `"3:41"`).
    #[serde(default)]
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl CatalogRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            artist: String::new(),
            album: String::new(),
            title: String::new(),
            duration: String::new(),
            size: None,
        }
    }

    /// File extension of the track path, lower-cased (`"mp3"`, `"wav"`, ...).
    pub fn extension(&self) -> Option<String> {
        let name = self.path.rsplit('/').next()?;
        let (_, ext) = name.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }
}

/// Position marker for how much of the remote catalog has been applied.
///
/// Opaque to the client: it is only ever compared, persisted, and sent back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(pub u64);

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for SyncCursor {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// An incremental change set from the remote catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogBatch {
    pub cursor: SyncCursor,
    pub added: Vec<CatalogRecord>,
    pub removed: Vec<String>,
}

impl CatalogBatch {
    /// An acknowledgment batch: advances (or repeats) the cursor, changes nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
