//! Core data model: rows, playlists, stations and library files

use crate::error::{SyncError, SyncResult};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// On-disk token marking a row for deletion
pub const DELETE_MARKER: &str = "[DEL]";

/// Whether a row's album has been confirmed by a lookup (or manual intent)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationState {
    #[default]
    Unknown,
    Confirmed,
    Failed,
}

impl ValidationState {
    /// Parse a `Validated` cell; unrecognized text is `Unknown`
    pub fn parse(cell: &str) -> Self {
        match cell.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "confirmed" => ValidationState::Confirmed,
            "failed" | "rejected" => ValidationState::Failed,
            _ => ValidationState::Unknown,
        }
    }

    pub fn as_csv(&self) -> &'static str {
        match self {
            ValidationState::Unknown => "false",
            ValidationState::Confirmed => "true",
            ValidationState::Failed => "failed",
        }
    }
}

/// Normalized `(artist, title)` pair identifying a song across the system
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IdentityKey {
    pub artist: String,
    pub title: String,
}

impl IdentityKey {
    pub fn new(artist: &str, title: &str) -> Self {
        Self {
            artist: normalize_component(artist),
            title: normalize_component(title),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.artist, self.title)
    }
}

/// Lowercase and collapse internal whitespace. Path separators count as
/// whitespace so a key survives the file name sanitization round trip.
fn normalize_component(value: &str) -> String {
    value
        .replace(['/', '\\'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Leading four-digit year of a free-form year or date value
pub fn normalize_year(value: &str) -> Option<String> {
    let digits: String = value.trim().chars().take(4).collect();
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits)
    } else {
        None
    }
}

/// One declared entry in a playlist
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SongRecord {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub validated: ValidationState,
    /// Explicit fetch pointer that bypasses discovery
    pub override_source: Option<String>,
    pub delete_marker: bool,
    /// Cells of non-canonical columns, aligned with `Playlist::extra_columns`
    pub extras: Vec<String>,
}

impl SongRecord {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(&self.artist, &self.title)
    }

    /// Number of non-empty optional metadata fields
    pub fn completeness(&self) -> usize {
        [&self.album, &self.year, &self.genre, &self.override_source]
            .iter()
            .filter(|field| field.as_deref().is_some_and(|v| !v.is_empty()))
            .count()
    }

    pub fn has_override(&self) -> bool {
        self.override_source.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Embedded tag values of an audio file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagSnapshot {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
}

/// An observed audio file in a playlist folder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryFile {
    pub path: PathBuf,
    /// Key resolved from the file name or, failing that, the embedded tags
    pub identity_key: IdentityKey,
    /// Artist and title the key was resolved from
    pub file_artist: String,
    pub file_title: String,
    pub tags: TagSnapshot,
}

/// A row carrying the delete marker, anchored where it was declared
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDeletion {
    pub row: SongRecord,
    /// Key of the nearest live row above it; `None` when no live row precedes it
    pub follows: Option<IdentityKey>,
}

/// Named, ordered sequence of rows plus the folder of its audio files
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playlist {
    pub name: String,
    pub folder: PathBuf,
    pub source_path: PathBuf,
    pub songs: Vec<SongRecord>,
    /// Rows carrying a delete marker, kept out of `songs`
    pub pending_deletions: Vec<PendingDeletion>,
    /// Header names of non-canonical columns, in file order
    pub extra_columns: Vec<String>,
}

impl Playlist {
    pub fn position_of(&self, key: &IdentityKey) -> Option<usize> {
        self.songs.iter().position(|s| &s.identity_key() == key)
    }
}

/// A named station rooted at `<stations_root>/<name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub name: String,
    pub root: PathBuf,
}

impl Station {
    pub fn new(stations_root: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            root: stations_root.join(name),
        }
    }

    pub fn playlists_dir(&self) -> PathBuf {
        self.root.join("playlists")
    }

    pub fn library_root(&self) -> PathBuf {
        self.root.join("songs")
    }

    pub fn playlist_folder(&self, playlist_name: &str) -> PathBuf {
        self.library_root().join(playlist_name)
    }

    pub fn duplicate_report_path(&self) -> PathBuf {
        self.root.join("duplicate_analysis.log")
    }

    pub fn unvalidated_report_path(&self) -> PathBuf {
        self.root.join("albums_not_validated.csv")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".ncast-sync.lock")
    }

    /// Playlist files (`*.csv`) sorted by file name
    pub fn discover_playlists(&self) -> SyncResult<Vec<PathBuf>> {
        let dir = self.playlists_dir();
        let entries = std::fs::read_dir(&dir).map_err(|e| SyncError::io(&dir, e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::io(&dir, e))?;
            let path = entry.path();
            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if is_csv && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// Result of confirming a row's album
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationOutcome {
    Confirmed(String),
    Rejected(String),
}

/// Identity key found more than once across a station's playlists
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub key: IdentityKey,
    /// Containing playlists, one entry per distinct playlist
    pub playlists: Vec<String>,
    /// Total occurrences before in-playlist deduplication
    pub occurrences: usize,
}
