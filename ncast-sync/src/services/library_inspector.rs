//! Library Inspector
//!
//! Enumerates the audio files of a playlist folder, reads their embedded tags
//! through the [`Tagger`] collaborator and links them to playlist rows.
//! Files are expected to be named `Artist - Title.<ext>`.
//!
//! Artists and titles may themselves contain ` - `, so a file name is tried at
//! every separator against the keys the playlist declares before falling
//! back to the embedded tags and then to the first separator.

use crate::collaborators::Tagger;
use crate::error::{SyncError, SyncResult};
use crate::models::{IdentityKey, LibraryFile, Playlist, SongRecord, TagSnapshot, ValidationState};
use crate::services::worker_pool::WorkerPool;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Extensions treated as audio files
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "oga", "m4a", "aac", "mp4", "wav", "opus", "wma",
];

/// A file whose embedded tags could not be read
#[derive(Debug)]
pub struct TagReadError {
    pub path: PathBuf,
    /// Identity taken from the file name, if it has one
    pub key: Option<IdentityKey>,
    pub error: SyncError,
}

/// Result of scanning one playlist folder
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Files linked to an identity, sorted by path
    pub files: Vec<LibraryFile>,
    /// Audio files with neither an `Artist - Title` name nor artist and title tags
    pub unrecognized: Vec<PathBuf>,
    /// Files whose tags could not be read (still listed in `files` when named)
    pub tag_errors: Vec<TagReadError>,
}

impl ScanReport {
    /// First file (in path order) for an identity key
    pub fn find(&self, key: &IdentityKey) -> Option<&LibraryFile> {
        self.files.iter().find(|f| &f.identity_key == key)
    }
}

/// Replace path separators and trim, for use in file names
pub fn sanitize_component(value: &str) -> String {
    value.replace(['/', '\\'], " ").trim().to_string()
}

/// Canonical library file name for a row
pub fn canonical_file_name(artist: &str, title: &str, extension: &str) -> String {
    format!(
        "{} - {}.{}",
        sanitize_component(artist),
        sanitize_component(title),
        extension
    )
}

fn is_audio_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

const SEPARATOR: &str = " - ";

/// Every `(artist, title)` reading of a file stem, splitting at each
/// separator from left to right
fn stem_splits(path: &Path) -> Vec<(String, String)> {
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy()) else {
        return Vec::new();
    };

    stem.match_indices(SEPARATOR)
        .map(|(at, _)| (stem[..at].trim(), stem[at + SEPARATOR.len()..].trim()))
        .filter(|(artist, title)| !artist.is_empty() && !title.is_empty())
        .map(|(artist, title)| (artist.to_string(), title.to_string()))
        .collect()
}

fn tag_identity(tags: &TagSnapshot) -> Option<(String, String)> {
    let artist = tags.artist.as_deref().map(str::trim).filter(|a| !a.is_empty())?;
    let title = tags.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
    Some((artist.to_string(), title.to_string()))
}

/// Artist and title a library file stands for.
///
/// In order: a name split matching a declared key, tags matching a declared
/// key, the tags, the first name split.
fn resolve_identity(
    path: &Path,
    tags: &TagSnapshot,
    declared: &HashSet<IdentityKey>,
) -> Option<(String, String)> {
    let splits = stem_splits(path);
    let from_tags = tag_identity(tags);
    let is_declared =
        |(artist, title): &(String, String)| declared.contains(&IdentityKey::new(artist, title));

    if let Some(split) = splits.iter().find(|split| is_declared(*split)) {
        return Some(split.clone());
    }
    if let Some(pair) = from_tags.as_ref().filter(|pair| is_declared(*pair)) {
        return Some(pair.clone());
    }
    from_tags.or_else(|| splits.into_iter().next())
}

/// Scan `folder` (non-recursively), read the tags of every audio file and
/// link each file to an identity. `declared` holds the keys of the playlist's
/// rows, pending deletions included.
///
/// A missing folder yields an empty report; an unreadable one is an error.
pub async fn scan(
    folder: &Path,
    declared: &HashSet<IdentityKey>,
    tagger: &dyn Tagger,
    pool: &WorkerPool,
    tag_timeout: Duration,
) -> SyncResult<ScanReport> {
    if !folder.exists() {
        tracing::debug!(folder = %folder.display(), "Playlist folder does not exist yet");
        return Ok(ScanReport::default());
    }
    std::fs::read_dir(folder).map_err(|e| SyncError::io(folder, e))?;

    let mut report = ScanReport::default();
    let mut candidates = Vec::new();

    let walker = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(folder = %folder.display(), error = %e, "Error accessing entry");
                continue;
            }
        };
        if entry.file_type().is_file() && is_audio_extension(entry.path()) {
            candidates.push(entry.into_path());
        }
    }

    let parallelism = pool.size();
    let read_results: Vec<_> = stream::iter(candidates)
        .map(|path| async move {
            let tags = pool
                .run(tokio::time::timeout(tag_timeout, tagger.read(&path)))
                .await;
            (path, tags)
        })
        .buffered(parallelism)
        .collect()
        .await;

    for (path, tags) in read_results {
        let (tags, read_error) = match tags {
            Ok(Ok(tags)) => (tags, None),
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read tags");
                let error = SyncError::Tag {
                    path: path.clone(),
                    message: e.to_string(),
                };
                (TagSnapshot::default(), Some(error))
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), "Timed out reading tags");
                let error =
                    SyncError::Transient(format!("tag read timed out for {}", path.display()));
                (TagSnapshot::default(), Some(error))
            }
        };

        let identity = resolve_identity(&path, &tags, declared);
        if let Some(error) = read_error {
            report.tag_errors.push(TagReadError {
                path: path.clone(),
                key: identity.as_ref().map(|(artist, title)| IdentityKey::new(artist, title)),
                error,
            });
        }

        let Some((artist, title)) = identity else {
            tracing::info!(
                path = %path.display(),
                "File has neither 'Artist - Title' naming nor artist and title tags"
            );
            report.unrecognized.push(path);
            continue;
        };

        report.files.push(LibraryFile {
            identity_key: IdentityKey::new(&artist, &title),
            path,
            file_artist: artist,
            file_title: title,
            tags,
        });
    }

    tracing::debug!(
        folder = %folder.display(),
        files = report.files.len(),
        unrecognized = report.unrecognized.len(),
        "Scanned playlist folder"
    );
    Ok(report)
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Fill empty album/year of rows from their file's embedded tags.
///
/// With `trust_embedded_album`, an `Unknown` row whose album equals the
/// embedded album is confirmed without a lookup. Returns the number of
/// distinct songs confirmed this way.
pub fn link_tags(playlist: &mut Playlist, library: &ScanReport, trust_embedded_album: bool) -> usize {
    let mut confirmed = HashSet::new();

    for song in &mut playlist.songs {
        let Some(file) = library.find(&song.identity_key()) else {
            continue;
        };

        if song.album.is_none() {
            song.album = file.tags.album.clone().filter(|a| !a.trim().is_empty());
        }
        if song.year.is_none() {
            song.year = file.tags.year.clone().filter(|y| !y.trim().is_empty());
        }

        let album_matches = match (&song.album, &file.tags.album) {
            (Some(declared), Some(embedded)) => same_text(declared, embedded),
            _ => false,
        };
        if trust_embedded_album
            && album_matches
            && song.validated == ValidationState::Unknown
            && !song.has_override()
        {
            song.validated = ValidationState::Confirmed;
            tracing::debug!(key = %song.identity_key(), "Album confirmed from embedded tags");
            confirmed.insert(song.identity_key());
        }
    }

    confirmed.len()
}

/// Append a row for every file without a matching row.
///
/// Artist and title come from the tags when they match the file's identity,
/// otherwise from the file name. Keys in `excluded` are never added.
/// Returns the number of rows added.
pub fn backfill(
    playlist: &mut Playlist,
    library: &ScanReport,
    excluded: &HashSet<IdentityKey>,
) -> usize {
    let mut known: HashSet<IdentityKey> = playlist.songs.iter().map(SongRecord::identity_key).collect();
    let mut added = 0;

    for file in &library.files {
        if known.contains(&file.identity_key) || excluded.contains(&file.identity_key) {
            continue;
        }

        let (artist, title) = match (&file.tags.artist, &file.tags.title) {
            (Some(artist), Some(title)) if IdentityKey::new(artist, title) == file.identity_key => {
                (artist.trim().to_string(), title.trim().to_string())
            }
            _ => (file.file_artist.clone(), file.file_title.clone()),
        };

        let song = SongRecord {
            artist,
            title,
            album: file.tags.album.clone().filter(|a| !a.trim().is_empty()),
            year: file.tags.year.clone().filter(|y| !y.trim().is_empty()),
            validated: ValidationState::Unknown,
            extras: vec![String::new(); playlist.extra_columns.len()],
            ..Default::default()
        };

        tracing::info!(playlist = %playlist.name, key = %file.identity_key, "Backfilled row from library file");
        known.insert(file.identity_key.clone());
        playlist.songs.push(song);
        added += 1;
    }

    added
}
