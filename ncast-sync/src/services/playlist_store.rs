//! Playlist Store: CSV parsing and serialization
//!
//! One CSV file per playlist with the canonical columns
//! `Artist,Title,Album,Year,Genre,Validated,OverrideUrl` followed by any
//! additional columns, which are preserved verbatim.
//!
//! Parsing is best effort: a malformed row is skipped and reported as a
//! [`RowFormatError`], while a file without `Artist`/`Title` columns fails as a
//! whole. Rows marked for deletion are moved to `Playlist::pending_deletions`
//! and written back in their declared position while they stay pending.

use crate::error::{RowFormatError, SyncError, SyncResult};
use crate::models::{
    IdentityKey, PendingDeletion, Playlist, SongRecord, Station, ValidationState, DELETE_MARKER,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const CANONICAL_COLUMNS: [&str; 7] = [
    "Artist",
    "Title",
    "Album",
    "Year",
    "Genre",
    "Validated",
    "OverrideUrl",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Artist,
    Title,
    Album,
    Year,
    Genre,
    Validated,
    Override,
    Extra(usize),
}

fn header_key(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .collect::<String>()
        .to_lowercase()
}

fn classify_headers(headers: &csv::StringRecord) -> (Vec<Column>, Vec<String>) {
    let mut columns = Vec::with_capacity(headers.len());
    let mut extras = Vec::new();

    for name in headers.iter() {
        let column = match header_key(name).as_str() {
            "artist" => Column::Artist,
            "title" => Column::Title,
            "album" => Column::Album,
            "year" => Column::Year,
            "genre" => Column::Genre,
            "validated" => Column::Validated,
            "overrideurl" | "override" | "overridesource" => Column::Override,
            _ => {
                extras.push(name.to_string());
                Column::Extra(extras.len() - 1)
            }
        };
        columns.push(column);
    }

    (columns, extras)
}

/// Trimmed cell value; empty and `nan` cells are absent
fn clean_cell(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Strip a leading delete marker, returning the remaining text
fn strip_delete_marker(value: &str) -> Option<&str> {
    let head = value.get(..DELETE_MARKER.len())?;
    if head.eq_ignore_ascii_case(DELETE_MARKER) {
        value.get(DELETE_MARKER.len()..).map(str::trim)
    } else {
        None
    }
}

/// Split the legacy `[https://url] Artist` encoding
fn split_legacy_override(artist: &str) -> Option<(String, String)> {
    let rest = artist.strip_prefix('[')?;
    let (inner, remainder) = rest.split_once(']')?;
    let inner = inner.trim();
    if inner.starts_with("http://") || inner.starts_with("https://") {
        Some((inner.to_string(), remainder.trim().to_string()))
    } else {
        None
    }
}

fn parse_row(
    record: &csv::StringRecord,
    columns: &[Column],
    extra_count: usize,
) -> Result<SongRecord, String> {
    if record.len() > columns.len() {
        return Err(format!(
            "expected at most {} fields, found {}",
            columns.len(),
            record.len()
        ));
    }

    let mut song = SongRecord {
        extras: vec![String::new(); extra_count],
        ..Default::default()
    };
    let mut artist_cell = None;
    let mut title_cell = None;
    let mut override_cell = None;

    for (column, value) in columns.iter().zip(record.iter()) {
        match column {
            Column::Artist => artist_cell = clean_cell(value),
            Column::Title => title_cell = clean_cell(value),
            Column::Album => song.album = clean_cell(value),
            Column::Year => song.year = clean_cell(value),
            Column::Genre => song.genre = clean_cell(value),
            Column::Validated => {
                let cell = value.trim();
                if cell.eq_ignore_ascii_case(DELETE_MARKER) || cell.eq_ignore_ascii_case("delete") {
                    song.delete_marker = true;
                } else {
                    song.validated = ValidationState::parse(cell);
                }
            }
            Column::Override => override_cell = clean_cell(value),
            Column::Extra(index) => song.extras[*index] = value.to_string(),
        }
    }

    let mut artist = artist_cell.unwrap_or_default();
    let mut title = title_cell.unwrap_or_default();

    if let Some(rest) = strip_delete_marker(&artist) {
        artist = rest.to_string();
        song.delete_marker = true;
    }
    if let Some(rest) = strip_delete_marker(&title) {
        title = rest.to_string();
        song.delete_marker = true;
    }
    if let Some((url, rest)) = split_legacy_override(&artist) {
        artist = rest;
        song.override_source = Some(url);
    }
    if override_cell.is_some() {
        song.override_source = override_cell;
    }

    if artist.is_empty() || title.is_empty() {
        return Err("missing artist or title".to_string());
    }

    song.artist = artist;
    song.title = title;
    Ok(song)
}

/// Parse playlist bytes. `source_path` is used for naming and error context.
pub fn parse(
    bytes: &[u8],
    source_path: &Path,
    folder: PathBuf,
) -> SyncResult<(Playlist, Vec<RowFormatError>)> {
    let format_error = |message: String| SyncError::Format {
        path: source_path.to_path_buf(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| format_error(format!("unreadable header: {}", e)))?
        .clone();
    let (columns, extra_columns) = classify_headers(&headers);

    for required in [Column::Artist, Column::Title] {
        if !columns.contains(&required) {
            return Err(format_error(format!("missing required column {:?}", required)));
        }
    }

    let name = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut playlist = Playlist {
        name,
        folder,
        source_path: source_path.to_path_buf(),
        extra_columns,
        ..Default::default()
    };
    let mut skipped = Vec::new();
    let mut last_live: Option<IdentityKey> = None;

    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                skipped.push(RowFormatError {
                    line,
                    message: e.to_string(),
                });
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        match parse_row(&record, &columns, playlist.extra_columns.len()) {
            Ok(song) if song.delete_marker => playlist.pending_deletions.push(PendingDeletion {
                row: song,
                follows: last_live.clone(),
            }),
            Ok(song) => {
                last_live = Some(song.identity_key());
                playlist.songs.push(song);
            }
            Err(message) => skipped.push(RowFormatError { line, message }),
        }
    }

    for error in &skipped {
        tracing::warn!(
            playlist = %playlist.name,
            line = error.line,
            error = %error.message,
            "Skipping malformed playlist row"
        );
    }

    Ok((playlist, skipped))
}

/// Load a playlist file
pub fn load(path: &Path, folder: PathBuf) -> SyncResult<(Playlist, Vec<RowFormatError>)> {
    let bytes = std::fs::read(path).map_err(|e| SyncError::io(path, e))?;
    parse(&bytes, path, folder)
}

fn write_song(
    writer: &mut csv::Writer<Vec<u8>>,
    song: &SongRecord,
    title: &str,
    validated: &str,
    extra_count: usize,
) -> csv::Result<()> {
    let mut row: Vec<&str> = vec![
        song.artist.as_str(),
        title,
        song.album.as_deref().unwrap_or(""),
        song.year.as_deref().unwrap_or(""),
        song.genre.as_deref().unwrap_or(""),
        validated,
        song.override_source.as_deref().unwrap_or(""),
    ];
    for index in 0..extra_count {
        row.push(song.extras.get(index).map(String::as_str).unwrap_or(""));
    }
    writer.write_record(&row)
}

fn write_deletion(
    writer: &mut csv::Writer<Vec<u8>>,
    deletion: &PendingDeletion,
    extra_count: usize,
) -> csv::Result<()> {
    let song = &deletion.row;
    let title = format!("{} {}", DELETE_MARKER, song.title);
    write_song(writer, song, &title, song.validated.as_csv(), extra_count)
}

/// Write the not yet written deletions anchored to `anchor`
fn write_deletions_after(
    writer: &mut csv::Writer<Vec<u8>>,
    playlist: &Playlist,
    written: &mut [bool],
    anchor: Option<&IdentityKey>,
) -> csv::Result<()> {
    let extra_count = playlist.extra_columns.len();
    for (deletion, done) in playlist.pending_deletions.iter().zip(written.iter_mut()) {
        if !*done && deletion.follows.as_ref() == anchor {
            write_deletion(writer, deletion, extra_count)?;
            *done = true;
        }
    }
    Ok(())
}

/// Serialize a playlist in canonical layout.
///
/// Deletions still pending (because applying them failed or the run was a
/// dry run) are written back with the delete marker so they are retried. Each
/// goes right after the live row it followed; one whose row is gone goes last.
pub fn render(playlist: &Playlist) -> SyncResult<Vec<u8>> {
    let format_error = |message: String| SyncError::Format {
        path: playlist.source_path.clone(),
        message,
    };

    let extra_count = playlist.extra_columns.len();
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header: Vec<&str> = CANONICAL_COLUMNS.to_vec();
    header.extend(playlist.extra_columns.iter().map(String::as_str));
    writer
        .write_record(&header)
        .map_err(|e| format_error(e.to_string()))?;

    let mut written = vec![false; playlist.pending_deletions.len()];
    write_deletions_after(&mut writer, playlist, &mut written, None)
        .map_err(|e| format_error(e.to_string()))?;

    for song in &playlist.songs {
        write_song(&mut writer, song, &song.title, song.validated.as_csv(), extra_count)
            .map_err(|e| format_error(e.to_string()))?;
        write_deletions_after(&mut writer, playlist, &mut written, Some(&song.identity_key()))
            .map_err(|e| format_error(e.to_string()))?;
    }

    for (deletion, done) in playlist.pending_deletions.iter().zip(&written) {
        if !done {
            write_deletion(&mut writer, deletion, extra_count)
                .map_err(|e| format_error(e.to_string()))?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| format_error(e.to_string()))
}

/// Atomically write the playlist if its rendering differs from the file.
///
/// Returns whether the file was rewritten.
pub fn save(playlist: &Playlist) -> SyncResult<bool> {
    let rendered = render(playlist)?;
    let path = &playlist.source_path;

    match std::fs::read(path) {
        Ok(existing) if existing == rendered => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(SyncError::io(path, e)),
    }

    ncast_common::fs_util::write_atomic(path, &rendered)?;
    tracing::info!(playlist = %playlist.name, path = %path.display(), "Saved playlist");
    Ok(true)
}

/// Overview of one playlist file
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistListing {
    pub name: String,
    pub path: PathBuf,
    pub songs: usize,
    pub pending_deletions: usize,
    pub skipped_rows: usize,
    /// Set when the file could not be parsed at all
    pub error: Option<String>,
}

/// List a station's playlists in declaration order
pub fn list(station: &Station) -> SyncResult<Vec<PlaylistListing>> {
    let mut listings = Vec::new();

    for path in station.discover_playlists()? {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let folder = station.playlist_folder(&name);

        let listing = match load(&path, folder) {
            Ok((playlist, skipped)) => PlaylistListing {
                name,
                path,
                songs: playlist.songs.len(),
                pending_deletions: playlist.pending_deletions.len(),
                skipped_rows: skipped.len(),
                error: None,
            },
            Err(e) => PlaylistListing {
                name,
                path,
                songs: 0,
                pending_deletions: 0,
                skipped_rows: 0,
                error: Some(e.to_string()),
            },
        };
        listings.push(listing);
    }

    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(content: &str) -> (Playlist, Vec<RowFormatError>) {
        parse(
            content.as_bytes(),
            Path::new("/st/playlists/Rock.csv"),
            PathBuf::from("/st/songs/Rock"),
        )
        .unwrap()
    }

    #[test]
    fn test_header_matching_is_lenient() {
        let (playlist, skipped) = parse_str("artist,TITLE,Override URL\nA,B,https://x\n");
        assert!(skipped.is_empty());
        assert_eq!(playlist.name, "Rock");
        assert_eq!(playlist.songs[0].override_source.as_deref(), Some("https://x"));
    }

    #[test]
    fn test_nan_and_empty_cells_are_absent() {
        let (playlist, _) = parse_str("Artist,Title,Album,Year\nA,B,nan, \n");
        assert_eq!(playlist.songs[0].album, None);
        assert_eq!(playlist.songs[0].year, None);
    }

    #[test]
    fn test_delete_marker_variants() {
        let (playlist, _) = parse_str(
            "Artist,Title,Validated\n[DEL] A,B,\nC,[del]D,\nE,F,delete\nG,H,true\n",
        );
        assert_eq!(playlist.songs.len(), 1);
        assert_eq!(playlist.pending_deletions.len(), 3);
        assert_eq!(playlist.pending_deletions[0].row.artist, "A");
        assert_eq!(playlist.pending_deletions[0].follows, None);
        assert_eq!(playlist.pending_deletions[1].row.title, "D");
    }

    #[test]
    fn test_deletion_whose_anchor_is_gone_is_written_last() {
        let (mut playlist, _) =
            parse_str("Artist,Title,Validated
A,B,true
C,[DEL] D,false
E,F,true
");
        assert_eq!(
            playlist.pending_deletions[0].follows,
            Some(IdentityKey::new("A", "B"))
        );

        playlist.songs.remove(0);
        let rendered = String::from_utf8(render(&playlist).unwrap()).unwrap();

        assert_eq!(
            rendered,
            "Artist,Title,Album,Year,Genre,Validated,OverrideUrl
             E,F,,,,true,
             C,[DEL] D,,,,false,
"
        );
    }

    #[test]
    fn test_legacy_override_in_artist_cell() {
        let (playlist, _) = parse_str("Artist,Title\n[https://example.com/v] Artist A,Song\n");
        let song = &playlist.songs[0];
        assert_eq!(song.artist, "Artist A");
        assert_eq!(song.override_source.as_deref(), Some("https://example.com/v"));
    }

    #[test]
    fn test_override_column_wins_over_legacy() {
        let (playlist, _) =
            parse_str("Artist,Title,OverrideUrl\n[https://old] A,B,https://new\n");
        assert_eq!(playlist.songs[0].override_source.as_deref(), Some("https://new"));
    }

    #[test]
    fn test_row_with_too_many_fields_is_skipped() {
        let (playlist, skipped) = parse_str("Artist,Title\nA,B\nC,D,E\nF,G\n");
        assert_eq!(playlist.songs.len(), 2);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].line, 3);
    }

    #[test]
    fn test_missing_title_column_fails_file() {
        let result = parse(
            b"Artist,Album\nA,B\n",
            Path::new("/p/Bad.csv"),
            PathBuf::from("/s/Bad"),
        );
        assert!(matches!(result, Err(SyncError::Format { .. })));
    }

    #[test]
    fn test_render_canonical_layout() {
        let (playlist, _) = parse_str("Title,Artist,Notes\nSong,Artist A,keep me\n");
        let rendered = String::from_utf8(render(&playlist).unwrap()).unwrap();
        assert_eq!(
            rendered,
            "Artist,Title,Album,Year,Genre,Validated,OverrideUrl,Notes\n\
             Artist A,Song,,,,false,,keep me\n"
        );
    }
}
