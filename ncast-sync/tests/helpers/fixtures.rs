//! Temporary station layouts

use ncast_sync::config::SyncSettings;
use ncast_sync::models::{Station, TagSnapshot};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

use super::fakes::MemoryTagger;

pub const HEADER: &str = "Artist,Title,Album,Year,Genre,Validated,OverrideUrl\n";

/// A station rooted in a temporary directory
pub struct TestStation {
    _dir: TempDir,
    pub station: Station,
}

impl TestStation {
    pub fn new(name: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let station = Station::new(dir.path(), name);
        std::fs::create_dir_all(station.playlists_dir()).unwrap();
        std::fs::create_dir_all(station.library_root()).unwrap();
        Self { _dir: dir, station }
    }

    pub fn playlist_path(&self, playlist: &str) -> PathBuf {
        self.station.playlists_dir().join(format!("{}.csv", playlist))
    }

    pub fn write_playlist(&self, playlist: &str, content: &str) -> PathBuf {
        let path = self.playlist_path(playlist);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn read_playlist(&self, playlist: &str) -> String {
        std::fs::read_to_string(self.playlist_path(playlist)).unwrap()
    }

    pub fn song_path(&self, playlist: &str, artist: &str, title: &str) -> PathBuf {
        self.station
            .playlist_folder(playlist)
            .join(format!("{} - {}.mp3", artist, title))
    }

    /// Create a library file and register its embedded tags
    pub fn add_song(
        &self,
        tagger: &MemoryTagger,
        playlist: &str,
        artist: &str,
        title: &str,
        tags: TagSnapshot,
    ) -> PathBuf {
        let path = self.song_path(playlist, artist, title);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"original audio").unwrap();
        tagger.set(&path, tags);
        path
    }

    pub fn read_report(&self, path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }
}

/// Fully tagged snapshot, as written back after a retag
pub fn full_tags(artist: &str, title: &str, album: &str, genre: &str) -> TagSnapshot {
    TagSnapshot {
        artist: Some(artist.to_string()),
        title: Some(title.to_string()),
        album: Some(album.to_string()),
        year: None,
        genre: Some(genre.to_string()),
    }
}

/// Every file under `root` with its content
pub fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let content = std::fs::read(e.path()).unwrap();
            (e.path().strip_prefix(root).unwrap().to_path_buf(), content)
        })
        .collect()
}

/// Settings with a small pool and millisecond backoffs
pub fn test_settings() -> SyncSettings {
    SyncSettings {
        workers: 2,
        lookup_attempts: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        lookup_timeout_secs: 5,
        fetch_attempts: 1,
        fetch_timeout_secs: 5,
        tag_timeout_secs: 5,
        ..SyncSettings::default()
    }
}
