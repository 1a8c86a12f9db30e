//! In-memory collaborators
//!
//! Each fake records how it was called so tests can assert on side effects
//! without touching the network or real audio files.

use async_trait::async_trait;
use ncast_sync::collaborators::{
    AlbumLookup, Collaborators, FetchError, Fetcher, LookupError, SourceHint, TagError, Tagger,
};
use ncast_sync::models::{IdentityKey, TagSnapshot, ValidationOutcome};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Tagger keeping tags in a map keyed by path
///
/// Reads and writes fail for paths that do not exist on disk, like a real
/// tag library would. Reads of paths marked unreadable fail as well.
#[derive(Default)]
pub struct MemoryTagger {
    tags: Mutex<HashMap<PathBuf, TagSnapshot>>,
    unreadable: Mutex<HashSet<PathBuf>>,
    writes: AtomicUsize,
}

impl MemoryTagger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: &Path, tags: TagSnapshot) {
        self.tags.lock().unwrap().insert(path.to_path_buf(), tags);
    }

    pub fn get(&self, path: &Path) -> Option<TagSnapshot> {
        self.tags.lock().unwrap().get(path).cloned()
    }

    /// Make tag reads of `path` fail
    pub fn fail_reads(&self, path: &Path) {
        self.unreadable.lock().unwrap().insert(path.to_path_buf());
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tagger for MemoryTagger {
    async fn read(&self, path: &Path) -> Result<TagSnapshot, TagError> {
        if !path.exists() {
            return Err(TagError::Io(format!("{} does not exist", path.display())));
        }
        if self.unreadable.lock().unwrap().contains(path) {
            return Err(TagError::Io(format!("{} has a corrupt tag header", path.display())));
        }
        Ok(self.get(path).unwrap_or_default())
    }

    async fn write(&self, path: &Path, tags: &TagSnapshot) -> Result<(), TagError> {
        if !path.exists() {
            return Err(TagError::Io(format!("{} does not exist", path.display())));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut map = self.tags.lock().unwrap();
        let entry = map.entry(path.to_path_buf()).or_default();
        let merge = |slot: &mut Option<String>, value: &Option<String>| {
            if value.is_some() {
                slot.clone_from(value);
            }
        };
        merge(&mut entry.artist, &tags.artist);
        merge(&mut entry.title, &tags.title);
        merge(&mut entry.album, &tags.album);
        merge(&mut entry.year, &tags.year);
        merge(&mut entry.genre, &tags.genre);
        Ok(())
    }
}

/// Scripted answer for one identity key
#[derive(Debug, Clone)]
pub enum LookupScript {
    Confirm(String),
    Reject(String),
    /// Fail transiently on every attempt
    Transient,
}

/// Album lookup answering from a per-key script
///
/// Keys without a script fail transiently.
#[derive(Default)]
pub struct ScriptedLookup {
    scripts: Mutex<HashMap<IdentityKey, LookupScript>>,
    calls: Mutex<HashMap<IdentityKey, usize>>,
}

impl ScriptedLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, artist: &str, title: &str, script: LookupScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(IdentityKey::new(artist, title), script);
        self
    }

    pub fn calls_for(&self, artist: &str, title: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&IdentityKey::new(artist, title))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl AlbumLookup for ScriptedLookup {
    async fn confirm(&self, artist: &str, title: &str) -> Result<ValidationOutcome, LookupError> {
        let key = IdentityKey::new(artist, title);
        *self.calls.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        let script = self.scripts.lock().unwrap().get(&key).cloned();
        match script {
            Some(LookupScript::Confirm(album)) => Ok(ValidationOutcome::Confirmed(album)),
            Some(LookupScript::Reject(reason)) => Ok(ValidationOutcome::Rejected(reason)),
            Some(LookupScript::Transient) | None => {
                Err(LookupError::Transient("service unavailable".to_string()))
            }
        }
    }
}

/// Fetcher that writes a small file into its own staging directory
pub struct FakeFetcher {
    staging: TempDir,
    missing: Mutex<HashSet<IdentityKey>>,
    calls: Mutex<Vec<(SourceHint, IdentityKey)>>,
    counter: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            staging: TempDir::new().unwrap(),
            missing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        }
    }

    /// Make fetches for this song fail with `NotFound`
    pub fn not_found(self, artist: &str, title: &str) -> Self {
        self.missing
            .lock()
            .unwrap()
            .insert(IdentityKey::new(artist, title));
        self
    }

    pub fn calls(&self) -> Vec<(SourceHint, IdentityKey)> {
        self.calls.lock().unwrap().clone()
    }

    /// Content written for a fetched song
    pub fn content_for(hint: &SourceHint, artist: &str, title: &str) -> String {
        match hint {
            SourceHint::Search => format!("search:{} - {}", artist, title),
            SourceHint::Url(url) => format!("url:{}", url),
        }
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        hint: &SourceHint,
        artist: &str,
        title: &str,
    ) -> Result<PathBuf, FetchError> {
        let key = IdentityKey::new(artist, title);
        self.calls.lock().unwrap().push((hint.clone(), key.clone()));

        if self.missing.lock().unwrap().contains(&key) {
            return Err(FetchError::NotFound(format!("{} - {}", artist, title)));
        }

        let index = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self.staging.path().join(format!("download-{}.mp3", index));
        std::fs::write(&path, Self::content_for(hint, artist, title))
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        Ok(path)
    }
}

/// Build a collaborator set from shared fakes
pub fn collaborators(
    tagger: &Arc<MemoryTagger>,
    lookup: &Arc<ScriptedLookup>,
    fetcher: &Arc<FakeFetcher>,
) -> Collaborators {
    Collaborators {
        tagger: tagger.clone(),
        lookup: lookup.clone(),
        fetcher: fetcher.clone(),
    }
}
