//! Override Resolver
//!
//! Rows with an explicit source pointer bypass validation and discovery. Their
//! validation state is forced to `Confirmed` and they are handed to the work
//! scheduler as replace jobs.

use crate::models::{IdentityKey, Playlist, ValidationState};
use crate::services::library_inspector::ScanReport;
use std::path::PathBuf;

/// A row whose audio must come from its override source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideJob {
    pub key: IdentityKey,
    pub artist: String,
    pub title: String,
    pub url: String,
    /// Current library file, backed up before replacement
    pub existing: Option<PathBuf>,
}

pub fn resolve_overrides(playlist: &mut Playlist, library: &ScanReport) -> Vec<OverrideJob> {
    let mut jobs = Vec::new();

    for song in &mut playlist.songs {
        let Some(url) = song.override_source.clone().filter(|u| !u.is_empty()) else {
            continue;
        };

        song.validated = ValidationState::Confirmed;

        let key = song.identity_key();
        let existing = library.find(&key).map(|f| f.path.clone());
        tracing::debug!(key = %key, url = %url, replace = existing.is_some(), "Override pending");

        jobs.push(OverrideJob {
            key,
            artist: song.artist.clone(),
            title: song.title.clone(),
            url,
            existing,
        });
    }

    jobs
}
