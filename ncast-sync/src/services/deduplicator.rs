//! Deduplicator
//!
//! Within a playlist, rows sharing an identity key are collapsed to the most
//! complete one. Across playlists nothing is removed; occurrences are only
//! accumulated in a [`DuplicateAnalysis`] for the station report.

use crate::models::{DuplicateGroup, IdentityKey, Playlist, SongRecord};
use std::collections::{BTreeMap, HashMap};

/// Collapse rows with equal identity keys.
///
/// The winner is the row with the most non-empty optional fields; ties keep
/// the earlier row. The winner takes the slot of the first occurrence so the
/// order of every other row is preserved. Returns one group per collapsed key.
pub fn dedupe(playlist: &mut Playlist) -> Vec<DuplicateGroup> {
    let songs = std::mem::take(&mut playlist.songs);
    let mut kept: Vec<SongRecord> = Vec::with_capacity(songs.len());
    let mut slots: HashMap<IdentityKey, usize> = HashMap::new();
    let mut occurrences: BTreeMap<IdentityKey, usize> = BTreeMap::new();

    for song in songs {
        let key = song.identity_key();
        *occurrences.entry(key.clone()).or_insert(0) += 1;

        match slots.get(&key) {
            Some(&slot) => {
                let current = &mut kept[slot];
                if song.completeness() > current.completeness() {
                    tracing::debug!(playlist = %playlist.name, key = %key, "Duplicate replaces less complete row");
                    *current = song;
                } else {
                    tracing::debug!(playlist = %playlist.name, key = %key, "Dropping duplicate row");
                }
            }
            None => {
                slots.insert(key, kept.len());
                kept.push(song);
            }
        }
    }

    playlist.songs = kept;

    occurrences
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(key, count)| DuplicateGroup {
            key,
            playlists: vec![playlist.name.clone()],
            occurrences: count,
        })
        .collect()
}

/// Station-wide duplicate accumulator.
///
/// Each playlist builds its own value; the reconciler merges them in
/// playlist order once all playlists are done.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateAnalysis {
    entries: BTreeMap<IdentityKey, (Vec<String>, usize)>,
}

impl DuplicateAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every row of `playlist` (call before deduplication)
    pub fn record_playlist(&mut self, playlist: &Playlist) {
        for song in &playlist.songs {
            let (playlists, count) = self
                .entries
                .entry(song.identity_key())
                .or_insert_with(|| (Vec::new(), 0));
            if !playlists.contains(&playlist.name) {
                playlists.push(playlist.name.clone());
            }
            *count += 1;
        }
    }

    pub fn merge(&mut self, other: DuplicateAnalysis) {
        for (key, (names, count)) in other.entries {
            let (playlists, total) = self.entries.entry(key).or_insert_with(|| (Vec::new(), 0));
            for name in names {
                if !playlists.contains(&name) {
                    playlists.push(name);
                }
            }
            *total += count;
        }
    }

    /// Keys occurring more than once, in key order
    pub fn groups(&self) -> Vec<DuplicateGroup> {
        self.entries
            .iter()
            .filter(|(_, (_, count))| *count > 1)
            .map(|(key, (playlists, count))| DuplicateGroup {
                key: key.clone(),
                playlists: playlists.clone(),
                occurrences: *count,
            })
            .collect()
    }
}
