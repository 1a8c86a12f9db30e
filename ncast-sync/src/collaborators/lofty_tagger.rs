//! Embedded tag access using lofty
//!
//! lofty is synchronous, so every call runs on the blocking thread pool.

use super::{TagError, Tagger};
use crate::models::TagSnapshot;
use async_trait::async_trait;
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, Tag};
use std::path::{Path, PathBuf};

/// Tagger backed by lofty
#[derive(Debug, Default, Clone)]
pub struct LoftyTagger;

impl LoftyTagger {
    pub fn new() -> Self {
        Self
    }
}

fn open_probe(path: &Path) -> Result<Probe<std::io::BufReader<std::fs::File>>, TagError> {
    let probe = Probe::open(path)
        .map_err(|e| TagError::Io(format!("{}: {}", path.display(), e)))?
        .guess_file_type()
        .map_err(|e| TagError::Io(format!("{}: {}", path.display(), e)))?;

    if probe.file_type().is_none() {
        return Err(TagError::UnsupportedFormat(path.display().to_string()));
    }
    Ok(probe)
}

fn read_tags(path: &Path) -> Result<TagSnapshot, TagError> {
    let tagged_file = open_probe(path)?
        .read()
        .map_err(|e| TagError::Io(format!("{}: {}", path.display(), e)))?;

    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        return Ok(TagSnapshot::default());
    };

    Ok(TagSnapshot {
        artist: tag.artist().map(|s| s.to_string()),
        title: tag.title().map(|s| s.to_string()),
        album: tag.album().map(|s| s.to_string()),
        year: tag.year().map(|y| y.to_string()),
        genre: tag.genre().map(|s| s.to_string()),
    })
}

fn write_tags(path: &Path, tags: &TagSnapshot) -> Result<(), TagError> {
    let mut tagged_file = open_probe(path)?
        .read()
        .map_err(|e| TagError::Io(format!("{}: {}", path.display(), e)))?;

    if tagged_file.primary_tag().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
    }

    let tag = tagged_file
        .primary_tag_mut()
        .ok_or_else(|| TagError::UnsupportedFormat(path.display().to_string()))?;

    if let Some(artist) = &tags.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(title) = &tags.title {
        tag.set_title(title.clone());
    }
    if let Some(album) = &tags.album {
        tag.set_album(album.clone());
    }
    if let Some(year) = tags.year.as_deref().and_then(|y| y.parse::<u32>().ok()) {
        tag.set_year(year);
    }
    if let Some(genre) = &tags.genre {
        tag.set_genre(genre.clone());
    }

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|e| TagError::Io(format!("{}: {}", path.display(), e)))?;

    tracing::debug!(path = %path.display(), "Wrote tags");
    Ok(())
}

#[async_trait]
impl Tagger for LoftyTagger {
    async fn read(&self, path: &Path) -> Result<TagSnapshot, TagError> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || read_tags(&path))
            .await
            .map_err(|e| TagError::Io(format!("Tag reader task failed: {}", e)))?
    }

    async fn write(&self, path: &Path, tags: &TagSnapshot) -> Result<(), TagError> {
        let path: PathBuf = path.to_path_buf();
        let tags = tags.clone();
        tokio::task::spawn_blocking(move || write_tags(&path, &tags))
            .await
            .map_err(|e| TagError::Io(format!("Tag writer task failed: {}", e)))?
    }
}
